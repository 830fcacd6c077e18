//! Testing utilities for the card table.
//!
//! This module provides tools for integration testing:
//! - `RecordingNotifier` and `RecordingPromptSink` for capturing outbound
//!   collaborator traffic without a UI or an AI behind it
//! - `TestHarness` for scripted command scenarios against an in-memory store

use std::sync::Mutex;

use crate::handlers;
use crate::session::{
    NoticeLevel, Notifier, PromptSink, SessionConfig, SessionContext, SessionError,
};
use crate::store::{replace_doc, DocKey, MemoryStore, PlayerData};

/// A notifier that records every notice it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far, oldest first.
    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

/// A prompt sink that records every prompt submitted to the AI.
#[derive(Default)]
pub struct RecordingPromptSink {
    prompts: tokio::sync::Mutex<Vec<String>>,
}

impl RecordingPromptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All prompts submitted so far, oldest first.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PromptSink for RecordingPromptSink {
    async fn submit_prompt(&self, text: &str) {
        self.prompts.lock().await.push(text.to_string());
    }
}

// Arc impls let a test keep a handle to the recorder after boxing it into
// the context.
impl Notifier for std::sync::Arc<RecordingNotifier> {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.as_ref().notify(level, message);
    }
}

#[async_trait::async_trait]
impl PromptSink for std::sync::Arc<RecordingPromptSink> {
    async fn submit_prompt(&self, text: &str) {
        self.as_ref().submit_prompt(text).await;
    }
}

/// A scripted session against an in-memory store.
///
/// The harness owns the context; tests feed it AI text blobs and inspect the
/// snapshot afterwards. Collaborator recordings live in `Arc`s the test holds
/// on to separately.
pub struct TestHarness {
    pub ctx: SessionContext,
}

impl TestHarness {
    /// A fresh harness for the named player, with null collaborators.
    pub fn new(player_name: &str) -> Self {
        Self {
            ctx: SessionContext::new(
                Box::new(MemoryStore::new()),
                SessionConfig::new(player_name),
            ),
        }
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            ctx: SessionContext::new(Box::new(MemoryStore::new()), config),
        }
    }

    /// Seed the player document and refresh the snapshot.
    pub async fn seed_player(&mut self, player: PlayerData) -> Result<(), SessionError> {
        replace_doc(self.ctx.store(), DocKey::PlayerData, player).await?;
        self.ctx.fetch_all().await
    }

    /// Feed one AI text blob through the full parse-and-dispatch path.
    pub async fn feed(&mut self, text: &str) -> Result<(), SessionError> {
        handlers::process_text(&mut self.ctx, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_feeds_commands_end_to_end() {
        let mut harness = TestHarness::new("Mara");
        harness
            .feed(r#"[Game:Start, data:{"game_type":"blackjack","players":["Mara","Vex"]}]"#)
            .await
            .unwrap();
        assert_eq!(
            harness.ctx.snapshot.game_state.game_type.as_deref(),
            Some("blackjack")
        );
    }

    #[test]
    fn test_recording_notifier_captures_in_order() {
        let notifier = RecordingNotifier::new();
        notifier.notify(NoticeLevel::Info, "first");
        notifier.notify(NoticeLevel::Error, "second");
        let notices = notifier.notices();
        assert_eq!(notices[0], (NoticeLevel::Info, "first".to_string()));
        assert_eq!(notices[1], (NoticeLevel::Error, "second".to_string()));
    }
}
