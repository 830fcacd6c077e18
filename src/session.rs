//! Session context: one value owning everything a game session needs.
//!
//! There is no global state anywhere in this crate. Every handler takes a
//! `&mut SessionContext`, which owns the document store handle, the outbound
//! collaborators, the configuration, the derived snapshot, the player-facing
//! history, and the staged-action list. Multiple sessions can coexist, and
//! tests construct as many as they need.

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::staging::StagedAction;
use crate::store::{
    read_doc, DocKey, DocumentStore, EnemyData, GameState, MapDocument, MetaData, PlayerCards,
    PlayerData, PrivateData, StoreError, VisibleDeck,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One-way, best-effort user notification collaborator.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Outbound AI invocation collaborator. Fire and forget; the response arrives
/// later as a new text blob fed back into the parser.
#[async_trait::async_trait]
pub trait PromptSink: Send + Sync {
    async fn submit_prompt(&self, text: &str);
}

/// Discards all notices.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        debug!(?level, message, "notice dropped (null notifier)");
    }
}

/// Discards all outbound prompts.
pub struct NullPromptSink;

#[async_trait::async_trait]
impl PromptSink for NullPromptSink {
    async fn submit_prompt(&self, text: &str) {
        debug!(text, "prompt dropped (null sink)");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Status,
    Action,
    Deal,
    Event,
    Map,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub text: String,
}

const HISTORY_CAP: usize = 100;

/// Player-facing log of game events, newest first, capped.
#[derive(Debug, Default)]
pub struct GameHistory {
    entries: VecDeque<HistoryEntry>,
}

impl GameHistory {
    pub fn add(&mut self, kind: HistoryKind, text: impl Into<String>) {
        self.entries.push_front(HistoryEntry {
            kind,
            text: text.into(),
        });
        if self.entries.len() > HISTORY_CAP {
            self.entries.pop_back();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    /// Map-driven run with difficulty, vitals, and meta progression.
    #[default]
    Roguelike,
    /// Free play against a fixed-stake bankroll.
    Origin,
}

/// Per-session configuration, builder style.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub player_name: String,
    pub mode: GameMode,
    /// When set, the shuffled deck is mirrored into the visible-deck document
    /// so the AI can be held to a fixed dealing order.
    pub deck_visible_to_ai: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_name: "Player".to_string(),
            mode: GameMode::Roguelike,
            deck_visible_to_ai: false,
        }
    }
}

impl SessionConfig {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: GameMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_deck_visible_to_ai(mut self, visible: bool) -> Self {
        self.deck_visible_to_ai = visible;
        self
    }

    /// Replace `{{user}}` placeholders with the configured player name.
    pub fn substitute(&self, text: &str) -> String {
        text.replace("{{user}}", &self.player_name)
    }

    /// Whether a name from the wire refers to the human player.
    pub fn is_player(&self, name: &str) -> bool {
        name == "{{user}}" || name == self.player_name
    }
}

/// Derived, disposable copy of every persisted document.
///
/// Rebuilt wholesale by [`SessionContext::fetch_all`]; never written back.
#[derive(Debug, Clone, Default)]
pub struct GameSnapshot {
    pub player_data: PlayerData,
    pub enemy_data: EnemyData,
    pub player_cards: PlayerCards,
    pub game_state: GameState,
    pub map_data: MapDocument,
    pub meta_data: MetaData,
    pub visible_deck: VisibleDeck,
    pub deck_len: usize,
    pub run_in_progress: bool,
}

/// Everything one active game session owns.
pub struct SessionContext {
    store: Box<dyn DocumentStore>,
    pub notifier: Box<dyn Notifier>,
    pub prompt_sink: Box<dyn PromptSink>,
    pub config: SessionConfig,
    pub snapshot: GameSnapshot,
    pub history: GameHistory,
    /// Actions staged by the player, not yet persisted.
    pub staged_actions: Vec<StagedAction>,
    /// Optimistic chip delta from staged actions, applied on top of the
    /// snapshot for display only. Reset on every fetch and commit.
    pub pending_chip_delta: i64,
    /// Transient advisory from the AI, never persisted.
    pub current_hint: Option<String>,
}

impl SessionContext {
    pub fn new(store: Box<dyn DocumentStore>, config: SessionConfig) -> Self {
        Self {
            store,
            notifier: Box::new(NullNotifier),
            prompt_sink: Box::new(NullPromptSink),
            config,
            snapshot: GameSnapshot::default(),
            history: GameHistory::default(),
            staged_actions: Vec::new(),
            pending_chip_delta: 0,
            current_hint: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_prompt_sink(mut self, prompt_sink: Box<dyn PromptSink>) -> Self {
        self.prompt_sink = prompt_sink;
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn notify(&self, level: NoticeLevel, message: &str) {
        self.notifier.notify(level, message);
    }

    pub async fn submit_prompt(&self, text: &str) {
        let text = self.config.substitute(text);
        self.prompt_sink.submit_prompt(&text).await;
    }

    /// Player chips as displayed: last-fetched value plus the optimistic
    /// pending delta from staged actions.
    pub fn displayed_chips(&self) -> i64 {
        self.snapshot.player_data.chips + self.pending_chip_delta
    }

    /// Re-read every persisted document into a fresh snapshot.
    ///
    /// This is the only point where observation happens; handlers call it
    /// after every committing operation ("fetch-all, then render").
    pub async fn fetch_all(&mut self) -> Result<(), SessionError> {
        let store = self.store.as_ref();
        let player_data: PlayerData = read_doc(store, DocKey::PlayerData).await?;
        let enemy_data: EnemyData = read_doc(store, DocKey::EnemyData).await?;
        let player_cards: PlayerCards = read_doc(store, DocKey::PlayerCards).await?;
        let game_state: GameState = read_doc(store, DocKey::GameState).await?;
        let map_data: MapDocument = read_doc(store, DocKey::MapData).await?;
        let meta_data: MetaData = read_doc(store, DocKey::MetaData).await?;
        let visible_deck: VisibleDeck = read_doc(store, DocKey::VisibleDeck).await?;
        let private: PrivateData = read_doc(store, DocKey::PrivateData).await?;

        let run_in_progress = match self.config.mode {
            GameMode::Roguelike => map_data.is_present() && player_data.health > 0,
            GameMode::Origin => true,
        };

        self.snapshot = GameSnapshot {
            player_data,
            enemy_data,
            player_cards,
            game_state,
            map_data,
            meta_data,
            visible_deck,
            deck_len: private.deck.len(),
            run_in_progress,
        };
        self.pending_chip_delta = 0;
        debug!(run_in_progress, "snapshot rebuilt");
        Ok(())
    }

    /// Raw document read, for callers that need an untyped view.
    pub async fn get_raw(&self, key: DocKey) -> Result<Option<Value>, SessionError> {
        Ok(self.store.get(key.as_str()).await?)
    }
}
