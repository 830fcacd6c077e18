//! Document store adapter and the typed documents it holds.
//!
//! The host application persists game state as named JSON documents. This
//! module owns that boundary: an object-safe [`DocumentStore`] trait with one
//! atomic read-transform-write primitive, plus typed records for every
//! document key so handlers never see partially-shaped data. Missing or
//! malformed documents always decode as defaults rather than failing.

use crate::deck::Card;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

/// Errors from document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Well-known document keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKey {
    PlayerData,
    EnemyData,
    PlayerCards,
    GameState,
    PrivateData,
    VisibleDeck,
    MapData,
    MetaData,
}

impl DocKey {
    pub const ALL: [DocKey; 8] = [
        DocKey::PlayerData,
        DocKey::EnemyData,
        DocKey::PlayerCards,
        DocKey::GameState,
        DocKey::PrivateData,
        DocKey::VisibleDeck,
        DocKey::MapData,
        DocKey::MetaData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocKey::PlayerData => "player_data",
            DocKey::EnemyData => "enemy_data",
            DocKey::PlayerCards => "player_cards",
            DocKey::GameState => "game_state",
            DocKey::PrivateData => "private_data",
            DocKey::VisibleDeck => "visible_deck",
            DocKey::MapData => "map_data",
            DocKey::MetaData => "meta_data",
        }
    }
}

/// Boxed transform applied inside one atomic read-modify-write round trip.
pub type Updater = Box<dyn FnOnce(Value) -> Value + Send>;

/// The persistence collaborator.
///
/// Implementations must apply [`DocumentStore::update`] atomically: no other
/// update to the same key may interleave between the read and the write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `None` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Atomically read, transform, and write back one document. A missing
    /// document is presented to the updater as an empty object.
    async fn update(&self, key: &str, updater: Updater) -> Result<(), StoreError>;

    /// List all persisted document keys.
    async fn list_documents(&self) -> Result<Vec<String>, StoreError>;
}

/// Decode a raw document into a typed record, defaulting on absence or shape
/// mismatch. This is the only place malformed persisted data is tolerated.
fn decode_or_default<T: DeserializeOwned + Default>(key: &str, value: Option<Value>) -> T {
    match value {
        Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
            warn!(key, error = %e, "document failed to decode, using defaults");
            T::default()
        }),
        None => T::default(),
    }
}

/// Read a document as a typed record.
pub async fn read_doc<T>(store: &dyn DocumentStore, key: DocKey) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let raw = store.get(key.as_str()).await?;
    Ok(decode_or_default(key.as_str(), raw))
}

/// Atomically transform a typed document.
pub async fn update_doc<T, F>(store: &dyn DocumentStore, key: DocKey, f: F) -> Result<(), StoreError>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T) + Send + 'static,
{
    let name = key.as_str();
    store
        .update(
            name,
            Box::new(move |raw| {
                let mut doc: T = decode_or_default(name, Some(raw));
                f(&mut doc);
                serde_json::to_value(doc).unwrap_or_else(|e| {
                    warn!(key = name, error = %e, "document failed to encode, writing empty");
                    Value::Object(serde_json::Map::new())
                })
            }),
        )
        .await
}

/// Overwrite a document with a typed record.
pub async fn replace_doc<T>(store: &dyn DocumentStore, key: DocKey, doc: T) -> Result<(), StoreError>
where
    T: Serialize + Send + 'static,
{
    let name = key.as_str();
    store
        .update(
            name,
            Box::new(move |_| {
                serde_json::to_value(doc).unwrap_or_else(|e| {
                    warn!(key = name, error = %e, "document failed to encode, writing empty");
                    Value::Object(serde_json::Map::new())
                })
            }),
        )
        .await
}

// ============================================================================
// Typed documents
// ============================================================================

/// An item in the player's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
}

/// Whether an item must be activated or works continuously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Active,
    Passive,
}

/// A temporary condition on the player or an enemy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusEffect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The human player's persistent vitals and belongings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub health: i64,
    #[serde(default)]
    pub max_health: i64,
    #[serde(default)]
    pub chips: i64,
    #[serde(default)]
    pub claimable_pot: i64,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub status_effects: Vec<StatusEffect>,
}

/// One opponent at the table. Freeform fields the AI attaches (moods, tells)
/// ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Enemy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chips: i64,
    #[serde(default)]
    pub hand: Vec<Card>,
    #[serde(default)]
    pub play_style: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// All opponents at the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnemyData {
    #[serde(default)]
    pub enemies: Vec<Enemy>,
}

/// The human player's hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerCards {
    #[serde(default)]
    pub current_hand: Vec<Card>,
}

/// A non-chip wager the AI declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Wager {
    #[serde(default)]
    pub player: String,
    #[serde(default)]
    pub item: String,
}

/// Public state of the hand in progress.
///
/// `extra` absorbs arbitrary fields the AI merges in through UpdateState, so
/// shallow merges never lose data the engine does not model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GameState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turn: Option<String>,
    #[serde(default)]
    pub pot_amount: i64,
    #[serde(default)]
    pub board_cards: Vec<Card>,
    #[serde(default)]
    pub last_bet_amount: i64,
    #[serde(default)]
    pub custom_wagers: Vec<Wager>,
    /// Phase-1 deal buffer: requests queued but not yet drawn from the deck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unprocessed_deal_actions: Option<Vec<crate::command::DealRequest>>,
    /// Phase-2 handoff buffer: the consumed requests, kept for presentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deal_animation_queue: Option<Vec<crate::command::DealRequest>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl GameState {
    /// A hand is considered started once the AI has declared a game type.
    pub fn in_progress(&self) -> bool {
        self.game_type.is_some()
    }
}

/// Hidden state: the authoritative deck. Never exposed to the AI unless the
/// deterministic dealing mirror is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PrivateData {
    #[serde(default)]
    pub deck: Vec<Card>,
}

/// Mirror of the deck exposed to the AI in deterministic dealing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VisibleDeck {
    #[serde(default)]
    pub deck: String,
    #[serde(default)]
    pub comment: String,
}

/// Cross-run progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetaData {
    #[serde(default)]
    pub legacy_shards: i64,
    #[serde(default)]
    pub unlocked_legends: Vec<String>,
    #[serde(default)]
    pub unlocked_talents: Vec<String>,
}

// `MapData` lives in crate::map next to its generator.
pub use crate::map::MapData as MapDocument;

// ============================================================================
// Store implementations
// ============================================================================

/// In-memory store for tests and hosts that manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs.lock().await.get(key).cloned())
    }

    async fn update(&self, key: &str, updater: Updater) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        let current = docs
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        docs.insert(key.to_string(), updater(current));
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.docs.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// File-backed store: one pretty-printed JSON file per document.
pub struct FileStore {
    dir: PathBuf,
    // Serializes read-modify-write round trips across tasks.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }

    async fn read_raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "malformed document on disk, treating as empty");
                    Ok(Some(Value::Object(serde_json::Map::new())))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.read_raw(key).await
    }

    async fn update(&self, key: &str, updater: Updater) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read_raw(key)
            .await?
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let updated = updater(current);

        fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(&updated)?;
        fs::write(self.path_for(key), content).await?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string_lossy().to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("player_data").await.unwrap(), None);

        replace_doc(
            &store,
            DocKey::PlayerData,
            PlayerData {
                name: "Hero".into(),
                health: 3,
                max_health: 3,
                chips: 1000,
                ..PlayerData::default()
            },
        )
        .await
        .unwrap();

        let player: PlayerData = read_doc(&store, DocKey::PlayerData).await.unwrap();
        assert_eq!(player.name, "Hero");
        assert_eq!(player.chips, 1000);
    }

    #[tokio::test]
    async fn test_update_doc_sees_missing_as_default() {
        let store = MemoryStore::new();
        update_doc(&store, DocKey::PlayerData, |p: &mut PlayerData| {
            p.chips += 500;
        })
        .await
        .unwrap();

        let player: PlayerData = read_doc(&store, DocKey::PlayerData).await.unwrap();
        assert_eq!(player.chips, 500);
    }

    #[tokio::test]
    async fn test_malformed_document_decodes_as_default() {
        let store = MemoryStore::new();
        store
            .update("player_data", Box::new(|_| json!("not an object")))
            .await
            .unwrap();

        let player: PlayerData = read_doc(&store, DocKey::PlayerData).await.unwrap();
        assert_eq!(player, PlayerData::default());
    }

    #[tokio::test]
    async fn test_game_state_preserves_unknown_fields() {
        let store = MemoryStore::new();
        store
            .update(
                "game_state",
                Box::new(|_| json!({ "game_type": "poker", "round": "flop" })),
            )
            .await
            .unwrap();

        update_doc(&store, DocKey::GameState, |s: &mut GameState| {
            s.pot_amount = 300;
        })
        .await
        .unwrap();

        let raw = store.get("game_state").await.unwrap().unwrap();
        assert_eq!(raw["round"], "flop");
        assert_eq!(raw["pot_amount"], 300);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        update_doc(&store, DocKey::MetaData, |m: &mut MetaData| {
            m.legacy_shards = 42;
        })
        .await
        .unwrap();

        let meta: MetaData = read_doc(&store, DocKey::MetaData).await.unwrap();
        assert_eq!(meta.legacy_shards, 42);

        let keys = store.list_documents().await.unwrap();
        assert_eq!(keys, vec!["meta_data".to_string()]);
    }
}
