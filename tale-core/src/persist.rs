//! Scene persistence for save/load functionality.
//!
//! A save is one pretty-printed JSON document holding everything needed to
//! resume a scene: the live history, its summaries, the roster and the
//! memory bookkeeping. [`SaveMetadata`] is duplicated at the top level so
//! save pickers can read it without deserializing the rest.

use crate::actor::Character;
use crate::clock::IsoDuration;
use crate::error::PersistError;
use crate::history::{ArchiveEntry, HistoryStore, LayerEntry};
use crate::id::{MemoryId, MemorySessionId};
use crate::message::{Message, MessageKind};
use crate::scene::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::fs;

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// A saved scene with all state needed to resume play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedScene {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created (RFC 3339).
    pub saved_at: String,

    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub environment: Environment,

    pub history: Vec<Message>,
    #[serde(default)]
    pub archived_history: Vec<ArchiveEntry>,
    #[serde(default)]
    pub layered_history: Vec<Vec<LayerEntry>>,

    /// Active characters, players included.
    pub characters: Vec<Character>,
    #[serde(default)]
    pub inactive_characters: Vec<Character>,

    #[serde(default)]
    pub game_state: Value,

    pub memory_id: MemoryId,
    pub memory_session_id: MemorySessionId,
    #[serde(default)]
    pub saved_memory_session_id: Option<MemorySessionId>,
    #[serde(default)]
    pub immutable_save: bool,

    /// Scene clock at save time.
    #[serde(default)]
    pub ts: IsoDuration,

    /// The save this scene was originally loaded from.
    #[serde(default)]
    pub restore_from: Option<String>,

    pub metadata: SaveMetadata,
}

/// Metadata about the save file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    /// Scene name.
    pub name: String,

    /// Player character name, if the scene has one.
    pub player_character: Option<String>,

    /// Names of the active characters.
    pub characters: Vec<String>,

    /// Number of messages in the live history.
    pub message_count: usize,

    /// Human readable scene time.
    pub scene_time: String,

    /// When the save was created (duplicated from parent for peek access).
    #[serde(default)]
    pub saved_at: String,
}

impl SavedScene {
    /// Fill in `version`, `saved_at` and `metadata` for a scene snapshot.
    pub fn stamp(mut self) -> Self {
        let saved_at = chrono::Utc::now().to_rfc3339();
        self.metadata = SaveMetadata {
            name: self.name.clone(),
            player_character: self
                .characters
                .iter()
                .find(|c| c.is_player)
                .map(|c| c.name.clone()),
            characters: self.characters.iter().map(|c| c.name.clone()).collect(),
            message_count: self.history.len(),
            scene_time: self.ts.to_human("", "Start"),
            saved_at: saved_at.clone(),
        };
        self.version = SAVE_VERSION;
        self.saved_at = saved_at;
        self
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Parse a save document.
    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        let saved: Self = serde_json::from_str(content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Check if a save file exists and get its metadata without loading the full state.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: Option<u32>,
            metadata: Option<SaveMetadata>,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        let (Some(version), Some(metadata)) = (partial.version, partial.metadata) else {
            return Err(PersistError::InvalidFormat);
        };

        if version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: version,
            });
        }

        Ok(metadata)
    }

    /// The saved history as a store. The clock is taken as saved.
    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::from_parts(
            self.history.clone(),
            self.archived_history.clone(),
            self.layered_history.clone(),
            self.ts,
        )
    }

    /// Number of saved messages of `kind`.
    pub fn count(&self, kind: MessageKind) -> usize {
        self.history.iter().filter(|m| m.is(kind)).count()
    }
}

/// List all save files in a directory.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = SavedScene::peek_metadata(&path).await {
                saves.push(SaveInfo {
                    path: path.to_string_lossy().to_string(),
                    metadata,
                });
            }
        }
    }

    // newest first
    saves.sort_by(|a, b| b.metadata.saved_at.cmp(&a.metadata.saved_at));
    Ok(saves)
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    /// Path to the save file.
    pub path: String,

    /// Save metadata.
    pub metadata: SaveMetadata,
}

/// Turn a user supplied name into a save filename: spaces become dashes,
/// lowercase, `.json` appended when missing.
pub fn normalize_filename(name: &str) -> String {
    let mut filename = name.trim().replace(' ', "-").to_lowercase();
    if !filename.ends_with(".json") {
        filename.push_str(".json");
    }
    filename
}
