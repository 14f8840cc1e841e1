//! Saving, loading and restoring scenes.

use super::Scene;
use crate::actor::Actor;
use crate::agent::InputPrompt;
use crate::error::{PersistError, SceneResult};
use crate::events::{SceneEvent, StatusLevel};
use crate::id::MemoryId;
use crate::persist::{normalize_filename, SaveMetadata, SavedScene};
use tokio::fs;
use tracing::{debug, info};

/// How a save was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveMode {
    /// End of a loop pass. Skipped unless the scene can auto save.
    Auto,
    /// Explicit save; asks for a filename if the scene has none.
    Manual,
    /// Save under a new filename, detaching from the previous save.
    SaveAs(String),
}

impl Scene {
    /// Save the scene to its save directory. Returns whether anything was
    /// written.
    pub async fn save(&mut self, mode: SaveMode) -> SceneResult<bool> {
        let mode = match mode {
            SaveMode::Manual if self.immutable_save => SaveMode::SaveAs(self.ask_filename().await?),
            other => other,
        };

        match &mode {
            SaveMode::Auto => {
                if !self.can_auto_save() {
                    debug!(filename = ?self.filename, "auto save skipped");
                    return Ok(false);
                }
            }
            SaveMode::Manual => {
                if self.filename.is_none() {
                    let filename = self.ask_filename().await?;
                    self.filename = Some(normalize_filename(&filename));
                }
            }
            SaveMode::SaveAs(filename) => {
                self.filename = Some(normalize_filename(filename));
                self.immutable_save = false;
                self.memory_id = MemoryId::new();
                self.commit_to_memory().await?;
            }
        }

        let Some(filename) = self.filename.clone() else {
            return Err(PersistError::NoFilename.into());
        };

        self.set_new_memory_session_id();

        fs::create_dir_all(&self.save_dir)
            .await
            .map_err(PersistError::from)?;
        let path = self.save_dir.join(&filename);
        self.to_saved().save_json(&path).await?;
        info!(path = %path.display(), mode = ?mode, "saved scene");

        if mode != SaveMode::Auto {
            self.events
                .publish(SceneEvent::status(StatusLevel::Success, "Saved scene"));
        }
        self.saved = true;
        self.emit_status(false);
        Ok(true)
    }

    async fn ask_filename(&self) -> SceneResult<String> {
        let prompt = InputPrompt {
            character: None,
            history_tokens: self.history_length(),
        };
        let input = self.input.next_input(prompt, &self.cancel).await?;
        self.cancel.check()?;
        input
            .map(|i| i.message.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| PersistError::NoFilename.into())
    }

    /// A snapshot of everything a save holds.
    pub fn to_saved(&self) -> SavedScene {
        SavedScene {
            version: 0,
            saved_at: String::new(),
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            intro: self.intro.clone(),
            context: self.context.clone(),
            environment: self.environment,
            history: self.history.messages().to_vec(),
            archived_history: self.history.archived().to_vec(),
            layered_history: self.history.layers().to_vec(),
            characters: self.characters().cloned().collect(),
            inactive_characters: self.inactive_characters.values().cloned().collect(),
            game_state: self.game_state.clone(),
            memory_id: self.memory_id,
            memory_session_id: self.memory_session_id,
            saved_memory_session_id: self.saved_memory_session_id,
            immutable_save: self.immutable_save,
            ts: self.history.clock(),
            restore_from: self.restore_from.clone(),
            metadata: SaveMetadata::default(),
        }
        .stamp()
    }

    /// Replace this scene's state with a saved one.
    fn apply_saved(&mut self, saved: SavedScene) {
        let history = saved.history_store().with_events(self.events.clone());

        self.name = saved.name;
        self.title = saved.title;
        self.description = saved.description;
        self.intro = saved.intro;
        self.context = saved.context;
        self.environment = saved.environment;
        self.game_state = saved.game_state;
        self.history = history;
        self.actors = saved
            .characters
            .into_iter()
            .map(|c| if c.is_player { Actor::player(c) } else { Actor::npc(c) })
            .collect();
        self.inactive_characters = saved
            .inactive_characters
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        self.memory_id = saved.memory_id;
        self.memory_session_id = saved.memory_session_id;
        self.saved_memory_session_id = saved.saved_memory_session_id;
        self.immutable_save = saved.immutable_save;
        self.restore_from = saved.restore_from;
    }

    /// Load `filename` from the save directory.
    ///
    /// Long term memory is always rebuilt for the loaded scene.
    pub async fn load(&mut self, filename: &str) -> SceneResult<()> {
        let path = self.save_dir.join(filename);
        let saved = SavedScene::load_json(&path).await?;
        info!(path = %path.display(), messages = saved.history.len(), "load scene");

        self.apply_saved(saved);
        if self.restore_from.is_none() {
            self.restore_from = Some(filename.to_string());
        }
        self.filename = Some(filename.to_string());
        self.saved = true;

        self.reset_memory().await?;
        self.emit_status(true);
        Ok(())
    }

    /// Reload the save this scene was started from, discarding progress.
    ///
    /// With `save_as` the restored scene is saved under that name;
    /// otherwise it has no filename until saved.
    pub async fn restore(&mut self, save_as: Option<&str>) -> SceneResult<()> {
        let Some(restore_from) = self.restore_from.clone() else {
            return Err(PersistError::NoFilename.into());
        };
        info!(restore_from = %restore_from, "restore scene");

        self.reset();
        self.actors.clear();
        self.inactive_characters.clear();

        let saved = SavedScene::load_json(self.save_dir.join(&restore_from)).await?;
        self.apply_saved(saved);
        self.restore_from = Some(restore_from);
        self.reset_memory().await?;

        match save_as {
            Some(name) => {
                self.save(SaveMode::SaveAs(name.to_string())).await?;
            }
            None => self.filename = None,
        }

        self.emit_status(true);
        Ok(())
    }
}
