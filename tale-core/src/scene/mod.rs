//! Scenes: the roster, the history and the loops that drive them.
//!
//! A [`Scene`] owns its [`HistoryStore`] outright. Everything that changes
//! the history goes through the scene so saved state, status and events
//! stay in step with it.
//!
//! ```ignore
//! use tale_core::prelude::*;
//!
//! let mut scene = Scene::new(agents, input)
//!     .with_config(GameConfig::load_or_default("tale.toml"))
//!     .with_save_dir("scenes/tavern");
//! scene.add_actor(Actor::player(Character::new("Kai"))).await?;
//! scene.add_actor(Actor::npc(Character::new("Elara"))).await?;
//! scene.start().await?;
//! ```

mod commands;
mod game_loop;
mod rerun;
mod save;

pub use commands::{is_command, Command};
pub use game_loop::TurnOutcome;
pub use rerun::RerunOutcome;
pub use save::SaveMode;

use crate::actor::{Actor, Character};
use crate::agent::{Agents, InputSource, MemoryItem};
use crate::cancel::CancelToken;
use crate::clock::IsoDuration;
use crate::config::GameConfig;
use crate::context::{build_context, ApproximateTokenCounter, BuiltContext, ContextRequest, TokenCounter};
use crate::error::{SceneError, SceneResult};
use crate::events::{EventSink, SceneEvent, SceneStatus};
use crate::history::HistoryStore;
use crate::id::{MemoryId, MemorySessionId, MessageId};
use crate::message::{Message, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Which loop a scene runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Turn taking between the actors.
    #[default]
    Scene,
    /// Free-form editing driven by commands.
    Creative,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Scene => "scene",
            Environment::Creative => "creative",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One story session.
pub struct Scene {
    pub name: String,
    pub title: String,
    /// Overview of the scenario.
    pub description: String,
    pub intro: String,
    /// Content context, e.g. the genre.
    pub context: String,
    pub game_state: Value,

    environment: Environment,
    actors: Vec<Actor>,
    inactive_characters: BTreeMap<String, Character>,
    history: HistoryStore,

    agents: Agents,
    input: Arc<dyn InputSource>,
    counter: Arc<dyn TokenCounter>,
    config: GameConfig,
    events: EventSink,
    cancel: CancelToken,

    save_dir: PathBuf,
    filename: Option<String>,
    restore_from: Option<String>,
    memory_id: MemoryId,
    memory_session_id: MemorySessionId,
    saved_memory_session_id: Option<MemorySessionId>,
    saved: bool,
    /// Saving always creates a copy instead of overwriting.
    immutable_save: bool,

    active: bool,
    next_actor: Option<String>,
    skip_to_player: bool,
    signal_game_loop: bool,
    most_recent_ai_actor: Option<String>,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("environment", &self.environment)
            .field("actors", &self.character_names())
            .field("messages", &self.history.len())
            .field("filename", &self.filename)
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}

impl Scene {
    pub fn new(agents: Agents, input: Arc<dyn InputSource>) -> Self {
        let events = EventSink::new();
        Self {
            name: String::new(),
            title: String::new(),
            description: String::new(),
            intro: String::new(),
            context: String::new(),
            game_state: Value::Object(Map::new()),
            environment: Environment::Scene,
            actors: Vec::new(),
            inactive_characters: BTreeMap::new(),
            history: HistoryStore::new().with_events(events.clone()),
            agents,
            input,
            counter: Arc::new(ApproximateTokenCounter),
            config: GameConfig::default(),
            events,
            cancel: CancelToken::new(),
            save_dir: PathBuf::from("."),
            filename: None,
            restore_from: None,
            memory_id: MemoryId::new(),
            memory_session_id: MemorySessionId::new(),
            saved_memory_session_id: None,
            saved: false,
            immutable_save: false,
            active: false,
            next_actor: None,
            skip_to_player: false,
            signal_game_loop: true,
            most_recent_ai_actor: None,
        }
    }

    pub fn with_config(mut self, config: GameConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory saves are written to and restored from.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_intro(mut self, intro: impl Into<String>) -> Self {
        self.intro = intro.into();
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Replace the history, keeping this scene's event channel.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = history.with_events(self.events.clone());
        self
    }

    // ---- accessors ----

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: Option<String>) {
        self.filename = filename;
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Save to restore from on [`Scene::restore`].
    pub fn set_restore_from(&mut self, filename: impl Into<String>) {
        self.restore_from = Some(filename.into());
    }

    pub fn memory_id(&self) -> MemoryId {
        self.memory_id
    }

    pub fn memory_session_id(&self) -> MemorySessionId {
        self.memory_session_id
    }

    pub fn saved_memory_session_id(&self) -> Option<MemorySessionId> {
        self.saved_memory_session_id
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn set_immutable_save(&mut self, immutable: bool) {
        self.immutable_save = immutable;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_actor(&self) -> Option<&str> {
        self.next_actor.as_deref()
    }

    /// Make `name` the only non-player actor to speak until the next
    /// interruption.
    pub fn set_next_actor(&mut self, name: Option<String>) {
        self.next_actor = name;
    }

    pub fn skip_to_player(&self) -> bool {
        self.skip_to_player
    }

    pub fn most_recent_ai_actor(&self) -> Option<&str> {
        self.most_recent_ai_actor.as_deref()
    }

    pub fn auto_save(&self) -> bool {
        self.config.auto_save()
    }

    pub fn auto_progress(&self) -> bool {
        self.config.auto_progress()
    }

    /// A clone of the scene's cancellation token, for interrupting from
    /// another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the pending generation to stop.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    // ---- roster ----

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.actors.iter().map(|a| &a.character)
    }

    pub fn character_names(&self) -> Vec<String> {
        self.characters().map(|c| c.name.clone()).collect()
    }

    pub fn npc_names(&self) -> Vec<String> {
        self.actors
            .iter()
            .filter(|a| !a.is_player())
            .map(|a| a.name().to_string())
            .collect()
    }

    pub fn has_active_npcs(&self) -> bool {
        self.actors.iter().any(|a| !a.is_player())
    }

    pub fn player_character(&self) -> Option<&Character> {
        self.actors
            .iter()
            .find(|a| a.is_player())
            .map(|a| &a.character)
    }

    pub fn inactive_characters(&self) -> &BTreeMap<String, Character> {
        &self.inactive_characters
    }

    /// Park a character outside the active roster.
    pub fn add_inactive_character(&mut self, character: Character) {
        self.inactive_characters.insert(character.name.clone(), character);
    }

    /// Add an actor.
    ///
    /// A player becomes the main character and everyone learns its name.
    /// The first non-player actor also seeds the scene's intro, context,
    /// description and name where those are unset.
    pub async fn add_actor(&mut self, actor: Actor) -> SceneResult<()> {
        info!(name = actor.name(), player = actor.is_player(), "add_actor");
        let is_player = actor.is_player();
        self.actors.push(actor);
        let idx = self.actors.len() - 1;

        if let Some(main) = self.player_character().map(|c| c.name.clone()) {
            for actor in self.actors.iter_mut().filter(|a| !a.is_player()) {
                actor.character.introduce_main_character(&main);
            }
        }

        if !is_player {
            let character = &self.actors[idx].character;
            if self.context.is_empty() {
                if let Some(context) = character.base_attributes.get("scenario_context") {
                    self.context = context.clone();
                }
            }
            if self.intro.is_empty() && !character.greeting_text.is_empty() {
                self.intro = character.greeting_text.clone();
            }
            if let Some(overview) = character.base_attributes.get("scenario overview") {
                self.description = overview.clone();
            }
            if self.name.is_empty() || self.name.eq_ignore_ascii_case("new scenario") {
                self.name = character.name.clone();
                self.emit_status(false);
            }
        }

        self.commit_character(idx).await
    }

    /// Remove an actor by name, returning it.
    pub fn remove_actor(&mut self, name: &str) -> Option<Actor> {
        let idx = self.actors.iter().position(|a| a.name() == name)?;
        info!(name, "remove_actor");
        Some(self.actors.remove(idx))
    }

    /// Remove a character from the roster and from the inactive list.
    pub fn remove_character(&mut self, name: &str) -> bool {
        let active = self.remove_actor(name).is_some();
        let inactive = self.inactive_characters.remove(name).is_some();
        active || inactive
    }

    /// Look up a character by name (ignoring case), inactive ones first.
    ///
    /// With `partial`, either name may contain the other.
    pub fn get_character(&self, name: &str, partial: bool) -> Option<&Character> {
        if name.is_empty() {
            return None;
        }
        if let Some(character) = self.inactive_characters.get(name) {
            return Some(character);
        }

        let needle = name.to_lowercase();
        self.characters().find(|c| {
            let candidate = c.name.to_lowercase();
            if partial {
                candidate.contains(&needle) || needle.contains(&candidate)
            } else {
                candidate == needle
            }
        })
    }

    pub(crate) fn actor_index(&self, name: &str) -> Option<usize> {
        let needle = name.to_lowercase();
        self.actors
            .iter()
            .position(|a| a.name().to_lowercase() == needle)
    }

    pub(crate) fn player_index(&self) -> Option<usize> {
        self.actors.iter().position(Actor::is_player)
    }

    /// Characters mentioned by name in `text`, shortest name first.
    pub fn parse_characters_from_text(&self, text: &str, exclude_active: bool) -> Vec<&Character> {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let mentioned = |c: &&Character| {
            let name = c.name.to_lowercase();
            text.match_indices(&name).any(|(at, _)| {
                let before = text[..at].chars().next_back();
                let after = text[at + name.len()..].chars().next();
                !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
            })
        };

        let mut found: Vec<&Character> = Vec::new();
        if !exclude_active {
            found.extend(self.characters().filter(mentioned));
        }
        found.extend(self.inactive_characters.values().filter(mentioned));
        found.sort_by_key(|c| c.name.len());
        found
    }

    // ---- history ----

    /// Append messages and mark the scene unsaved.
    pub fn push_history(&mut self, messages: impl IntoIterator<Item = Message>) -> SceneResult<Vec<MessageId>> {
        let ids = self.history.append(messages)?;
        self.saved = false;
        Ok(ids)
    }

    pub fn edit_message(&mut self, id: MessageId, text: impl Into<String>) -> SceneResult<()> {
        if !self.history.edit(id, text) {
            return Err(SceneError::UnknownMessage(id));
        }
        self.saved = false;
        Ok(())
    }

    /// Delete a message. Deleting a time passage re-syncs the clock and
    /// publishes a fresh status.
    pub fn delete_message(&mut self, id: MessageId) -> SceneResult<Message> {
        let removed = self.history.delete(id).ok_or(SceneError::UnknownMessage(id))?;
        self.saved = false;
        if removed.is(MessageKind::TimePassage) {
            self.emit_status(false);
        }
        Ok(removed)
    }

    /// Token count of the whole history.
    pub fn history_length(&self) -> usize {
        self.history
            .messages()
            .iter()
            .map(|m| self.counter.count(&m.text))
            .sum()
    }

    pub fn count_character_messages(&self, name: &str) -> usize {
        self.history.count(Some(MessageKind::Character), Some(name))
    }

    /// Record that `actor` spoke `messages`.
    pub fn process_npc_dialogue(&mut self, actor: &str, messages: &[Message]) {
        self.saved = false;
        self.most_recent_ai_actor = Some(actor.to_string());
        for message in messages {
            self.events.publish(SceneEvent::Character {
                message: message.clone(),
                character: actor.to_string(),
            });
        }
    }

    // ---- time ----

    pub fn advance_time(&mut self, ts: IsoDuration) -> SceneResult<()> {
        self.history.advance_time(ts)?;
        self.emit_status(false);
        Ok(())
    }

    pub fn sync_time(&mut self) -> SceneResult<IsoDuration> {
        let ts = self.history.sync_time()?;
        self.emit_status(false);
        Ok(ts)
    }

    pub fn fix_time(&mut self) -> IsoDuration {
        let ts = self.history.fix_time();
        self.emit_status(false);
        ts
    }

    // ---- context ----

    /// The scene intro with `{{user}}` and `{{char}}` replaced by the
    /// player's name. `intro` overrides the scene's own.
    pub fn get_intro(&self, intro: Option<&str>) -> String {
        let intro = intro.unwrap_or(&self.intro);
        match self.player_character() {
            Some(player) => intro
                .replace("{{user}}", &player.name)
                .replace("{{char}}", &player.name),
            None => intro.to_string(),
        }
    }

    /// A context request seeded from config and this scene.
    pub fn context_request(&self) -> ContextRequest {
        let mut request = self.config.context_request().with_intro(self.get_intro(None));
        if let Some(player) = self.player_character() {
            request = request.with_player_name(player.name.clone());
        }
        if let Some(npc) = self.actors.iter().find(|a| !a.is_player()) {
            request = request.with_char_name(npc.name().to_string());
        }
        request
    }

    /// Assemble a context window over the history.
    pub fn context_history(&self, request: &ContextRequest) -> BuiltContext {
        build_context(&self.history, request, self.counter.as_ref())
    }

    /// The recent dialogue within `budget`, condensed by the summarizer.
    ///
    /// Empty when no summarizer is configured.
    pub async fn summarized_dialogue_history(&self, budget: usize, min_dialogue: usize) -> SceneResult<String> {
        let Some(summarizer) = self.agents.summarizer().cloned() else {
            return Ok(String::new());
        };

        let request = self
            .context_request()
            .with_context_share(0.0)
            .with_min_tokens_for_intro(0)
            .with_assured_dialogue(min_dialogue);
        let request = ContextRequest { budget, ..request };
        let dialogue = self.context_history(&request).dialogue.join("\n");

        let summary = summarizer.summarize(&dialogue, &self.cancel).await?;
        self.cancel.check()?;
        Ok(summary)
    }

    // ---- status ----

    /// A scene can auto save once it has a filename and is not
    /// copy-on-save.
    pub fn can_auto_save(&self) -> bool {
        self.filename.is_some() && !self.immutable_save
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
        self.emit_status(false);
    }

    pub fn status(&self, restored: bool) -> SceneStatus {
        let clock = self.history.clock();
        SceneStatus {
            name: if self.title.is_empty() {
                self.name.clone()
            } else {
                self.title.clone()
            },
            filename: self.filename.clone(),
            environment: self.environment.as_str().to_string(),
            player_character_name: self.player_character().map(|c| c.name.clone()),
            characters: self.character_names(),
            inactive_characters: self.inactive_characters.keys().cloned().collect(),
            scene_time: (!clock.is_zero()).then(|| clock.to_human("", "")),
            saved: self.saved,
            auto_save: self.auto_save(),
            auto_progress: self.auto_progress(),
            can_auto_save: self.can_auto_save(),
            restored,
            game_state: self.game_state.clone(),
        }
    }

    /// Publish a status snapshot.
    pub fn emit_status(&self, restored: bool) {
        let status = self.status(restored);
        debug!(
            scene = %self.name,
            scene_time = %self.history.clock(),
            human_ts = ?status.scene_time,
            saved = self.saved,
            "scene_status"
        );
        self.events.publish(SceneEvent::SceneStatus(Box::new(status)));
    }

    // ---- memory ----

    fn set_new_memory_session_id(&mut self) {
        self.saved_memory_session_id = Some(self.memory_session_id);
        self.memory_session_id = MemorySessionId::new();
        debug!(
            saved_memory_session_id = ?self.saved_memory_session_id,
            memory_session_id = ?self.memory_session_id,
            "set_new_memory_session_id"
        );
        self.emit_status(false);
    }

    /// Commit one actor's character to memory if it changed.
    pub(crate) async fn commit_character(&mut self, idx: usize) -> SceneResult<()> {
        let Some(memory) = self.agents.memory().cloned() else {
            self.actors[idx].character.memory_dirty = false;
            return Ok(());
        };
        let items = self.actors[idx].character.memory_items();
        if !items.is_empty() {
            memory.add_many(&self.memory_id, items).await?;
        }
        self.actors[idx].character.memory_dirty = false;
        Ok(())
    }

    /// Rebuild long term memory from the archive and the characters.
    pub async fn commit_to_memory(&mut self) -> SceneResult<()> {
        let Some(memory) = self.agents.memory().cloned() else {
            return Ok(());
        };
        memory.reset(&self.memory_id).await?;

        let mut items: Vec<MemoryItem> = self
            .history
            .archived()
            .iter()
            .map(|entry| {
                let ts = entry.ts.unwrap_or(IsoDuration::from_time(chrono::TimeDelta::seconds(1)));
                let mut meta = Map::new();
                meta.insert("typ".into(), json!("history"));
                meta.insert("ts".into(), json!(ts.to_string()));
                MemoryItem {
                    text: entry.text.clone(),
                    id: None,
                    meta,
                }
            })
            .collect();
        for actor in &self.actors {
            items.extend(actor.character.memory_items());
        }
        if !items.is_empty() {
            memory.add_many(&self.memory_id, items).await?;
        }
        for actor in &mut self.actors {
            actor.character.memory_dirty = false;
        }
        Ok(())
    }

    /// Move to a fresh memory store and recommit everything to it.
    pub async fn reset_memory(&mut self) -> SceneResult<()> {
        self.memory_id = MemoryId::new();
        self.commit_to_memory().await?;
        self.set_new_memory_session_id();
        Ok(())
    }

    /// Clear the live history and the filename, keeping the backstory.
    pub fn reset(&mut self) {
        info!(scene = %self.name, "reset");
        self.history.reset();
        self.filename = None;
    }
}
