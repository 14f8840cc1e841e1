//! Generation capabilities the scene depends on.
//!
//! Each capability is a narrow async trait. A scene holds whichever ones
//! are configured in an [`Agents`] bundle and asks for them by role; a
//! missing capability is a domain error at the call site, not a panic.

use crate::actor::Character;
use crate::cancel::CancelToken;
use crate::error::{AgentError, AgentResult};
use crate::id::MemoryId;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Everything the conversation agent needs to voice one character.
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    pub character: Character,
    /// Names of the other actors in the scene.
    pub other_characters: Vec<String>,
    pub instruction: Option<String>,
    /// Produce the line without it being treated as a turn.
    pub only_generate: bool,
}

impl ConverseRequest {
    pub fn new(character: Character) -> Self {
        Self {
            character,
            other_characters: Vec::new(),
            instruction: None,
            only_generate: false,
        }
    }

    pub fn with_others(mut self, names: Vec<String>) -> Self {
        self.other_characters = names;
        self
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        self.instruction = instruction;
        self
    }

    pub fn generate_only(mut self) -> Self {
        self.only_generate = true;
        self
    }
}

/// Produces dialogue for a character.
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    async fn converse(&self, request: ConverseRequest, cancel: &CancelToken) -> AgentResult<Vec<Message>>;
}

/// What a narrator message narrates. Stored on the message as
/// `kind` or `kind:argument`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narration {
    ProgressStory(Option<String>),
    Scene,
    Character(String),
    Query(String),
    Dialogue(String),
    CharacterEntry(String),
    CharacterExit(String),
    /// Narration requested by the director.
    Director,
    Paraphrase(String),
}

impl Narration {
    /// The `source` a message produced by this narration carries.
    pub fn source(&self) -> String {
        let (kind, arg) = self.parts();
        match arg {
            Some(arg) => format!("{kind}:{arg}"),
            None => kind.to_string(),
        }
    }

    fn parts(&self) -> (&'static str, Option<&str>) {
        match self {
            Narration::ProgressStory(arg) => ("progress_story", arg.as_deref()),
            Narration::Scene => ("narrate_scene", None),
            Narration::Character(name) => ("narrate_character", Some(name.as_str())),
            Narration::Query(query) => ("narrate_query", Some(query.as_str())),
            Narration::Dialogue(name) => ("narrate_dialogue", Some(name.as_str())),
            Narration::CharacterEntry(name) => ("narrate_character_entry", Some(name.as_str())),
            Narration::CharacterExit(name) => ("narrate_character_exit", Some(name.as_str())),
            Narration::Director => ("__director__", None),
            Narration::Paraphrase(text) => ("paraphrase", Some(text.as_str())),
        }
    }

    /// The character this narration is about, if any.
    pub fn character(&self) -> Option<&str> {
        match self {
            Narration::Character(name)
            | Narration::Dialogue(name)
            | Narration::CharacterEntry(name)
            | Narration::CharacterExit(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Narration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source())
    }
}

impl FromStr for Narration {
    type Err = AgentError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match source.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg.to_string())),
            None => (source, None),
        };
        let required = |arg: Option<String>| {
            arg.filter(|a| !a.is_empty())
                .ok_or_else(|| AgentError::domain(format!("narration '{kind}' needs an argument")))
        };

        // progress_story variants share the prefix
        if kind.starts_with("progress_story") {
            return Ok(Narration::ProgressStory(arg));
        }

        match kind {
            "narrate_scene" => Ok(Narration::Scene),
            "narrate_character" => Ok(Narration::Character(required(arg)?)),
            "narrate_query" => Ok(Narration::Query(required(arg)?)),
            "narrate_dialogue" => Ok(Narration::Dialogue(required(arg)?)),
            "narrate_character_entry" => Ok(Narration::CharacterEntry(required(arg)?)),
            "narrate_character_exit" => Ok(Narration::CharacterExit(required(arg)?)),
            "__director__" => Ok(Narration::Director),
            "paraphrase" => Ok(Narration::Paraphrase(arg.unwrap_or_default())),
            other => Err(AgentError::domain(format!("unknown narration kind: {other}"))),
        }
    }
}

/// Produces narration.
#[async_trait]
pub trait NarratorAgent: Send + Sync {
    async fn narrate(&self, narration: &Narration, cancel: &CancelToken) -> AgentResult<String>;
}

/// Steers the scene with instructions for a character, or for the scene
/// as a whole when `character` is `None`.
#[async_trait]
pub trait DirectorAgent: Send + Sync {
    async fn direct(&self, character: Option<&Character>, cancel: &CancelToken) -> AgentResult<Option<String>>;
}

/// Answers tracked world-state questions about a character.
#[async_trait]
pub trait WorldStateAgent: Send + Sync {
    async fn update_reinforcement(
        &self,
        question: &str,
        character: &str,
        cancel: &CancelToken,
    ) -> AgentResult<Option<Message>>;
}

/// Looks into the scene on request and reports back as text.
#[async_trait]
pub trait InvestigationAgent: Send + Sync {
    async fn investigate(
        &self,
        function: &str,
        arguments: &Map<String, Value>,
        cancel: &CancelToken,
    ) -> AgentResult<String>;
}

/// A document handed to long term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Long term memory.
#[async_trait]
pub trait MemoryAgent: Send + Sync {
    async fn add_many(&self, memory_id: &MemoryId, items: Vec<MemoryItem>) -> AgentResult<()>;

    /// Drop everything stored under `memory_id`.
    async fn reset(&self, memory_id: &MemoryId) -> AgentResult<()>;
}

/// Condenses text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, cancel: &CancelToken) -> AgentResult<String>;
}

/// What the player is being asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPrompt {
    /// Whose turn it is. `None` for editor commands.
    pub character: Option<String>,
    /// Token count of the history so far.
    pub history_tokens: usize,
}

/// What the player typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerInput {
    pub message: String,
    /// Speak as this character instead, or `$narrator`.
    pub act_as: Option<String>,
    /// The suggested choice this input was picked from.
    pub from_choice: Option<String>,
}

impl PlayerInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn acting_as(mut self, name: impl Into<String>) -> Self {
        self.act_as = Some(name.into());
        self
    }

    pub fn from_choice(mut self, choice: impl Into<String>) -> Self {
        self.from_choice = Some(choice.into());
        self
    }
}

/// Source of player input. `Ok(None)` means nothing was entered.
#[async_trait]
pub trait InputSource: Send + Sync {
    async fn next_input(&self, prompt: InputPrompt, cancel: &CancelToken) -> AgentResult<Option<PlayerInput>>;
}

/// The capabilities available to a scene.
#[derive(Clone, Default)]
pub struct Agents {
    conversation: Option<Arc<dyn ConversationAgent>>,
    narrator: Option<Arc<dyn NarratorAgent>>,
    director: Option<Arc<dyn DirectorAgent>>,
    world_state: Option<Arc<dyn WorldStateAgent>>,
    memory: Option<Arc<dyn MemoryAgent>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    investigators: HashMap<String, Arc<dyn InvestigationAgent>>,
}

impl fmt::Debug for Agents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut investigators: Vec<&String> = self.investigators.keys().collect();
        investigators.sort();
        f.debug_struct("Agents")
            .field("conversation", &self.conversation.is_some())
            .field("narrator", &self.narrator.is_some())
            .field("director", &self.director.is_some())
            .field("world_state", &self.world_state.is_some())
            .field("memory", &self.memory.is_some())
            .field("summarizer", &self.summarizer.is_some())
            .field("investigators", &investigators)
            .finish()
    }
}

fn missing(role: &str) -> AgentError {
    AgentError::domain(format!("no {role} agent configured"))
}

impl Agents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(mut self, agent: Arc<dyn ConversationAgent>) -> Self {
        self.conversation = Some(agent);
        self
    }

    pub fn with_narrator(mut self, agent: Arc<dyn NarratorAgent>) -> Self {
        self.narrator = Some(agent);
        self
    }

    pub fn with_director(mut self, agent: Arc<dyn DirectorAgent>) -> Self {
        self.director = Some(agent);
        self
    }

    pub fn with_world_state(mut self, agent: Arc<dyn WorldStateAgent>) -> Self {
        self.world_state = Some(agent);
        self
    }

    pub fn with_memory(mut self, agent: Arc<dyn MemoryAgent>) -> Self {
        self.memory = Some(agent);
        self
    }

    pub fn with_summarizer(mut self, agent: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(agent);
        self
    }

    /// Register an investigator under the agent name recorded on the
    /// messages it produces.
    pub fn with_investigator(mut self, name: impl Into<String>, agent: Arc<dyn InvestigationAgent>) -> Self {
        self.investigators.insert(name.into(), agent);
        self
    }

    pub fn conversation(&self) -> AgentResult<&Arc<dyn ConversationAgent>> {
        self.conversation.as_ref().ok_or_else(|| missing("conversation"))
    }

    pub fn narrator(&self) -> AgentResult<&Arc<dyn NarratorAgent>> {
        self.narrator.as_ref().ok_or_else(|| missing("narrator"))
    }

    pub fn director(&self) -> AgentResult<&Arc<dyn DirectorAgent>> {
        self.director.as_ref().ok_or_else(|| missing("director"))
    }

    pub fn world_state(&self) -> AgentResult<&Arc<dyn WorldStateAgent>> {
        self.world_state.as_ref().ok_or_else(|| missing("world state"))
    }

    pub fn investigator(&self, name: &str) -> AgentResult<&Arc<dyn InvestigationAgent>> {
        self.investigators
            .get(name)
            .ok_or_else(|| AgentError::domain(format!("no investigator named '{name}'")))
    }

    /// Memory is optional; scenes without it skip memory commits.
    pub fn memory(&self) -> Option<&Arc<dyn MemoryAgent>> {
        self.memory.as_ref()
    }

    pub fn summarizer(&self) -> Option<&Arc<dyn Summarizer>> {
        self.summarizer.as_ref()
    }
}
