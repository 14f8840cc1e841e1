//! Scene messages.
//!
//! A [`Message`] is one unit of narrative content in the scene history. All
//! messages share an id, their text, a provenance `source`, optional
//! regeneration metadata and flags; the [`MessageBody`] carries what is
//! specific to each kind.

use crate::clock::IsoDuration;
use crate::error::HistoryError;
use crate::id::MessageId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Default action tag for director messages.
pub const ACTOR_INSTRUCTION: &str = "actor_instruction";

const DIRECTOR_PREFIX: &str = "Director instructs ";
const PROGRESS_PREFIX: &str = "To progress the scene, i want you to ";

static YOURSELF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\byourself\b").expect("valid regex"));
static YOUR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\byour\b").expect("valid regex"));
static YOU: Lazy<Regex> = Lazy::new(|| Regex::new(r"\byou\b").expect("valid regex"));

/// Message flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Hidden messages stay in history but never reach a prompt.
    pub const HIDDEN: Flags = Flags(1);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// How dialogue is laid out when rendered into a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFormat {
    #[default]
    Chat,
    MovieScript,
}

/// How director instructions are phrased when shown to an actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    #[default]
    Direction,
    InternalMonologue,
}

/// Where a message came from, for regeneration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,

    /// Anything else attached with [`Message::set_meta`].
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageMeta {
    fn is_empty(&self) -> bool {
        self.agent.is_none()
            && self.function.is_none()
            && self.arguments.is_empty()
            && self.extra.is_empty()
    }
}

/// Kind-specific payload, tagged by `typ` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum MessageBody {
    /// Untyped scene text.
    Scene,

    /// A line of dialogue, `"Name: text"`.
    Character {
        /// The generated choice this line was produced from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_choice: Option<String>,
    },

    Narrator,

    Director {
        #[serde(default = "default_action")]
        action: String,
    },

    /// Advances the scene clock by `ts`.
    #[serde(rename = "time")]
    TimePassage { ts: IsoDuration },

    /// A world-state note; `source` is `"question:character"`.
    Reinforcement,

    ContextInvestigation {
        #[serde(default)]
        sub_type: Option<String>,
    },
}

fn default_action() -> String {
    ACTOR_INSTRUCTION.to_string()
}

/// The closed set of message kinds, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Scene,
    Character,
    Narrator,
    Director,
    #[serde(rename = "time")]
    TimePassage,
    Reinforcement,
    ContextInvestigation,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Scene => "scene",
            MessageKind::Character => "character",
            MessageKind::Narrator => "narrator",
            MessageKind::Director => "director",
            MessageKind::TimePassage => "time",
            MessageKind::Reinforcement => "reinforcement",
            MessageKind::ContextInvestigation => "context_investigation",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene" => Ok(MessageKind::Scene),
            "character" => Ok(MessageKind::Character),
            "narrator" => Ok(MessageKind::Narrator),
            "director" => Ok(MessageKind::Director),
            "time" => Ok(MessageKind::TimePassage),
            "reinforcement" => Ok(MessageKind::Reinforcement),
            "context_investigation" => Ok(MessageKind::ContextInvestigation),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// One entry of the scene history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: MessageId,

    #[serde(rename = "message")]
    pub text: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub flags: Flags,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MessageMeta>,

    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    fn with_body(text: impl Into<String>, source: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: MessageId::UNASSIGNED,
            text: text.into(),
            source: source.into(),
            flags: Flags::NONE,
            meta: None,
            body,
        }
    }

    /// Plain scene text.
    pub fn scene(text: impl Into<String>) -> Self {
        Self::with_body(text, "", MessageBody::Scene)
    }

    /// A generated line of dialogue (`source = "ai"`).
    pub fn character(text: impl Into<String>) -> Self {
        Self::with_body(text, "ai", MessageBody::Character { from_choice: None })
    }

    /// A line typed by the player (`source = "player"`).
    pub fn player(text: impl Into<String>) -> Self {
        Self::with_body(text, "player", MessageBody::Character { from_choice: None })
    }

    /// Narration (`source = "progress_story"`).
    pub fn narrator(text: impl Into<String>) -> Self {
        Self::with_body(text, "progress_story", MessageBody::Narrator)
    }

    /// A director instruction. `source` is usually the targeted character.
    pub fn director(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_body(
            text,
            source,
            MessageBody::Director {
                action: default_action(),
            },
        )
    }

    /// A time skip. `text` is the narrative shown for it.
    pub fn time_passage(ts: IsoDuration, text: impl Into<String>) -> Self {
        Self::with_body(text, "manual", MessageBody::TimePassage { ts })
    }

    /// A world-state answer for `character` to `question`.
    pub fn reinforcement(text: impl Into<String>, question: &str, character: &str) -> Self {
        Self::with_body(
            text,
            format!("{question}:{character}"),
            MessageBody::Reinforcement,
        )
    }

    /// The result of a context investigation.
    pub fn context_investigation(text: impl Into<String>, sub_type: Option<String>) -> Self {
        Self::with_body(text, "ai", MessageBody::ContextInvestigation { sub_type })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    /// Set the choice tag on a character message. No effect on other kinds.
    pub fn with_from_choice(mut self, choice: impl Into<String>) -> Self {
        if let MessageBody::Character { from_choice } = &mut self.body {
            *from_choice = Some(choice.into());
        }
        self
    }

    /// Set the action tag on a director message. No effect on other kinds.
    pub fn with_action(mut self, new_action: impl Into<String>) -> Self {
        if let MessageBody::Director { action } = &mut self.body {
            *action = new_action.into();
        }
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hide();
        self
    }

    pub fn kind(&self) -> MessageKind {
        match &self.body {
            MessageBody::Scene => MessageKind::Scene,
            MessageBody::Character { .. } => MessageKind::Character,
            MessageBody::Narrator => MessageKind::Narrator,
            MessageBody::Director { .. } => MessageKind::Director,
            MessageBody::TimePassage { .. } => MessageKind::TimePassage,
            MessageBody::Reinforcement => MessageKind::Reinforcement,
            MessageBody::ContextInvestigation { .. } => MessageKind::ContextInvestigation,
        }
    }

    pub fn is(&self, kind: MessageKind) -> bool {
        self.kind() == kind
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(Flags::HIDDEN)
    }

    pub fn hide(&mut self) {
        self.flags.insert(Flags::HIDDEN);
    }

    pub fn unhide(&mut self) {
        self.flags.remove(Flags::HIDDEN);
    }

    /// Semantic length: number of characters of content.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Stable content hash, 16 hex characters.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.text.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(16);
        hex
    }

    /// Record the agent call that produced this message.
    pub fn set_source(
        &mut self,
        agent: impl Into<String>,
        function: impl Into<String>,
        arguments: Map<String, Value>,
    ) {
        let meta = self.meta.get_or_insert_with(MessageMeta::default);
        meta.agent = Some(agent.into());
        meta.function = Some(function.into());
        meta.arguments = arguments;
    }

    /// Attach an arbitrary metadata value.
    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta
            .get_or_insert_with(MessageMeta::default)
            .extra
            .insert(key.into(), value);
    }

    pub fn source_agent(&self) -> Option<&str> {
        self.meta.as_ref()?.agent.as_deref()
    }

    pub fn source_function(&self) -> Option<&str> {
        self.meta.as_ref()?.function.as_deref()
    }

    pub fn source_arguments(&self) -> Map<String, Value> {
        self.meta
            .as_ref()
            .map(|m| m.arguments.clone())
            .unwrap_or_default()
    }

    /// Drop metadata that carries nothing.
    pub(crate) fn compact_meta(&mut self) {
        if self.meta.as_ref().is_some_and(MessageMeta::is_empty) {
            self.meta = None;
        }
    }

    /// For dialogue the speaking character, otherwise `source`.
    pub fn secondary_source(&self) -> String {
        match &self.body {
            MessageBody::Character { .. } => self.character_name().unwrap_or_default(),
            _ => self.source.clone(),
        }
    }

    /// The choice tag of a character message.
    pub fn from_choice(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Character { from_choice } => from_choice.as_deref(),
            _ => None,
        }
    }

    /// The duration of a time passage message.
    pub fn ts(&self) -> Option<IsoDuration> {
        match &self.body {
            MessageBody::TimePassage { ts } => Some(*ts),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Director { action } => Some(action),
            _ => None,
        }
    }

    fn is_actor_instruction(&self) -> bool {
        self.action() == Some(ACTOR_INSTRUCTION)
    }

    /// The character a message is about.
    ///
    /// Speaker for dialogue, target for actor instructions and the
    /// subject of a reinforcement. Director messages without a
    /// `Name:` target have none.
    pub fn character_name(&self) -> Option<String> {
        match &self.body {
            MessageBody::Character { .. } => self
                .text
                .split_once(':')
                .map(|(name, _)| name.to_string()),
            MessageBody::Director { .. } if self.is_actor_instruction() => self
                .transformed_message()
                .split_once(':')
                .map(|(name, _)| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            MessageBody::Reinforcement => self
                .source
                .split(':')
                .nth(1)
                .map(str::to_string),
            _ => None,
        }
    }

    /// Dialogue without the `Name:` prefix.
    pub fn without_name(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Character { .. } => self.text.split_once(':').map(|(_, rest)| rest),
            _ => None,
        }
    }

    /// Dialogue with speaker, quotes and emphasis removed. Other kinds
    /// return their text unchanged.
    pub fn raw(&self) -> String {
        match self.without_name() {
            Some(rest) => rest.replace(['"', '*'], "").trim().to_string(),
            None => self.text.clone(),
        }
    }

    /// Director text without the `"Director instructs "` prefix.
    pub fn transformed_message(&self) -> String {
        self.text.replace(DIRECTOR_PREFIX, "")
    }

    /// The part of a director instruction after the target name.
    pub fn director_dialogue(&self) -> Option<String> {
        match &self.body {
            MessageBody::Director { .. } if self.is_actor_instruction() => Some(
                self.transformed_message()
                    .split_once(':')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_default(),
            ),
            MessageBody::Director { .. } => Some(self.text.clone()),
            _ => None,
        }
    }

    /// Director instruction stripped of quotes and boilerplate.
    pub fn instructions(&self) -> Option<String> {
        let dialogue = self.director_dialogue()?;
        if self.is_actor_instruction() {
            Some(
                dialogue
                    .replace('"', "")
                    .replace(PROGRESS_PREFIX, "")
                    .trim()
                    .to_string(),
            )
        } else {
            Some(dialogue)
        }
    }

    /// `"Name's next action: ..."`.
    pub fn as_story_progression(&self) -> Option<String> {
        let instructions = self.instructions()?;
        let name = self.character_name().unwrap_or_default();
        Some(format!("{name}'s next action: {instructions}"))
    }

    /// The instruction rephrased as the target's own thought.
    ///
    /// Second person is turned into first person word by word, so odd
    /// phrasing can come out.
    pub fn as_inner_monologue(&self) -> Option<String> {
        let instructions = self.instructions()?.to_lowercase();

        let Some(name) = self.character_name() else {
            return Some(instructions);
        };

        let instructions = YOURSELF.replace_all(&instructions, "myself");
        let instructions = YOUR.replace_all(&instructions, "my");
        let instructions = YOU.replace_all(&instructions, "i");

        Some(format!("{name} thinks: I should {instructions}"))
    }

    /// The question half of a reinforcement source.
    pub fn reinforcement_question(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Reinforcement => self.source.split(':').next(),
            _ => None,
        }
    }

    pub fn sub_type(&self) -> Option<&str> {
        match &self.body {
            MessageBody::ContextInvestigation { sub_type } => sub_type.as_deref(),
            _ => None,
        }
    }

    fn argument_str(&self, key: &str, default: &str) -> String {
        self.meta
            .as_ref()
            .and_then(|m| m.arguments.get(key))
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Display title of a context investigation, derived from its sub type.
    pub fn investigation_title(&self) -> Option<String> {
        let MessageBody::ContextInvestigation { sub_type } = &self.body else {
            return None;
        };
        let title = match sub_type.as_deref() {
            Some("visual-character") => format!(
                "Visual description of {} in the current moment",
                self.argument_str("character", "character")
            ),
            Some("visual-scene") => "Visual description of the current moment".to_string(),
            Some("query") => format!("Query: {}", self.argument_str("query", "query")),
            _ => "Internal note".to_string(),
        };
        Some(title)
    }

    /// Check the shape a kind requires before the message enters history.
    pub fn validate(&self) -> Result<(), HistoryError> {
        match &self.body {
            MessageBody::Character { .. } => match self.text.split_once(':') {
                Some((name, _)) if !name.trim().is_empty() => Ok(()),
                _ => Err(HistoryError::MissingSpeaker {
                    id: self.id,
                    text: self.text.clone(),
                }),
            },
            MessageBody::Reinforcement => match self.source.split_once(':') {
                Some((question, character))
                    if !question.is_empty() && !character.is_empty() =>
                {
                    Ok(())
                }
                _ => Err(HistoryError::MalformedReinforcement {
                    got: self.source.clone(),
                }),
            },
            _ => Ok(()),
        }
    }

    /// Render for a prompt in the given layout.
    pub fn as_format(&self, format: ConversationFormat, mode: DirectionMode) -> String {
        let script = format == ConversationFormat::MovieScript;
        match &self.body {
            MessageBody::Character { .. } if script => {
                let name = self.character_name().unwrap_or_default();
                let line = self.without_name().unwrap_or(&self.text).trim();
                format!("\n{}\n{}\nEND-OF-LINE\n", name.to_uppercase(), line)
            }
            MessageBody::Director { .. } => {
                let body = match mode {
                    DirectionMode::InternalMonologue => self.as_inner_monologue(),
                    DirectionMode::Direction => self.as_story_progression(),
                }
                .unwrap_or_default();
                if script {
                    format!("\n({body})\n")
                } else {
                    format!("# {body}")
                }
            }
            MessageBody::Reinforcement | MessageBody::ContextInvestigation { .. } => {
                let rendered = if script {
                    let display = self.to_string();
                    let display = display.strip_prefix("# ").unwrap_or(&display);
                    format!("\n({display})\n")
                } else {
                    format!("\n{}\n", self.text)
                };
                if self.is(MessageKind::ContextInvestigation) {
                    rendered.replace('*', "")
                } else {
                    rendered
                }
            }
            _ if script => format!("{}\n", self.text.trim_end_matches('\n')),
            _ => self.text.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            MessageBody::Director { .. } => f.write_str(
                &self.as_format(ConversationFormat::Chat, DirectionMode::Direction),
            ),
            MessageBody::Reinforcement => write!(
                f,
                "# Internal note for {} - {}\n{}",
                self.character_name().unwrap_or_default(),
                self.reinforcement_question().unwrap_or_default(),
                self.text
            ),
            MessageBody::ContextInvestigation { .. } => write!(
                f,
                "# {}: {}",
                self.investigation_title().unwrap_or_default(),
                self.text
            ),
            _ => f.write_str(&self.text),
        }
    }
}
