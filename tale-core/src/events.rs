//! Scene notifications.
//!
//! Everything that changes a scene is published on a broadcast channel.
//! Publishing never blocks and never fails: a lagging or missing subscriber
//! only loses events.

use crate::history::ArchiveEntry;
use crate::id::MessageId;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 1024;

/// Severity of a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Snapshot of scene state published after each pass of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneStatus {
    pub name: String,
    pub filename: Option<String>,
    pub environment: String,
    pub player_character_name: Option<String>,
    pub characters: Vec<String>,
    pub inactive_characters: Vec<String>,
    /// Human readable elapsed scene time, if any time has passed.
    pub scene_time: Option<String>,
    pub saved: bool,
    pub auto_save: bool,
    pub auto_progress: bool,
    pub can_auto_save: bool,
    pub restored: bool,
    pub game_state: Value,
}

/// A notification published by a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneEvent {
    HistoryAdd { message: Message },
    ArchiveAdd { entry: ArchiveEntry },
    RemoveMessage { id: MessageId },
    MessageEdited { message: Message },
    Status { level: StatusLevel, message: String },
    System { message: String },
    SceneStatus(Box<SceneStatus>),
    SceneInit,
    ClearScreen,
    GameLoopStart,
    GameLoop,
    GameLoopActorIter { actor: String },
    PlayerTurnStart,
    Character { message: Message, character: String },
    Narrator { message: Message },
    Director { message: Message, character: Option<String> },
    ContextInvestigation { message: Message },
}

impl SceneEvent {
    pub fn status(level: StatusLevel, message: impl Into<String>) -> Self {
        Self::Status {
            level,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SceneEvent::HistoryAdd { .. } => "history_add",
            SceneEvent::ArchiveAdd { .. } => "archive_add",
            SceneEvent::RemoveMessage { .. } => "remove_message",
            SceneEvent::MessageEdited { .. } => "message_edited",
            SceneEvent::Status { .. } => "status",
            SceneEvent::System { .. } => "system",
            SceneEvent::SceneStatus(_) => "scene_status",
            SceneEvent::SceneInit => "scene_init",
            SceneEvent::ClearScreen => "clear_screen",
            SceneEvent::GameLoopStart => "game_loop_start",
            SceneEvent::GameLoop => "game_loop",
            SceneEvent::GameLoopActorIter { .. } => "game_loop_actor_iter",
            SceneEvent::PlayerTurnStart => "player_turn_start",
            SceneEvent::Character { .. } => "character",
            SceneEvent::Narrator { .. } => "narrator",
            SceneEvent::Director { .. } => "director",
            SceneEvent::ContextInvestigation { .. } => "context_investigation",
        }
    }
}

/// Fire-and-forget publisher. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SceneEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to every current subscriber, in publish order.
    pub fn publish(&self, event: SceneEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
