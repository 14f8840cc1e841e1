//! Error types for the narrative engine.
//!
//! One `thiserror` enum per concern, joined by [`SceneError`] at the scene
//! level. [`AgentError`] also carries the loop control signals so they travel
//! through the same `?` paths as real failures.

use crate::id::MessageId;
use thiserror::Error;

/// Control-flow signals that escape the per-iteration error boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// Leave the scene loop entirely.
    Exit,
    /// Re-enter the loop without reinitializing the scene.
    Restart,
    /// Clear transient state, then re-enter the loop.
    Reset,
}

/// Errors raised by generation collaborators and the turn loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The user interrupted the pending generation.
    #[error("generation cancelled")]
    Cancelled,

    /// The collaborator produced output that could not be used.
    #[error("generation was not accurate enough: {0}")]
    Accuracy(String),

    /// The backing client for an agent is switched off.
    #[error("client '{client}' is disabled")]
    ClientDisabled { client: String },

    /// A recoverable error in the narrative domain.
    #[error("{0}")]
    Domain(String),

    /// Anything else.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// Loop control signal (exit, restart, reset).
    #[error("loop signal: {0:?}")]
    Interrupt(LoopSignal),
}

impl AgentError {
    /// Shorthand for [`AgentError::Domain`].
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }

    /// Shorthand for [`AgentError::Unexpected`].
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Whether this is the cooperative cancellation condition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<HistoryError> for AgentError {
    fn from(err: HistoryError) -> Self {
        Self::Domain(err.to_string())
    }
}

impl From<DurationError> for AgentError {
    fn from(err: DurationError) -> Self {
        Self::Domain(err.to_string())
    }
}

/// Errors from history mutation.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("character message {id} must be prefixed with the speaker's name: {text:?}")]
    MissingSpeaker { id: MessageId, text: String },

    #[error("reinforcement source must be 'question:character', got {got:?}")]
    MalformedReinforcement { got: String },

    #[error("{lane} end index {end} is before the previous end {previous}")]
    NonMonotonicEnd {
        lane: String,
        end: usize,
        previous: usize,
    },

    #[error("end index {end} is out of range for {len} entries")]
    EndOutOfRange { end: usize, len: usize },

    #[error("layer {layer} does not exist")]
    NoSuchLayer { layer: usize },

    #[error(transparent)]
    Duration(#[from] DurationError),
}

/// Errors from ISO-8601 duration handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid ISO-8601 duration: {0:?}")]
    Invalid(String),

    #[error("duration arithmetic overflowed")]
    Overflow,
}

/// Errors from save/load.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("scene has no filename to save to")]
    NoFilename,
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Scene-level umbrella error.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Duration error: {0}")]
    Duration(#[from] DurationError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no such character: {0}")]
    UnknownCharacter(String),

    #[error("no message with id {0}")]
    UnknownMessage(MessageId),

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Result alias for generation collaborators.
pub type AgentResult<T> = Result<T, AgentError>;

/// Result alias for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;
