//! Interactive narrative engine.
//!
//! This crate provides:
//! - A typed message model and an ordered, id-addressed scene history
//! - Scene clock reconciliation over time-passage messages and summaries
//! - Token-budgeted context window assembly for prompts
//! - A turn-taking controller that drives players and AI characters
//! - Scene persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use tale_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scene = Scene::new(agents, input).with_save_dir("saves");
//!     scene.load("tavern.json").await?;
//!
//!     let window = scene.context_history(&scene.context_request());
//!     println!("{}", window.context.join("\n"));
//!
//!     scene.start().await?;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod agent;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod id;
pub mod logging;
pub mod message;
pub mod persist;
pub mod scene;
pub mod testing;

// Primary public API
pub use actor::{Actor, Character};
pub use agent::{Agents, Narration, PlayerInput};
pub use cancel::CancelToken;
pub use clock::IsoDuration;
pub use config::GameConfig;
pub use context::{build_context, BuiltContext, ContextRequest, TokenCounter};
pub use error::{AgentError, SceneError, SceneResult};
pub use events::{EventSink, SceneEvent};
pub use history::{HistoryStore, MessageFilter};
pub use id::MessageId;
pub use message::{Message, MessageKind};
pub use persist::{list_saves, SavedScene};
pub use scene::{Environment, SaveMode, Scene};
pub use testing::{MockAgent, ScriptedInput, TestHarness};

/// Everything needed to drive a scene.
pub mod prelude {
    pub use crate::actor::{Actor, Character};
    pub use crate::agent::{
        Agents, ConversationAgent, ConverseRequest, DirectorAgent, InputPrompt, InputSource,
        InvestigationAgent, MemoryAgent, MemoryItem, Narration, NarratorAgent, PlayerInput,
        Summarizer, WorldStateAgent,
    };
    pub use crate::cancel::CancelToken;
    pub use crate::clock::IsoDuration;
    pub use crate::config::GameConfig;
    pub use crate::context::{ApproximateTokenCounter, BuiltContext, ContextRequest, TokenCounter};
    pub use crate::error::{AgentError, AgentResult, LoopSignal, SceneError, SceneResult};
    pub use crate::events::{SceneEvent, StatusLevel};
    pub use crate::history::{ArchiveEntry, HistoryStore, LayerEntry, MessageFilter};
    pub use crate::id::MessageId;
    pub use crate::message::{ConversationFormat, DirectionMode, Message, MessageKind};
    pub use crate::scene::{Environment, SaveMode, Scene};
}
