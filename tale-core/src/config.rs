//! Game configuration.
//!
//! Read from TOML:
//!
//! ```toml
//! [game.general]
//! auto_save = true
//! auto_progress = true
//! max_backscroll = 512
//!
//! [game.context]
//! budget = 8192
//! assured_dialogue = 5
//! ```

use crate::context::ContextRequest;
use crate::error::ConfigError;
use crate::message::{ConversationFormat, DirectionMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub game: GameSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSection {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub context: ContextDefaults,
}

/// Turn loop behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Save after every full pass over the actors.
    #[serde(default = "d_true")]
    pub auto_save: bool,
    /// Let non-player actors take their turns without being asked.
    #[serde(default = "d_true")]
    pub auto_progress: bool,
    /// How many messages a front-end keeps on screen.
    #[serde(default = "d_512")]
    pub max_backscroll: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_progress: true,
            max_backscroll: 512,
        }
    }
}

/// Defaults for context window assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDefaults {
    #[serde(default = "d_8192")]
    pub budget: usize,
    #[serde(default = "d_5")]
    pub assured_dialogue: usize,
    #[serde(default = "d_1024")]
    pub min_tokens_for_intro: usize,
    #[serde(default = "d_true")]
    pub layered_history: bool,
    #[serde(default)]
    pub conversation_format: ConversationFormat,
    #[serde(default)]
    pub direction_mode: DirectionMode,
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            budget: 8192,
            assured_dialogue: 5,
            min_tokens_for_intro: 1024,
            layered_history: true,
            conversation_format: ConversationFormat::Chat,
            direction_mode: DirectionMode::Direction,
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_5() -> usize {
    5
}
fn d_512() -> usize {
    512
}
fn d_1024() -> usize {
    1024
}
fn d_8192() -> usize {
    8192
}

impl GameConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `path`, falling back to defaults if it is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Self::default()
        })
    }

    /// Set auto save.
    pub fn with_auto_save(mut self, on: bool) -> Self {
        self.game.general.auto_save = on;
        self
    }

    /// Set auto progress.
    pub fn with_auto_progress(mut self, on: bool) -> Self {
        self.game.general.auto_progress = on;
        self
    }

    pub fn with_max_backscroll(mut self, n: usize) -> Self {
        self.game.general.max_backscroll = n;
        self
    }

    /// Set the default context budget.
    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.game.context.budget = budget;
        self
    }

    pub fn with_conversation_format(mut self, format: ConversationFormat) -> Self {
        self.game.context.conversation_format = format;
        self
    }

    pub fn auto_save(&self) -> bool {
        self.game.general.auto_save
    }

    pub fn auto_progress(&self) -> bool {
        self.game.general.auto_progress
    }

    /// A context request seeded with these defaults.
    pub fn context_request(&self) -> ContextRequest {
        let ctx = &self.game.context;
        ContextRequest::new(ctx.budget)
            .with_assured_dialogue(ctx.assured_dialogue)
            .with_min_tokens_for_intro(ctx.min_tokens_for_intro)
            .with_layered_history(ctx.layered_history)
            .with_format(ctx.conversation_format, ctx.direction_mode)
    }
}
