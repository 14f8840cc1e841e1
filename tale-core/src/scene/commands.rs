//! `!command` handling shared by both loops.

use super::{Environment, SaveMode, Scene};
use crate::error::{AgentError, LoopSignal, SceneError, SceneResult};
use crate::events::{SceneEvent, StatusLevel};
use crate::id::MessageId;
use std::str::FromStr;
use tracing::{info, warn};

/// A player command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rerun,
    Save,
    SaveAs(String),
    FixTime,
    SyncTime,
    Delete(MessageId),
    SetEnvCreative,
    SetEnvScene,
    Exit,
    Restart,
    Reset,
}

/// Whether `text` is a command rather than dialogue.
pub fn is_command(text: &str) -> bool {
    text.starts_with('!')
}

impl FromStr for Command {
    type Err = SceneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('!').unwrap_or(s);
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (s, None),
        };
        let unknown = || SceneError::UnknownCommand(s.to_string());

        let command = match (name.to_lowercase().as_str(), arg) {
            ("rerun" | "rr", None) => Command::Rerun,
            ("save", None) => Command::Save,
            ("save_as", Some(filename)) if !filename.is_empty() => Command::SaveAs(filename.to_string()),
            ("fix_time", None) => Command::FixTime,
            ("sync_time", None) => Command::SyncTime,
            ("delete" | "del", Some(id)) => {
                let id = id.parse::<u64>().map_err(|_| unknown())?;
                Command::Delete(MessageId::new(id))
            }
            ("setenv_creative", None) => Command::SetEnvCreative,
            ("setenv_scene", None) => Command::SetEnvScene,
            ("exit", None) => Command::Exit,
            ("restart", None) => Command::Restart,
            ("reset", None) => Command::Reset,
            _ => return Err(unknown()),
        };
        Ok(command)
    }
}

impl Scene {
    /// Run `input` as a command. Returns `false` when it is not one.
    ///
    /// Changing the environment, exiting, restarting and resetting return
    /// the matching loop signal as an error so it unwinds to
    /// [`Scene::start`].
    pub async fn execute(&mut self, input: &str) -> SceneResult<bool> {
        if !is_command(input) {
            return Ok(false);
        }

        let command = match input.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                warn!(input, "unknown command");
                self.events
                    .publish(SceneEvent::status(StatusLevel::Warning, e.to_string()));
                return Ok(true);
            }
        };
        info!(command = ?command, "execute");

        match command {
            Command::Rerun => {
                self.rerun().await?;
            }
            Command::Save => {
                self.save(SaveMode::Manual).await?;
            }
            Command::SaveAs(filename) => {
                self.save(SaveMode::SaveAs(filename)).await?;
            }
            Command::FixTime => {
                self.fix_time();
            }
            Command::SyncTime => {
                self.sync_time()?;
            }
            Command::Delete(id) => {
                self.delete_message(id)?;
            }
            Command::SetEnvCreative => {
                self.set_environment(Environment::Creative);
                return Err(AgentError::Interrupt(LoopSignal::Restart).into());
            }
            Command::SetEnvScene => {
                self.set_environment(Environment::Scene);
                return Err(AgentError::Interrupt(LoopSignal::Restart).into());
            }
            Command::Exit => {
                self.active = false;
                return Err(AgentError::Interrupt(LoopSignal::Exit).into());
            }
            Command::Restart => {
                return Err(AgentError::Interrupt(LoopSignal::Restart).into());
            }
            Command::Reset => {
                self.reset();
                return Err(AgentError::Interrupt(LoopSignal::Reset).into());
            }
        }
        Ok(true)
    }
}
