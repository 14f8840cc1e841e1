//! Regenerating the most recent message.

use super::Scene;
use crate::agent::Narration;
use crate::error::{AgentError, SceneError, SceneResult};
use crate::events::SceneEvent;
use crate::id::MessageId;
use crate::message::{Message, MessageKind};
use tracing::{debug, info, warn};

/// What [`Scene::rerun`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RerunOutcome {
    /// Nothing to rerun.
    Empty,
    /// The last message was typed by the player.
    NotRerunnable,
    /// Messages of this kind cannot be regenerated.
    Unsupported(MessageKind),
    Rerun { replaced: MessageId },
}

/// A message that will be regenerated, decided before anything is removed.
enum Plan {
    PlayerChoice { speaker: usize, choice: String },
    Npc { speaker: usize, instruction: Option<String> },
    DirectorNarration,
    Narration(Narration),
    Director { speaker: Option<usize>, source: String },
    Investigation { message: Message, agent: String, function: String },
}

impl Scene {
    /// Regenerate the most recent message, then any world-state notes that
    /// followed it.
    ///
    /// Player typed lines are left alone. The target and its trailing
    /// reinforcements are removed only once the target is known to be
    /// regenerable.
    pub async fn rerun(&mut self) -> SceneResult<RerunOutcome> {
        let Some(target) = self
            .history
            .messages()
            .iter()
            .rev()
            .find(|m| !m.is(MessageKind::Reinforcement))
            .cloned()
        else {
            return Ok(RerunOutcome::Empty);
        };

        if target.source == "player" && target.from_choice().is_none() {
            self.events
                .publish(SceneEvent::system("Cannot rerun player's message"));
            return Ok(RerunOutcome::NotRerunnable);
        }

        let Some(plan) = self.plan_rerun(&target)? else {
            debug!(kind = %target.kind(), "rerun: unsupported message kind");
            return Ok(RerunOutcome::Unsupported(target.kind()));
        };

        info!(id = %target.id, kind = %target.kind(), "rerun");

        // newest first
        let trailing: Vec<Message> = self
            .history
            .messages()
            .iter()
            .rev()
            .take_while(|m| m.is(MessageKind::Reinforcement))
            .cloned()
            .collect();
        for reinforcement in &trailing {
            self.history.delete(reinforcement.id);
        }
        self.history.delete(target.id);
        self.saved = false;

        self.run_plan(plan).await?;

        if !trailing.is_empty() {
            let agent = self.agents.world_state()?.clone();
            // oldest first, so they come back in their original order
            for reinforcement in trailing.iter().rev() {
                let question = reinforcement.reinforcement_question().unwrap_or_default();
                let character = reinforcement.character_name().unwrap_or_default();
                if let Some(message) = agent
                    .update_reinforcement(question, &character, &self.cancel)
                    .await?
                {
                    self.push_history([message])?;
                }
                self.cancel.check()?;
            }
        }

        Ok(RerunOutcome::Rerun {
            replaced: target.id,
        })
    }

    fn plan_rerun(&self, target: &Message) -> SceneResult<Option<Plan>> {
        let plan = match target.kind() {
            MessageKind::Character => {
                let name = target.character_name().unwrap_or_default();
                let speaker = self
                    .actor_index(&name)
                    .ok_or_else(|| SceneError::UnknownCharacter(name.clone()))?;
                match (self.actors[speaker].is_player(), target.from_choice()) {
                    (true, Some(choice)) => Plan::PlayerChoice {
                        speaker,
                        choice: choice.to_string(),
                    },
                    (true, None) => return Ok(None),
                    (false, choice) => Plan::Npc {
                        speaker,
                        instruction: choice.map(str::to_string),
                    },
                }
            }
            MessageKind::Narrator => match target.source.parse::<Narration>()? {
                Narration::Director => Plan::DirectorNarration,
                narration => Plan::Narration(narration),
            },
            MessageKind::Director => {
                let speaker = if target.source.is_empty() {
                    self.actors.iter().position(|a| !a.is_player())
                } else {
                    let name = self
                        .get_character(&target.source, false)
                        .map(|c| c.name.clone())
                        .ok_or_else(|| SceneError::UnknownCharacter(target.source.clone()))?;
                    self.actor_index(&name)
                };
                Plan::Director {
                    speaker,
                    source: target.source.clone(),
                }
            }
            MessageKind::ContextInvestigation => {
                let agent = target.source_agent().map(str::to_string);
                let function = target.source_function().map(str::to_string);
                let (Some(agent), Some(function)) = (agent, function) else {
                    return Err(AgentError::domain(format!(
                        "context investigation {} has no source to rerun",
                        target.id
                    ))
                    .into());
                };
                Plan::Investigation {
                    message: target.clone(),
                    agent,
                    function,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(plan))
    }

    async fn run_plan(&mut self, plan: Plan) -> SceneResult<()> {
        match plan {
            Plan::PlayerChoice { speaker, choice } => {
                self.generate_from_choice(&choice, speaker, true).await?;
            }
            Plan::Npc { speaker, instruction } => {
                let name = self.actors[speaker].name().to_string();
                if let super::TurnOutcome::Spoke(messages) = self.converse(speaker, instruction).await? {
                    self.process_npc_dialogue(&name, &messages);
                }
            }
            Plan::DirectorNarration => {
                let agent = self.agents.director()?.clone();
                let text = agent.direct(None, &self.cancel).await?;
                self.cancel.check()?;
                match text {
                    Some(text) => {
                        let ids = self.push_history([
                            Message::narrator(text).with_source(Narration::Director.source())
                        ])?;
                        let message = self.added(&ids)?;
                        self.events.publish(SceneEvent::Narrator { message });
                    }
                    None => warn!("director had nothing to narrate"),
                }
            }
            Plan::Narration(narration) => {
                self.narrate(narration).await?;
            }
            Plan::Director { speaker, source } => {
                let character = speaker.map(|i| self.actors[i].character.clone());
                let agent = self.agents.director()?.clone();
                let text = agent.direct(character.as_ref(), &self.cancel).await?;
                self.cancel.check()?;
                if let Some(text) = text {
                    let ids = self.push_history([Message::director(text, source)])?;
                    let message = self.added(&ids)?;
                    let character = message.character_name();
                    self.events.publish(SceneEvent::Director { message, character });
                }
            }
            Plan::Investigation {
                message,
                agent,
                function,
            } => {
                let investigator = self.agents.investigator(&agent)?.clone();
                let text = investigator
                    .investigate(&function, &message.source_arguments(), &self.cancel)
                    .await?;
                self.cancel.check()?;

                let mut message = message;
                message.text = text;
                let ids = self.push_history([message])?;
                let message = self.added(&ids)?;
                self.events
                    .publish(SceneEvent::ContextInvestigation { message });
            }
        }
        Ok(())
    }
}
