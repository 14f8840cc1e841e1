//! The turn loop.
//!
//! `start` runs the loop for the scene's environment until it exits. Each
//! pass of the game loop gives every due actor one turn; failures inside a
//! pass are contained by [`Scene::recover`] so a single bad generation
//! never ends the session. Only the exit, restart and reset signals get
//! out.

use super::{Environment, Scene};
use crate::agent::{ConverseRequest, InputPrompt, Narration};
use crate::error::{AgentError, LoopSignal, SceneError, SceneResult};
use crate::events::{SceneEvent, StatusLevel};
use crate::message::{Message, MessageKind};
use tracing::{debug, error, info, warn};

/// What one actor's turn amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The actor added these messages.
    Spoke(Vec<Message>),
    /// Nothing was said.
    Silent,
    /// The player spoke for someone else; the rest of the pass is skipped.
    ActedAsCharacter,
    /// The player ran a command; the rest of the pass is skipped.
    Command,
}

/// Sensory verbs that turn a choice into a narrator query.
const SENSORY_CHECKS: [&str; 6] = ["look", "listen", "smell", "taste", "touch", "feel"];

fn sensory_suffix(verb: &str) -> &'static str {
    match verb {
        "look" | "inspect" | "examine" | "observe" | "watch" | "view" | "see" => "see",
        "listen" => "hear",
        "smell" => "smell",
        "taste" => "taste",
        "touch" | "feel" => "feel",
        _ => "experience",
    }
}

/// Pseudo character name for speaking as the narrator.
pub const NARRATOR_ACT_AS: &str = "$narrator";

impl Scene {
    /// Run the scene until it exits.
    pub async fn start(&mut self) -> SceneResult<()> {
        self.active = true;
        let mut first_loop = true;

        while self.active {
            let result = match self.environment {
                Environment::Scene => self.run_game_loop(first_loop).await,
                Environment::Creative => self.run_creative_loop(first_loop).await,
            };

            match result {
                Ok(()) => break,
                Err(SceneError::Agent(AgentError::Interrupt(LoopSignal::Exit))) => break,
                Err(SceneError::Agent(AgentError::Interrupt(LoopSignal::Restart))) => {
                    debug!("restarting scene loop");
                }
                Err(SceneError::Agent(AgentError::Interrupt(LoopSignal::Reset))) => {
                    debug!("resetting scene loop");
                    self.next_actor = None;
                    self.skip_to_player = false;
                    continue;
                }
                Err(e) => {
                    self.active = false;
                    return Err(e);
                }
            }

            first_loop = false;
        }

        self.active = false;
        info!(scene = %self.name, "scene ended");
        Ok(())
    }

    /// Stop after the current pass.
    pub fn stop(&mut self) {
        self.active = false;
    }

    async fn run_game_loop(&mut self, init: bool) -> SceneResult<()> {
        if init {
            self.events.publish(SceneEvent::ClearScreen);
            self.emit_history();
        }

        // players go first
        self.actors.sort_by_key(|a| !a.is_player());
        self.next_actor = None;
        self.signal_game_loop = true;
        self.skip_to_player = false;
        self.events.publish(SceneEvent::GameLoopStart);

        while self.active {
            debug!(
                auto_save = self.auto_save(),
                auto_progress = self.auto_progress(),
                "game loop"
            );
            if let Err(e) = self.game_loop_pass().await {
                self.recover(e, "game_loop")?;
            }
        }
        Ok(())
    }

    /// One pass over the actors.
    pub(crate) async fn game_loop_pass(&mut self) -> SceneResult<()> {
        if self.signal_game_loop {
            self.events.publish(SceneEvent::GameLoop);
        }
        let turn_start = self.signal_game_loop;
        self.signal_game_loop = true;

        let mut idx = 0;
        while idx < self.actors.len() {
            let i = idx;
            idx += 1;

            let is_player = self.actors[i].is_player();
            if self.skip_to_player && !is_player {
                continue;
            }
            self.skip_to_player = false;

            if self.actors[i].character.memory_dirty {
                self.commit_character(i).await?;
            }

            if !self.auto_progress() && !is_player {
                continue;
            }

            let name = self.actors[i].name().to_string();
            if let Some(next) = self.next_actor.as_deref() {
                if next != name && self.auto_progress() {
                    debug!(actor = %name, next_actor = next, "skipping actor");
                    continue;
                }
            }

            if is_player && turn_start {
                self.events.publish(SceneEvent::PlayerTurnStart);
            }

            let outcome = if is_player {
                self.player_turn(i).await?
            } else {
                self.npc_turn(i).await?
            };

            match outcome {
                TurnOutcome::ActedAsCharacter | TurnOutcome::Command => {
                    self.signal_game_loop = false;
                    break;
                }
                TurnOutcome::Silent => continue,
                TurnOutcome::Spoke(messages) => {
                    if !is_player {
                        self.process_npc_dialogue(&name, &messages);
                    }
                    self.events.publish(SceneEvent::GameLoopActorIter { actor: name });
                }
            }
        }

        if self.auto_save() {
            self.save(super::SaveMode::Auto).await?;
        }
        self.emit_status(false);
        Ok(())
    }

    /// Contain a failed pass. Loop signals are handed back; everything else
    /// is reported and the loop carries on.
    pub(crate) fn recover(&mut self, err: SceneError, context: &'static str) -> SceneResult<()> {
        match err {
            SceneError::Agent(AgentError::Interrupt(signal)) => {
                return Err(AgentError::Interrupt(signal).into());
            }
            SceneError::Agent(AgentError::Cancelled) => {
                warn!(context, "generation cancelled, skipping to player");
                self.signal_game_loop = false;
                self.skip_to_player = true;
                self.next_actor = None;
                self.cancel.reset();
            }
            SceneError::Agent(AgentError::Accuracy(e)) => {
                error!(context, error = %e, "accuracy error");
                self.events.publish(SceneEvent::system(format!(
                    "LLM Accuracy Error - The model returned an unexpected response, this may mean this specific model is not suitable: {e}"
                )));
            }
            SceneError::Agent(AgentError::ClientDisabled { client }) => {
                error!(context, client = %client, "client disabled");
                self.events.publish(SceneEvent::status(
                    StatusLevel::Error,
                    format!("{client} is disabled and cannot be used."),
                ));
                self.signal_game_loop = false;
                self.skip_to_player = true;
            }
            e @ (SceneError::Agent(AgentError::Domain(_))
            | SceneError::History(_)
            | SceneError::Duration(_)
            | SceneError::UnknownCharacter(_)
            | SceneError::UnknownMessage(_)
            | SceneError::UnknownCommand(_)) => {
                error!(context, error = %e, "scene error");
            }
            e @ (SceneError::Agent(AgentError::Unexpected(_))
            | SceneError::Persist(_)
            | SceneError::Config(_)) => {
                error!(context, error = %e, error_debug = ?e, unhandled = true, "unhandled error");
                self.events
                    .publish(SceneEvent::system(format!("Unhandled Error: {e}")));
            }
        }
        Ok(())
    }

    async fn run_creative_loop(&mut self, _init: bool) -> SceneResult<()> {
        self.events.publish(SceneEvent::status(
            StatusLevel::Info,
            "Switched to scene editor",
        ));
        self.events.publish(SceneEvent::ClearScreen);
        self.emit_history();

        while self.active {
            if let Err(e) = self.creative_step().await {
                if matches!(e, SceneError::Agent(AgentError::Cancelled)) {
                    self.cancel.reset();
                    continue;
                }
                self.recover(e, "creative_loop")?;
            }
        }
        Ok(())
    }

    async fn creative_step(&mut self) -> SceneResult<()> {
        let prompt = InputPrompt {
            character: None,
            history_tokens: self.history_length(),
        };
        let input = self.input.clone().next_input(prompt, &self.cancel).await?;
        self.cancel.check()?;

        let Some(input) = input.filter(|i| !i.message.trim().is_empty()) else {
            return Ok(());
        };

        self.execute(&input.message).await?;
        self.saved = false;
        self.emit_status(false);
        Ok(())
    }

    /// Publish the scene opening and the visible tail of the history.
    fn emit_history(&mut self) {
        self.events.publish(SceneEvent::SceneInit);

        let intro = self.get_intro(None);
        if !intro.is_empty() {
            self.events.publish(SceneEvent::Narrator {
                message: Message::narrator(intro.clone()),
            });
        }

        if let Some(main) = self.player_character().map(|c| c.name.clone()) {
            for actor in self.actors.iter_mut().filter(|a| !a.is_player()) {
                actor.character.introduce_main_character(&main);
            }
        }

        for actor in self.actors.iter().filter(|a| !a.is_player()) {
            let greeting = &actor.character.greeting_text;
            if !greeting.is_empty() && self.get_intro(Some(greeting.as_str())) != intro {
                self.events.publish(SceneEvent::Character {
                    message: Message::character(format!("{}: {greeting}", actor.name())),
                    character: actor.name().to_string(),
                });
            }
        }

        let backscroll = self.config.game.general.max_backscroll;
        let messages = self.history.messages();
        let tail = &messages[messages.len().saturating_sub(backscroll)..];
        let mut most_recent_ai = None;
        for message in tail {
            let speaker = message
                .character_name()
                .filter(|_| message.is(MessageKind::Character))
                .and_then(|name| self.actors.iter().find(|a| a.name() == name));

            let event = match speaker {
                Some(actor) => {
                    if !actor.is_player() {
                        most_recent_ai = Some(actor.name().to_string());
                    }
                    SceneEvent::Character {
                        message: message.clone(),
                        character: actor.name().to_string(),
                    }
                }
                None => display_event(message),
            };
            self.events.publish(event);
        }
        if most_recent_ai.is_some() {
            self.most_recent_ai_actor = most_recent_ai;
        }
    }

    async fn npc_turn(&mut self, i: usize) -> SceneResult<TurnOutcome> {
        if let Some(line) = self.actors[i].next_scripted_line() {
            let message = Message::character(line);
            self.push_history([message.clone()])?;
            return Ok(TurnOutcome::Spoke(vec![message]));
        }
        self.converse(i, None).await
    }

    /// Have the conversation agent speak for actor `i` and record it.
    pub(crate) async fn converse(&mut self, i: usize, instruction: Option<String>) -> SceneResult<TurnOutcome> {
        let agent = self.agents.conversation()?.clone();
        let request = self.converse_request(i).with_instruction(instruction);

        let messages = agent.converse(request, &self.cancel).await?;
        self.cancel.check()?;

        if messages.is_empty() {
            return Ok(TurnOutcome::Silent);
        }
        let ids = self.push_history(messages)?;
        let added = ids
            .iter()
            .filter_map(|id| self.history.get(*id).cloned())
            .collect();
        Ok(TurnOutcome::Spoke(added))
    }

    fn converse_request(&self, i: usize) -> ConverseRequest {
        let character = self.actors[i].character.clone();
        let others = self
            .actors
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, a)| a.name().to_string())
            .collect();
        ConverseRequest::new(character).with_others(others)
    }

    async fn player_turn(&mut self, i: usize) -> SceneResult<TurnOutcome> {
        if self.actors[i].take_muted_turn() {
            return Ok(TurnOutcome::Silent);
        }
        if self.actors[i].take_ai_turn() {
            return self.converse(i, None).await;
        }

        let player = self.actors[i].name().to_string();
        let prompt = InputPrompt {
            character: Some(player.clone()),
            history_tokens: self.history_length(),
        };
        let input = self.input.clone().next_input(prompt, &self.cancel).await?;
        self.cancel.check()?;

        let Some(input) = input else {
            return Ok(TurnOutcome::Silent);
        };
        let text = input.message.trim().to_string();
        if text.is_empty() {
            return Ok(TurnOutcome::Silent);
        }

        if let Some(choice) = text.strip_prefix('@') {
            let speaker = match input.act_as.as_deref() {
                Some(name) => self
                    .actor_index(name)
                    .ok_or_else(|| SceneError::UnknownCharacter(name.to_string()))?,
                None => i,
            };
            let Some(message) = self.generate_from_choice(choice, speaker, false).await? else {
                return Ok(TurnOutcome::Silent);
            };
            self.push_history([message.clone()])?;

            if speaker != i {
                let name = self.actors[speaker].name().to_string();
                self.process_npc_dialogue(&name, &[message]);
                return Ok(TurnOutcome::ActedAsCharacter);
            }
            self.events.publish(SceneEvent::Character {
                message: message.clone(),
                character: player,
            });
            return Ok(TurnOutcome::Spoke(vec![message]));
        }

        if super::is_command(&text) {
            self.execute(&text).await?;
            return Ok(TurnOutcome::Command);
        }

        match input.act_as.as_deref() {
            Some(NARRATOR_ACT_AS) => {
                let message = Message::narrator(text).with_source("player");
                self.push_history([message.clone()])?;
                self.events.publish(SceneEvent::Narrator { message });
                Ok(TurnOutcome::ActedAsCharacter)
            }
            Some(name) => {
                let character = self
                    .get_character(name, false)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| SceneError::UnknownCharacter(name.to_string()))?;
                let message = Message::character(format!("{character}: {text}"));
                self.push_history([message.clone()])?;
                self.process_npc_dialogue(&character, &[message]);
                Ok(TurnOutcome::ActedAsCharacter)
            }
            None => {
                let mut message = Message::player(format!("{player}: {text}"));
                if let Some(choice) = input.from_choice {
                    message = message.with_from_choice(choice);
                }
                let ids = self.push_history([message])?;
                let message = self.added(&ids)?;
                self.events.publish(SceneEvent::Character {
                    message: message.clone(),
                    character: player,
                });
                Ok(TurnOutcome::Spoke(vec![message]))
            }
        }
    }

    /// Turn a suggested choice into a line for actor `speaker`.
    ///
    /// Choices that start with a sensory verb become a narrator query
    /// instead and yield `None`. With `process` the line is also recorded
    /// and announced.
    pub async fn generate_from_choice(
        &mut self,
        choice: &str,
        speaker: usize,
        process: bool,
    ) -> SceneResult<Option<Message>> {
        let name = self
            .actors
            .get(speaker)
            .map(|a| a.name().to_string())
            .ok_or_else(|| SceneError::UnknownCharacter(format!("actor #{speaker}")))?;

        let lowered = choice.to_lowercase();
        if SENSORY_CHECKS.iter().any(|verb| lowered.starts_with(verb)) {
            let verb = lowered.split(' ').next().unwrap_or_default();
            let suffix = sensory_suffix(verb);
            debug!(choice, sensory_checks = true, "generate_from_choice");
            let query = format!(
                "{name} wants to \"{choice}\" - what does {name} {suffix} (your answer must be descriptive and detailed)?"
            );
            self.narrate(Narration::Query(query)).await?;
            return Ok(None);
        }

        let agent = self.agents.conversation()?.clone();
        let request = self
            .converse_request(speaker)
            .with_instruction(Some(choice.to_string()))
            .generate_only();
        let generated = agent.converse(request, &self.cancel).await?;
        self.cancel.check()?;

        let line = generated
            .first()
            .map(|m| m.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AgentError::Accuracy(format!("no dialogue generated for choice {choice:?}")))?;

        let is_player = self.actors[speaker].is_player();
        let message = Message::character(line)
            .with_source(if is_player { "player" } else { "ai" })
            .with_from_choice(choice);

        if !process {
            return Ok(Some(message));
        }

        let ids = self.push_history([message])?;
        let message = self.added(&ids)?;
        if is_player {
            self.events.publish(SceneEvent::Character {
                message: message.clone(),
                character: name,
            });
        } else {
            self.process_npc_dialogue(&name, &[message.clone()]);
        }
        Ok(Some(message))
    }

    /// Ask the narrator for `narration` and record the result.
    pub async fn narrate(&mut self, narration: Narration) -> SceneResult<Message> {
        if let Some(name) = narration.character() {
            if self.get_character(name, false).is_none() {
                return Err(SceneError::UnknownCharacter(name.to_string()));
            }
        }

        let agent = self.agents.narrator()?.clone();
        let text = agent.narrate(&narration, &self.cancel).await?;
        self.cancel.check()?;

        let ids = self.push_history([Message::narrator(text).with_source(narration.source())])?;
        let message = self.added(&ids)?;
        self.events.publish(SceneEvent::Narrator {
            message: message.clone(),
        });
        Ok(message)
    }

    /// The stored copy of the first message just appended.
    pub(crate) fn added(&self, ids: &[crate::id::MessageId]) -> SceneResult<Message> {
        ids.first()
            .and_then(|id| self.history.get(*id))
            .cloned()
            .ok_or_else(|| AgentError::unexpected("appended message is missing from history").into())
    }
}

/// The notification a front-end shows for `message` outside of a turn.
fn display_event(message: &Message) -> SceneEvent {
    match message.kind() {
        MessageKind::Narrator => SceneEvent::Narrator {
            message: message.clone(),
        },
        MessageKind::Director => SceneEvent::Director {
            message: message.clone(),
            character: message.character_name(),
        },
        MessageKind::ContextInvestigation => SceneEvent::ContextInvestigation {
            message: message.clone(),
        },
        _ => SceneEvent::HistoryAdd {
            message: message.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, Character};
    use crate::agent::PlayerInput;
    use crate::testing::{MockAgent, ScriptedInput};
    use std::sync::Arc;

    async fn scene_with(agent: &Arc<MockAgent>, input: &Arc<ScriptedInput>) -> Scene {
        let mut scene = Scene::new(agent.agents(), input.clone());
        scene
            .add_actor(Actor::player(Character::new("Kai")))
            .await
            .unwrap();
        scene.add_actor(Actor::npc(Character::new("Bob"))).await.unwrap();
        scene
    }

    #[test]
    fn test_sensory_suffix() {
        assert_eq!(sensory_suffix("look"), "see");
        assert_eq!(sensory_suffix("listen"), "hear");
        assert_eq!(sensory_suffix("touch"), "feel");
        assert_eq!(sensory_suffix("lookup"), "experience");
    }

    #[tokio::test]
    async fn test_one_pass_player_then_npc() {
        let agent = Arc::new(MockAgent::new().with_dialogue("Bob: Evening."));
        let input = Arc::new(ScriptedInput::new().with_line("Hello there"));
        let mut scene = scene_with(&agent, &input).await;

        scene.game_loop_pass().await.unwrap();

        let texts: Vec<&str> = scene.history().messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Kai: Hello there", "Bob: Evening."]);
        assert_eq!(scene.history().messages()[0].source, "player");
        assert_eq!(scene.most_recent_ai_actor(), Some("Bob"));
    }

    #[tokio::test]
    async fn test_acting_as_character_ends_the_pass() {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(
            ScriptedInput::new().with_input(PlayerInput::new("Fine, thanks.").acting_as("Bob")),
        );
        let mut scene = scene_with(&agent, &input).await;

        scene.game_loop_pass().await.unwrap();

        assert_eq!(scene.history().len(), 1);
        assert_eq!(scene.history().messages()[0].text, "Bob: Fine, thanks.");
        assert_eq!(scene.history().messages()[0].source, "ai");
        assert!(agent.calls().is_empty());
        assert!(!scene.signal_game_loop);
    }

    #[tokio::test]
    async fn test_acting_as_narrator() {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(
            ScriptedInput::new()
                .with_input(PlayerInput::new("Rain falls.").acting_as(NARRATOR_ACT_AS)),
        );
        let mut scene = scene_with(&agent, &input).await;

        scene.game_loop_pass().await.unwrap();

        let message = &scene.history().messages()[0];
        assert!(message.is(MessageKind::Narrator));
        assert_eq!(message.source, "player");
    }

    #[tokio::test]
    async fn test_sensory_choice_becomes_narrator_query() {
        let agent = Arc::new(MockAgent::new().with_narration("The room is dim."));
        let input = Arc::new(ScriptedInput::new().with_line("@look around"));
        let mut scene = scene_with(&agent, &input).await;
        scene.set_next_actor(Some("Kai".to_string()));

        scene.game_loop_pass().await.unwrap();

        let message = scene.history().last().unwrap();
        assert_eq!(message.text, "The room is dim.");
        assert_eq!(
            message.source,
            "narrate_query:Kai wants to \"look around\" - what does Kai see (your answer must be descriptive and detailed)?"
        );
    }

    #[tokio::test]
    async fn test_choice_generates_player_line() {
        let agent = Arc::new(MockAgent::new().with_dialogue("Kai: I draw my sword."));
        let input = Arc::new(ScriptedInput::new().with_line("@draw sword"));
        let mut scene = scene_with(&agent, &input).await;
        scene.set_next_actor(Some("Kai".to_string()));

        scene.game_loop_pass().await.unwrap();

        let message = &scene.history().messages()[0];
        assert_eq!(message.text, "Kai: I draw my sword.");
        assert_eq!(message.source, "player");
        assert_eq!(message.from_choice(), Some("draw sword"));
    }

    #[tokio::test]
    async fn test_muted_player_is_skipped() {
        let agent = Arc::new(MockAgent::new().with_dialogue("Bob: Quiet, huh?"));
        let input = Arc::new(ScriptedInput::new());
        let mut scene = scene_with(&agent, &input).await;
        scene.actors[0].mute(1);

        scene.game_loop_pass().await.unwrap();

        assert_eq!(scene.history().len(), 1);
        assert!(input.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_auto_progress_off_skips_npcs() {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(ScriptedInput::new().with_line("Anyone?"));
        let mut scene = scene_with(&agent, &input)
            .await
            .with_config(crate::config::GameConfig::default().with_auto_progress(false));

        scene.game_loop_pass().await.unwrap();

        assert_eq!(scene.history().len(), 1);
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_npc_line() {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(ScriptedInput::new().with_line("Hi"));
        let mut scene = Scene::new(agent.agents(), input.clone());
        scene
            .add_actor(Actor::player(Character::new("Kai")))
            .await
            .unwrap();
        scene
            .add_actor(Actor::npc(Character::new("Bob")).with_script(["Bob: Scripted."]))
            .await
            .unwrap();

        scene.game_loop_pass().await.unwrap();

        assert_eq!(scene.history().last().unwrap().text, "Bob: Scripted.");
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recover_keeps_loop_alive() {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(ScriptedInput::new());
        let mut scene = scene_with(&agent, &input).await;
        let mut events = scene.events().subscribe();

        scene
            .recover(AgentError::Accuracy("garbled".into()).into(), "test")
            .unwrap();
        scene
            .recover(
                AgentError::ClientDisabled {
                    client: "local".into(),
                }
                .into(),
                "test",
            )
            .unwrap();
        assert!(scene.skip_to_player());
        scene
            .recover(AgentError::unexpected("boom").into(), "test")
            .unwrap();

        assert!(matches!(events.try_recv().unwrap(), SceneEvent::System { .. }));
        assert!(matches!(
            events.try_recv().unwrap(),
            SceneEvent::Status {
                level: StatusLevel::Error,
                ..
            }
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            SceneEvent::system("Unhandled Error: Agent error: unexpected error: boom")
        );

        let err = scene
            .recover(AgentError::Interrupt(LoopSignal::Exit).into(), "test")
            .unwrap_err();
        assert!(matches!(
            err,
            SceneError::Agent(AgentError::Interrupt(LoopSignal::Exit))
        ));
    }
}
