//! Testing utilities for scenes.
//!
//! This module provides tools for integration testing:
//! - `MockAgent` for deterministic generation without model calls
//! - `ScriptedInput` for scripted player input
//! - `TestHarness` for running scripted scenes
//! - Assertion helpers for verifying history

use crate::actor::{Actor, Character};
use crate::agent::{
    Agents, ConversationAgent, ConverseRequest, DirectorAgent, InputPrompt, InputSource,
    InvestigationAgent, MemoryAgent, MemoryItem, Narration, NarratorAgent, PlayerInput, Summarizer,
    WorldStateAgent,
};
use crate::cancel::CancelToken;
use crate::error::{AgentError, AgentResult, LoopSignal, SceneResult};
use crate::events::SceneEvent;
use crate::id::MemoryId;
use crate::message::{Message, MessageKind};
use crate::scene::Scene;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Name the mock registers itself under as an investigator.
pub const MOCK_INVESTIGATOR: &str = "mock";

/// A mock agent that returns scripted responses for every capability.
///
/// Queued responses are used in order; when a queue runs dry a fixed
/// default is returned instead.
#[derive(Default)]
pub struct MockAgent {
    dialogue: Mutex<VecDeque<String>>,
    narration: Mutex<VecDeque<String>>,
    directions: Mutex<VecDeque<String>>,
    reinforcements: Mutex<VecDeque<String>>,
    summaries: Mutex<VecDeque<String>>,
    memory: Mutex<Vec<MemoryItem>>,
    calls: Mutex<Vec<String>>,
    cancel_next: Mutex<bool>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line of dialogue, `"Name: text"`.
    pub fn with_dialogue(self, line: impl Into<String>) -> Self {
        self.queue_dialogue(line);
        self
    }

    pub fn with_narration(self, text: impl Into<String>) -> Self {
        self.queue_narration(text);
        self
    }

    pub fn with_direction(self, text: impl Into<String>) -> Self {
        self.directions.lock().push_back(text.into());
        self
    }

    pub fn with_reinforcement(self, text: impl Into<String>) -> Self {
        self.reinforcements.lock().push_back(text.into());
        self
    }

    pub fn with_summary(self, text: impl Into<String>) -> Self {
        self.summaries.lock().push_back(text.into());
        self
    }

    pub fn queue_dialogue(&self, line: impl Into<String>) {
        self.dialogue.lock().push_back(line.into());
    }

    pub fn queue_narration(&self, text: impl Into<String>) {
        self.narration.lock().push_back(text.into());
    }

    /// Make the next conversation call behave as if the user interrupted it.
    pub fn cancel_next_converse(&self) {
        *self.cancel_next.lock() = true;
    }

    /// Generation calls made so far, e.g. `"converse:Bob"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Items currently held in memory.
    pub fn memory_items(&self) -> Vec<MemoryItem> {
        self.memory.lock().clone()
    }

    /// Every capability backed by this mock.
    pub fn agents(self: &Arc<Self>) -> Agents {
        Agents::new()
            .with_conversation(self.clone())
            .with_narrator(self.clone())
            .with_director(self.clone())
            .with_world_state(self.clone())
            .with_memory(self.clone())
            .with_summarizer(self.clone())
            .with_investigator(MOCK_INVESTIGATOR, self.clone())
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ConversationAgent for MockAgent {
    async fn converse(&self, request: ConverseRequest, cancel: &CancelToken) -> AgentResult<Vec<Message>> {
        let name = request.character.name.clone();
        self.record(format!("converse:{name}"));

        if std::mem::take(&mut *self.cancel_next.lock()) {
            cancel.cancel();
        }
        cancel.check()?;

        let line = self
            .dialogue
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("{name}: ..."));
        Ok(vec![Message::character(line)])
    }
}

#[async_trait]
impl NarratorAgent for MockAgent {
    async fn narrate(&self, narration: &Narration, cancel: &CancelToken) -> AgentResult<String> {
        self.record(format!("narrate:{narration}"));
        cancel.check()?;
        Ok(self
            .narration
            .lock()
            .pop_front()
            .unwrap_or_else(|| "The story continues.".to_string()))
    }
}

#[async_trait]
impl DirectorAgent for MockAgent {
    async fn direct(&self, character: Option<&Character>, cancel: &CancelToken) -> AgentResult<Option<String>> {
        match character {
            Some(c) => self.record(format!("direct:{}", c.name)),
            None => self.record("direct".to_string()),
        }
        cancel.check()?;
        Ok(self.directions.lock().pop_front())
    }
}

#[async_trait]
impl WorldStateAgent for MockAgent {
    async fn update_reinforcement(
        &self,
        question: &str,
        character: &str,
        cancel: &CancelToken,
    ) -> AgentResult<Option<Message>> {
        self.record(format!("reinforce:{question}:{character}"));
        cancel.check()?;
        Ok(self
            .reinforcements
            .lock()
            .pop_front()
            .map(|text| Message::reinforcement(text, question, character)))
    }
}

#[async_trait]
impl InvestigationAgent for MockAgent {
    async fn investigate(
        &self,
        function: &str,
        _arguments: &Map<String, Value>,
        cancel: &CancelToken,
    ) -> AgentResult<String> {
        self.record(format!("investigate:{function}"));
        cancel.check()?;
        Ok(format!("{function} result"))
    }
}

#[async_trait]
impl MemoryAgent for MockAgent {
    async fn add_many(&self, _memory_id: &MemoryId, items: Vec<MemoryItem>) -> AgentResult<()> {
        self.memory.lock().extend(items);
        Ok(())
    }

    async fn reset(&self, _memory_id: &MemoryId) -> AgentResult<()> {
        self.memory.lock().clear();
        Ok(())
    }
}

#[async_trait]
impl Summarizer for MockAgent {
    async fn summarize(&self, text: &str, cancel: &CancelToken) -> AgentResult<String> {
        self.record("summarize".to_string());
        cancel.check()?;
        Ok(self
            .summaries
            .lock()
            .pop_front()
            .unwrap_or_else(|| text.to_string()))
    }
}

/// Player input read from a script.
///
/// Once the script is exhausted the next read ends the scene with the exit
/// signal.
#[derive(Default)]
pub struct ScriptedInput {
    lines: Mutex<VecDeque<PlayerInput>>,
    prompts: Mutex<Vec<InputPrompt>>,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line(self, line: impl Into<String>) -> Self {
        self.push_line(line);
        self
    }

    pub fn with_input(self, input: PlayerInput) -> Self {
        self.push_input(input);
        self
    }

    pub fn push_line(&self, line: impl Into<String>) {
        self.push_input(PlayerInput::new(line));
    }

    pub fn push_input(&self, input: PlayerInput) {
        self.lines.lock().push_back(input);
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<InputPrompt> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.lines.lock().len()
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn next_input(&self, prompt: InputPrompt, cancel: &CancelToken) -> AgentResult<Option<PlayerInput>> {
        self.prompts.lock().push(prompt);
        cancel.check()?;
        match self.lines.lock().pop_front() {
            Some(input) => Ok(Some(input)),
            None => Err(AgentError::Interrupt(LoopSignal::Exit)),
        }
    }
}

/// Test harness for running scripted scenes.
pub struct TestHarness {
    pub agent: Arc<MockAgent>,
    pub input: Arc<ScriptedInput>,
    pub scene: Scene,
    events: broadcast::Receiver<SceneEvent>,
}

impl TestHarness {
    /// A scene with player `player` and the given non-player characters.
    pub async fn new(player: &str, npcs: &[&str]) -> SceneResult<Self> {
        let agent = Arc::new(MockAgent::new());
        let input = Arc::new(ScriptedInput::new());
        let mut scene = Scene::new(agent.agents(), input.clone()).with_name("Test Scene");
        let events = scene.events().subscribe();

        scene.add_actor(Actor::player(Character::new(player))).await?;
        for npc in npcs {
            scene.add_actor(Actor::npc(Character::new(*npc))).await?;
        }

        Ok(Self {
            agent,
            input,
            scene,
            events,
        })
    }

    /// Queue player input.
    pub fn say(&mut self, line: &str) -> &mut Self {
        self.input.push_line(line);
        self
    }

    /// Queue a line of generated dialogue.
    pub fn expect_dialogue(&mut self, line: &str) -> &mut Self {
        self.agent.queue_dialogue(line);
        self
    }

    /// Run the scene until the scripted input runs out.
    pub async fn run(&mut self) -> SceneResult<()> {
        self.scene.start().await
    }

    /// Every message text in history order.
    pub fn transcript(&self) -> Vec<String> {
        self.scene
            .history()
            .messages()
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }

    /// Events published since the last drain.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn last_text(&self) -> Option<&str> {
        self.scene.history().last().map(|m| m.text.as_str())
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that the history holds exactly `count` messages of `kind`.
#[track_caller]
pub fn assert_kind_count(harness: &TestHarness, kind: MessageKind, count: usize) {
    let actual = harness.scene.history().count(Some(kind), None);
    assert_eq!(actual, count, "Expected {count} {kind} messages, got {actual}");
}

/// Assert that `name` has spoken at least once.
#[track_caller]
pub fn assert_spoke(harness: &TestHarness, name: &str) {
    assert!(
        harness.scene.count_character_messages(name) > 0,
        "Expected '{name}' to have spoken"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_agent_defaults() {
        let agent = Arc::new(MockAgent::new().with_dialogue("Bob: Hi."));
        let cancel = CancelToken::new();
        let bob = Character::new("Bob");

        let first = agent
            .converse(ConverseRequest::new(bob.clone()), &cancel)
            .await
            .unwrap();
        let second = agent.converse(ConverseRequest::new(bob), &cancel).await.unwrap();

        assert_eq!(first[0].text, "Bob: Hi.");
        assert_eq!(second[0].text, "Bob: ...");
        assert_eq!(agent.calls(), vec!["converse:Bob", "converse:Bob"]);
        assert_eq!(agent.direct(None, &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_next_converse() {
        let agent = MockAgent::new();
        let cancel = CancelToken::new();
        agent.cancel_next_converse();

        let err = agent
            .converse(ConverseRequest::new(Character::new("Bob")), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_scripted_input_ends_with_exit() {
        let input = ScriptedInput::new().with_line("hello");
        let cancel = CancelToken::new();
        let prompt = InputPrompt {
            character: Some("Kai".into()),
            history_tokens: 0,
        };

        let first = input.next_input(prompt.clone(), &cancel).await.unwrap();
        assert_eq!(first.unwrap().message, "hello");
        assert!(matches!(
            input.next_input(prompt, &cancel).await,
            Err(AgentError::Interrupt(LoopSignal::Exit))
        ));
        assert_eq!(input.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_harness_runs_until_input_is_exhausted() {
        let mut harness = TestHarness::new("Kai", &["Bob"]).await.unwrap();
        harness.say("Hello").expect_dialogue("Bob: Hi there.");

        harness.run().await.unwrap();

        assert_eq!(harness.transcript(), vec!["Kai: Hello", "Bob: Hi there."]);
        assert_kind_count(&harness, MessageKind::Character, 2);
        assert_spoke(&harness, "Bob");
        assert!(!harness.scene.is_active());
        assert!(harness
            .drain_events()
            .iter()
            .any(|e| matches!(e, SceneEvent::GameLoopStart)));
    }
}
