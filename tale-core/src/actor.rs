//! Characters and the actors that voice them.

use crate::agent::MemoryItem;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};

/// Colors handed out to characters that do not pick one.
pub const CHARACTER_COLORS: [&str; 10] = [
    "#F08080", "#FFD700", "#90EE90", "#ADD8E6", "#DDA0DD", "#FFB6C1", "#FAFAD2", "#D3D3D3",
    "#B0E0E6", "#FFDEAD",
];

static USER_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{user\}\}").expect("valid placeholder regex"));

/// A named participant in the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub greeting_text: String,

    #[serde(default = "d_gender")]
    pub gender: String,

    #[serde(default = "d_color")]
    pub color: String,

    #[serde(default)]
    pub example_dialogue: Vec<String>,

    #[serde(default)]
    pub is_player: bool,

    /// Backstory events, each with a `summary`.
    #[serde(default)]
    pub history_events: Vec<Value>,

    #[serde(default)]
    pub base_attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub details: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_instructions: Option<String>,

    /// Attributes changed since the last memory commit.
    #[serde(skip)]
    pub memory_dirty: bool,
}

fn d_gender() -> String {
    "female".to_string()
}

fn d_color() -> String {
    "cyan".to_string()
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            greeting_text: String::new(),
            gender: d_gender(),
            color: d_color(),
            example_dialogue: Vec::new(),
            is_player: false,
            history_events: Vec::new(),
            base_attributes: BTreeMap::new(),
            details: BTreeMap::new(),
            cover_image: None,
            dialogue_instructions: None,
            memory_dirty: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting_text = greeting.into();
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = gender.into();
        self
    }

    pub fn with_example_dialogue(mut self, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.example_dialogue = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// `key: value` lines of the base attributes, or of name, gender and
    /// description when there are none.
    pub fn sheet(&self) -> String {
        self.sheet_filtered(&[])
    }

    /// Like [`Character::sheet`] without the `exclude`d keys.
    pub fn sheet_filtered(&self, exclude: &[&str]) -> String {
        let fallback;
        let attributes = if self.base_attributes.is_empty() {
            fallback = BTreeMap::from([
                ("name".to_string(), self.name.clone()),
                ("gender".to_string(), self.gender.clone()),
                ("description".to_string(), self.description.clone()),
            ]);
            &fallback
        } else {
            &self.base_attributes
        };

        attributes
            .iter()
            .filter(|(key, _)| !exclude.contains(&key.as_str()))
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rename, rewriting the old name in description, attributes and details.
    ///
    /// A character called "You" is only renamed; the word is too common to
    /// rewrite.
    pub fn rename(&mut self, new_name: impl Into<String>) {
        let orig = std::mem::replace(&mut self.name, new_name.into());
        if orig.eq_ignore_ascii_case("you") {
            return;
        }

        self.description = self.description.replace(&orig, &self.name);
        for value in self.base_attributes.values_mut() {
            *value = value.replace(&orig, &self.name);
        }
        for value in self.details.values_mut() {
            *value = value.replace(&orig, &self.name);
        }
        self.memory_dirty = true;
    }

    /// Replace `{{user}}` (any case) with the main character's name.
    pub fn introduce_main_character(&mut self, main: &str) {
        let sub = |text: &str| USER_PLACEHOLDER.replace_all(text, main).into_owned();
        self.description = sub(&self.description);
        self.greeting_text = sub(&self.greeting_text);
        for line in &mut self.example_dialogue {
            *line = sub(line.as_str());
        }
    }

    /// One example line at random, empty if there are none.
    pub fn random_dialogue_example(&self) -> String {
        self.example_dialogue
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Up to `n` distinct example lines in random order.
    pub fn random_dialogue_examples(&self, n: usize) -> Vec<String> {
        let mut examples = self.example_dialogue.clone();
        examples.shuffle(&mut rand::thread_rng());
        examples.truncate(n);
        examples
    }

    /// Set `color`, or pick one from [`CHARACTER_COLORS`].
    pub fn set_color(&mut self, color: Option<&str>) {
        self.color = match color {
            Some(color) => color.to_string(),
            None => CHARACTER_COLORS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("cyan")
                .to_string(),
        };
    }

    /// Documents describing this character for long term memory.
    pub fn memory_items(&self) -> Vec<MemoryItem> {
        let mut items = Vec::new();
        let meta = |pairs: &[(&str, &str)]| -> Map<String, Value> {
            let mut meta = Map::new();
            meta.insert("character".into(), json!(self.name));
            for (k, v) in pairs {
                meta.insert((*k).into(), json!(v));
            }
            meta
        };

        if !self.base_attributes.contains_key("description") {
            let chunks = self.description.lines().map(str::trim).filter(|c| !c.is_empty());
            for (idx, chunk) in chunks.enumerate() {
                items.push(MemoryItem {
                    text: format!("{}: {chunk}", self.name),
                    id: Some(format!("{}.description.{idx}", self.name)),
                    meta: meta(&[("attr", "description"), ("typ", "base_attribute")]),
                });
            }
        }

        for (attr, value) in &self.base_attributes {
            if attr.starts_with('_')
                || matches!(attr.to_lowercase().as_str(), "name" | "scenario_context")
            {
                continue;
            }
            items.push(MemoryItem {
                text: format!("{}'s {attr}: {value}", self.name),
                id: Some(format!("{}.{attr}", self.name)),
                meta: meta(&[("attr", attr.as_str()), ("typ", "base_attribute")]),
            });
        }

        for (key, detail) in &self.details {
            items.push(MemoryItem {
                text: format!("{} - {key}: {detail}", self.name),
                id: Some(format!("{}.{key}", self.name)),
                meta: meta(&[("typ", "details"), ("detail", key.as_str())]),
            });
        }

        for event in &self.history_events {
            let Some(summary) = event.get("summary").and_then(Value::as_str) else {
                continue;
            };
            if summary.is_empty() {
                continue;
            }
            items.push(MemoryItem {
                text: summary.to_string(),
                id: None,
                meta: meta(&[("typ", "history_event")]),
            });
        }

        items
    }
}

/// How an actor produces its turns.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorRole {
    /// Driven by player input.
    Player {
        /// Turns left to skip.
        muted: u32,
        /// Turns left to hand to the conversation agent.
        ai_controlled: u32,
    },
    /// Driven by the conversation agent, or by a script of canned lines.
    Npc { script: VecDeque<String> },
}

/// A character paired with the way it takes turns.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub character: Character,
    pub role: ActorRole,
}

impl Actor {
    pub fn player(mut character: Character) -> Self {
        character.is_player = true;
        Self {
            character,
            role: ActorRole::Player {
                muted: 0,
                ai_controlled: 0,
            },
        }
    }

    pub fn npc(character: Character) -> Self {
        Self {
            character,
            role: ActorRole::Npc {
                script: VecDeque::new(),
            },
        }
    }

    /// Lines spoken verbatim on the next turns instead of generating.
    pub fn with_script(mut self, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let ActorRole::Npc { script } = &mut self.role {
            script.extend(lines.into_iter().map(Into::into));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.character.name
    }

    pub fn is_player(&self) -> bool {
        matches!(self.role, ActorRole::Player { .. })
    }

    /// Skip the player's next `turns` turns.
    pub fn mute(&mut self, turns: u32) {
        if let ActorRole::Player { muted, .. } = &mut self.role {
            *muted = turns;
        }
    }

    /// Let the conversation agent speak for the player for `turns` turns.
    pub fn hand_to_ai(&mut self, turns: u32) {
        if let ActorRole::Player { ai_controlled, .. } = &mut self.role {
            *ai_controlled = turns;
        }
    }

    pub(crate) fn next_scripted_line(&mut self) -> Option<String> {
        match &mut self.role {
            ActorRole::Npc { script } => script.pop_front(),
            ActorRole::Player { .. } => None,
        }
    }

    /// Use up one muted turn, if any are left.
    pub(crate) fn take_muted_turn(&mut self) -> bool {
        match &mut self.role {
            ActorRole::Player { muted, .. } if *muted > 0 => {
                *muted -= 1;
                true
            }
            _ => false,
        }
    }

    /// Use up one AI controlled turn, if any are left.
    pub(crate) fn take_ai_turn(&mut self) -> bool {
        match &mut self.role {
            ActorRole::Player { ai_controlled, .. } if *ai_controlled > 0 => {
                *ai_controlled -= 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheet_falls_back_to_basics() {
        let c = Character::new("Elara").with_description("A ranger");
        assert_eq!(c.sheet(), "description: A ranger\ngender: female\nname: Elara");

        let c = c.with_attribute("age", "31").with_attribute("class", "ranger");
        assert_eq!(c.sheet(), "age: 31\nclass: ranger");
        assert_eq!(c.sheet_filtered(&["age"]), "class: ranger");
    }

    #[test]
    fn test_rename_rewrites_references() {
        let mut c = Character::new("Bob")
            .with_description("Bob is tall.")
            .with_attribute("motto", "Bob never sleeps")
            .with_detail("home", "Bob's cabin");
        c.rename("Robert");

        assert_eq!(c.name, "Robert");
        assert_eq!(c.description, "Robert is tall.");
        assert_eq!(c.base_attributes["motto"], "Robert never sleeps");
        assert_eq!(c.details["home"], "Robert's cabin");
        assert!(c.memory_dirty);
    }

    #[test]
    fn test_rename_from_you_only_changes_name() {
        let mut c = Character::new("You").with_description("You see a door.");
        c.rename("Kai");
        assert_eq!(c.name, "Kai");
        assert_eq!(c.description, "You see a door.");
        assert!(!c.memory_dirty);
    }

    #[test]
    fn test_introduce_main_character() {
        let mut c = Character::new("Innkeeper")
            .with_greeting("Welcome, {{User}}!")
            .with_example_dialogue(["Innkeeper: Ale, {{user}}?"]);
        c.introduce_main_character("Kai");
        assert_eq!(c.greeting_text, "Welcome, Kai!");
        assert_eq!(c.example_dialogue[0], "Innkeeper: Ale, Kai?");
    }

    #[test]
    fn test_random_dialogue_examples_are_distinct() {
        let c = Character::new("A").with_example_dialogue(["a", "b", "c"]);
        let mut picked = c.random_dialogue_examples(5);
        picked.sort();
        assert_eq!(picked, vec!["a", "b", "c"]);
        assert_eq!(c.random_dialogue_examples(2).len(), 2);
        assert!(Character::new("B").random_dialogue_example().is_empty());
    }

    #[test]
    fn test_set_color() {
        let mut c = Character::new("A");
        c.set_color(None);
        assert!(CHARACTER_COLORS.contains(&c.color.as_str()));
        c.set_color(Some("red"));
        assert_eq!(c.color, "red");
    }

    #[test]
    fn test_memory_items() {
        let mut c = Character::new("Elara")
            .with_description("Tall.\n\nQuiet.")
            .with_attribute("name", "Elara")
            .with_attribute("age", "31")
            .with_detail("fear", "spiders");
        c.history_events.push(json!({"summary": "Left home"}));
        c.history_events.push(json!({"summary": ""}));

        let texts: Vec<String> = c.memory_items().into_iter().map(|i| i.text).collect();
        assert_eq!(
            texts,
            vec![
                "Elara: Tall.",
                "Elara: Quiet.",
                "Elara's age: 31",
                "Elara - fear: spiders",
                "Left home",
            ]
        );
    }

    #[test]
    fn test_actor_turn_counters() {
        let mut player = Actor::player(Character::new("Kai"));
        assert!(player.character.is_player);
        player.mute(1);
        assert!(player.take_muted_turn());
        assert!(!player.take_muted_turn());

        player.hand_to_ai(2);
        assert!(player.take_ai_turn());
        assert!(player.take_ai_turn());
        assert!(!player.take_ai_turn());
    }

    #[test]
    fn test_npc_script_is_consumed_in_order() {
        let mut npc = Actor::npc(Character::new("Bob")).with_script(["Bob: one", "Bob: two"]);
        assert_eq!(npc.next_scripted_line().as_deref(), Some("Bob: one"));
        assert_eq!(npc.next_scripted_line().as_deref(), Some("Bob: two"));
        assert_eq!(npc.next_scripted_line(), None);
    }

    #[test]
    fn test_character_defaults_from_json() {
        let c: Character = serde_json::from_str(r#"{"name": "Ann"}"#).unwrap();
        assert_eq!(c.gender, "female");
        assert_eq!(c.color, "cyan");
        assert!(!c.is_player);
    }
}
