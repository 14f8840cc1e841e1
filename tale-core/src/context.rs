//! Context window assembly.
//!
//! Turns a [`HistoryStore`] into the prompt segments handed to a language
//! model. The token budget is split between two lanes:
//!
//! - the *context* lane, built from archived summaries (or from the
//!   summarization layers when they exist), oldest first;
//! - the *dialogue* lane, built by walking the live history backwards until
//!   the lane's budget is spent. Up to `assured_dialogue` character lines
//!   are kept even past that budget.
//!
//! A short scene intro is prepended when the window would otherwise be
//! nearly empty.

use crate::clock::diff_to_human;
use crate::history::HistoryStore;
use crate::message::{ConversationFormat, DirectionMode, MessageBody, MessageKind};
use tracing::{debug, warn};

/// Counts tokens. Must be deterministic and free of side effects.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Tokens of several segments.
    fn count_all(&self, parts: &[String]) -> usize {
        parts.iter().map(|p| self.count(p)).sum()
    }
}

/// Roughly four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateTokenCounter;

impl TokenCounter for ApproximateTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// Which director messages reach the dialogue lane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeepDirector {
    /// None of them.
    #[default]
    No,
    /// Any director message that targets a character.
    Any,
    /// Only targeted messages with this source.
    Source(String),
}

/// Request for building a context window.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    /// Total token budget.
    pub budget: usize,
    /// Share of the budget given to the context lane.
    pub context_share: f32,
    pub keep_director: KeepDirector,
    pub keep_context_investigation: bool,
    pub include_reinforcements: bool,
    /// Minimum number of dialogue lines in the window. These are taken from
    /// before the summarized point and past the dialogue budget if needed.
    pub assured_dialogue: usize,
    pub chapter_labels: bool,
    pub layered_history_enabled: bool,
    pub format: ConversationFormat,
    pub direction_mode: DirectionMode,
    /// Below this many tokens the scene intro is prepended.
    pub min_tokens_for_intro: usize,
    pub intro: Option<String>,
    pub player_name: Option<String>,
    pub char_name: Option<String>,
}

impl Default for ContextRequest {
    fn default() -> Self {
        Self {
            budget: 8192,
            context_share: 0.5,
            keep_director: KeepDirector::No,
            keep_context_investigation: true,
            include_reinforcements: true,
            assured_dialogue: 5,
            chapter_labels: false,
            layered_history_enabled: true,
            format: ConversationFormat::Chat,
            direction_mode: DirectionMode::Direction,
            min_tokens_for_intro: 1024,
            intro: None,
            player_name: None,
            char_name: None,
        }
    }
}

impl ContextRequest {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            ..Default::default()
        }
    }

    pub fn with_context_share(mut self, share: f32) -> Self {
        self.context_share = share.clamp(0.0, 1.0);
        self
    }

    pub fn with_keep_director(mut self, keep: KeepDirector) -> Self {
        self.keep_director = keep;
        self
    }

    pub fn with_keep_context_investigation(mut self, keep: bool) -> Self {
        self.keep_context_investigation = keep;
        self
    }

    pub fn with_reinforcements(mut self, include: bool) -> Self {
        self.include_reinforcements = include;
        self
    }

    pub fn with_assured_dialogue(mut self, n: usize) -> Self {
        self.assured_dialogue = n;
        self
    }

    pub fn with_chapter_labels(mut self, labels: bool) -> Self {
        self.chapter_labels = labels;
        self
    }

    pub fn with_layered_history(mut self, enabled: bool) -> Self {
        self.layered_history_enabled = enabled;
        self
    }

    pub fn with_format(mut self, format: ConversationFormat, mode: DirectionMode) -> Self {
        self.format = format;
        self.direction_mode = mode;
        self
    }

    pub fn with_min_tokens_for_intro(mut self, n: usize) -> Self {
        self.min_tokens_for_intro = n;
        self
    }

    /// Scene intro. `{{user}}` and `{{char}}` are replaced with the player
    /// and main character names when given.
    pub fn with_intro(mut self, intro: impl Into<String>) -> Self {
        self.intro = Some(intro.into());
        self
    }

    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = Some(name.into());
        self
    }

    pub fn with_char_name(mut self, name: impl Into<String>) -> Self {
        self.char_name = Some(name.into());
        self
    }

    fn lane_budgets(&self) -> (usize, usize) {
        let context = (self.budget as f64 * f64::from(self.context_share)) as usize;
        (context, self.budget - context.min(self.budget))
    }

    fn rendered_intro(&self) -> Option<String> {
        let intro = self.intro.as_deref()?.trim();
        if intro.is_empty() {
            return None;
        }
        let mut intro = intro.to_string();
        if let Some(player) = &self.player_name {
            intro = intro.replace("{{user}}", player);
        }
        if let Some(name) = &self.char_name {
            intro = intro.replace("{{char}}", name);
        }
        Some(intro)
    }
}

/// The assembled window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltContext {
    /// Summaries, oldest first (possibly led by the intro).
    pub context: Vec<String>,
    /// Rendered messages, oldest first.
    pub dialogue: Vec<String>,
    /// Chapter labels emitted, when requested.
    pub chapter_numbers: Vec<String>,
    /// Number of character messages in the dialogue lane.
    pub character_messages: usize,
    /// Total token count
    pub token_count: usize,
}

impl BuiltContext {
    /// Every segment, context lane first.
    pub fn parts(&self) -> Vec<String> {
        self.context.iter().chain(&self.dialogue).cloned().collect()
    }

    pub fn into_parts(self) -> Vec<String> {
        let mut parts = self.context;
        parts.extend(self.dialogue);
        parts
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.dialogue.is_empty()
    }
}

/// Collapse runs of whitespace (newlines included) into single spaces.
fn condensed(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a context window from `history`.
pub fn build_context(
    history: &HistoryStore,
    request: &ContextRequest,
    counter: &dyn TokenCounter,
) -> BuiltContext {
    let (budget_context, budget_dialogue) = request.lane_budgets();

    let mut built = BuiltContext::default();
    let layers = history.layers();
    let layered = request.layered_history_enabled
        && layers.first().is_some_and(|base| !base.is_empty());

    if layered {
        context_from_layers(history, request, &mut built);
    } else {
        context_from_archive(history, budget_context, counter, &mut built);
    }

    while !built.context.is_empty() && counter.count_all(&built.context) > budget_context {
        built.context.remove(0);
    }

    dialogue_lane(history, request, budget_dialogue, counter, &mut built);

    let total = counter.count_all(&built.context) + counter.count_all(&built.dialogue);
    if total < request.min_tokens_for_intro {
        if let Some(intro) = request.rendered_intro() {
            if total + counter.count(&intro) <= request.budget {
                built.context.insert(0, intro);
            } else {
                debug!("scene intro does not fit the remaining budget");
            }
        }
    }

    built.token_count = counter.count_all(&built.context) + counter.count_all(&built.dialogue);
    built
}

fn context_from_archive(
    history: &HistoryStore,
    budget: usize,
    counter: &dyn TokenCounter,
    built: &mut BuiltContext,
) {
    let now = history.clock();
    let mut used = 0;

    for entry in history.archived().iter().rev() {
        if entry.end.is_none() {
            continue;
        }

        let text = match entry.ts {
            Some(ts) => format!("{}: {}", diff_to_human(ts, now), entry.text),
            None => entry.text.clone(),
        };
        let text = condensed(&text);

        let tokens = counter.count(&text);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        built.context.insert(0, text);
    }
}

fn context_from_layers(history: &HistoryStore, request: &ContextRequest, built: &mut BuiltContext) {
    let now = history.clock();
    let layers = history.layers();
    let num_layers = layers.len();
    let mut next_layer_start: Option<usize> = None;

    for (i, layer) in layers.iter().enumerate().rev() {
        if layer.is_empty() {
            continue;
        }

        let first = next_layer_start.unwrap_or(0);
        debug!(layer = i, next_layer_start = first, "context_history: layered history");

        let entries = layer.get(first..).unwrap_or_default();
        for (k, entry) in entries.iter().enumerate() {
            let start = diff_to_human(entry.ts_start, now);
            let end = diff_to_human(entry.ts_end, now);
            let time = if start == end {
                start
            } else {
                format!("Start:{start}, End:{end}")
            };

            let mut text = format!("{time} {}", entry.text);
            if request.chapter_labels {
                let chapter = format!("{}.{}", num_layers - i, first + k + 1);
                text = format!("### Chapter {chapter}\n{text}");
                built.chapter_numbers.push(chapter);
            }
            built.context.push(text);
        }

        if let Some(last) = entries.last() {
            next_layer_start = Some(last.end + 1);
        }
    }

    // archive entries not yet folded into the first layer
    let Some(base_start) = layers.first().and_then(|base| base.last()).map(|e| e.end + 1) else {
        return;
    };

    if request.chapter_labels {
        built.context.push("### Current\n".to_string());
    }

    for entry in history.archived().get(base_start..).unwrap_or_default() {
        let text = match entry.ts {
            Some(ts) => format!("{}: {}", diff_to_human(ts, now), entry.text),
            None => entry.text.clone(),
        };
        built.context.push(condensed(&text));
    }
}

fn dialogue_lane(
    history: &HistoryStore,
    request: &ContextRequest,
    budget: usize,
    counter: &dyn TokenCounter,
    built: &mut BuiltContext,
) {
    let messages = history.messages();

    let mut summarized_to = history.archived().last().and_then(|e| e.end).unwrap_or(0);
    if summarized_to > 0 && summarized_to >= messages.len() {
        warn!(
            summarized_to,
            history_len = messages.len(),
            "summarized_to is past the end of history, may want to regenerate the archive"
        );
        summarized_to = 0;
    }
    debug!(summarized_to, history_len = messages.len(), "context_history");

    let mut used = 0;
    let mut collected = 0;

    for (i, message) in messages.iter().enumerate().rev() {
        // already summarized, and enough dialogue to anchor the window
        if i < summarized_to && collected >= request.assured_dialogue {
            break;
        }

        if message.is_hidden() {
            continue;
        }

        match &message.body {
            MessageBody::Reinforcement if !request.include_reinforcements => continue,
            MessageBody::Director { .. } => {
                if message.character_name().is_none() {
                    continue;
                }
                match &request.keep_director {
                    KeepDirector::No => continue,
                    KeepDirector::Source(source) if message.source != *source => continue,
                    _ => {}
                }
            }
            MessageBody::ContextInvestigation { .. } if !request.keep_context_investigation => {
                continue
            }
            _ => {}
        }

        let rendered = message.as_format(request.format, request.direction_mode);
        let tokens = counter.count(&rendered);
        if used + tokens > budget {
            // past the budget only dialogue lines still owed to the floor get in
            if collected >= request.assured_dialogue {
                break;
            }
            if !message.is(MessageKind::Character) {
                continue;
            }
            debug!(collected, tokens, "assured dialogue over budget");
        }
        used += tokens;
        built.dialogue.insert(0, rendered);

        if message.is(MessageKind::Character) {
            collected += 1;
        }
    }

    built.character_messages = collected;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::IsoDuration;
    use crate::history::{ArchiveEntry, LayerEntry};
    use crate::message::Message;

    /// One token per whitespace-separated word, to keep budgets readable.
    fn words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn dialogue_store(n: usize) -> HistoryStore {
        let mut store = HistoryStore::new();
        for i in 0..n {
            store.push(Message::character(format!("Alice: line {i}"))).unwrap();
        }
        store
    }

    #[test]
    fn test_approximate_counter() {
        let counter = ApproximateTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn test_dialogue_is_chronological() {
        let store = dialogue_store(3);
        let built = build_context(&store, &ContextRequest::new(1000).with_min_tokens_for_intro(0), &words);
        assert!(built.context.is_empty());
        assert_eq!(
            built.dialogue,
            vec!["Alice: line 0", "Alice: line 1", "Alice: line 2"]
        );
        assert_eq!(built.character_messages, 3);
        assert_eq!(built.token_count, 9);
    }

    #[test]
    fn test_dialogue_budget_stops_walk() {
        let store = dialogue_store(10);
        // 3 words per line, dialogue lane gets 10 tokens
        let request = ContextRequest::new(20).with_assured_dialogue(0);
        let built = build_context(&store, &request, &words);
        assert_eq!(built.dialogue.len(), 3);
        assert_eq!(built.dialogue[2], "Alice: line 9");
        assert!(built.token_count <= 20);
    }

    #[test]
    fn test_skip_rules() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::character("Alice: visible"),
                Message::narrator("secret").hidden(),
                Message::reinforcement("tired", "mood", "Alice"),
                Message::director("Bob: sit", "Bob"),
                Message::director("Something happens", ""),
                Message::context_investigation("a clue", None),
            ])
            .unwrap();

        let base = ContextRequest::new(1000).with_min_tokens_for_intro(0);

        let built = build_context(&store, &base, &words);
        assert_eq!(built.dialogue.len(), 3);
        assert!(built.dialogue.iter().all(|d| !d.contains("secret")));
        assert!(built.dialogue.iter().all(|d| !d.contains("sit")));

        let built = build_context(
            &store,
            &base
                .clone()
                .with_reinforcements(false)
                .with_keep_context_investigation(false),
            &words,
        );
        assert_eq!(built.dialogue, vec!["Alice: visible"]);

        let built = build_context(&store, &base.clone().with_keep_director(KeepDirector::Any), &words);
        assert!(built.dialogue.contains(&"# Bob's next action: sit".to_string()));
        assert!(!built.dialogue.iter().any(|d| d.contains("Something happens")));

        let built = build_context(
            &store,
            &base.with_keep_director(KeepDirector::Source("Alice".into())),
            &words,
        );
        assert!(!built.dialogue.iter().any(|d| d.contains("Bob's next action")));
    }

    #[test]
    fn test_summarized_cutoff_with_assured_floor() {
        let mut store = dialogue_store(10);
        store
            .push_archive(ArchiveEntry::summary("the first eight lines", 0, 8, IsoDuration::zero()))
            .unwrap();

        let request = ContextRequest::new(1000)
            .with_assured_dialogue(4)
            .with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);

        // two unsummarized lines, then the floor pulls two more from the summarized range
        assert_eq!(built.character_messages, 4);
        assert_eq!(built.dialogue.first().map(String::as_str), Some("Alice: line 6"));
        assert_eq!(built.context, vec!["Recently: the first eight lines"]);
    }

    #[test]
    fn test_assured_floor_overrides_dialogue_budget() {
        let mut store = HistoryStore::new();
        for i in 0..5 {
            store
                .push(Message::character(format!("Bob: this is a long line number {i} here")))
                .unwrap();
        }

        // 9 words per line, dialogue lane gets 10 tokens
        let request = ContextRequest::new(20).with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);
        assert_eq!(built.character_messages, 5.min(request.assured_dialogue));
        assert_eq!(
            built.dialogue.first().map(String::as_str),
            Some("Bob: this is a long line number 0 here")
        );

        let request = request.with_assured_dialogue(2);
        let built = build_context(&store, &request, &words);
        assert_eq!(built.character_messages, 2);
        assert_eq!(built.token_count, 18);
    }

    #[test]
    fn test_assured_floor_skips_other_kinds_past_budget() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::character("Bob: one two three four"),
                Message::narrator("The fire crackles in the hearth tonight"),
                Message::character("Bob: five six seven eight"),
                Message::character("Ann: short"),
            ])
            .unwrap();

        // dialogue lane gets 6 tokens: "Ann: short" fits, nothing else does
        let request = ContextRequest::new(12)
            .with_assured_dialogue(3)
            .with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);

        assert_eq!(built.character_messages, 3);
        assert_eq!(
            built.dialogue,
            vec![
                "Bob: one two three four",
                "Bob: five six seven eight",
                "Ann: short",
            ]
        );

        // with no floor owed the walk stops at the budget
        let built = build_context(&store, &request.with_assured_dialogue(1), &words);
        assert_eq!(built.dialogue, vec!["Ann: short"]);
        assert!(built.token_count <= 6);
    }

    #[test]
    fn test_summarized_to_past_end_is_ignored() {
        let mut store = dialogue_store(3);
        store
            .push_archive(ArchiveEntry::summary("s", 0, 10, IsoDuration::zero()))
            .unwrap();
        let request = ContextRequest::new(1000)
            .with_assured_dialogue(0)
            .with_min_tokens_for_intro(0);
        assert_eq!(build_context(&store, &request, &words).dialogue.len(), 3);
    }

    #[test]
    fn test_archive_lane_renders_relative_time() {
        let mut store = HistoryStore::new();
        store
            .push_archive(ArchiveEntry::backstory("Long before", None))
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("They met.", 0, 0, IsoDuration::zero()))
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("They\n\nfought.", 0, 0, IsoDuration::days(1)))
            .unwrap();
        store.set_clock(IsoDuration::days(3));

        let request = ContextRequest::new(1000).with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);
        assert_eq!(
            built.context,
            vec!["3 days ago: They met.", "2 days ago: They fought."]
        );
    }

    #[test]
    fn test_archive_lane_budget_keeps_newest() {
        let mut store = HistoryStore::new();
        for i in 0..5 {
            store
                .push_archive(ArchiveEntry::summary(format!("summary {i}"), 0, 0, IsoDuration::zero()))
                .unwrap();
        }
        // each entry is "Recently: summary N" = 3 words; context lane gets 7
        let built = build_context(&store, &ContextRequest::new(14).with_min_tokens_for_intro(0), &words);
        assert_eq!(
            built.context,
            vec!["Recently: summary 3", "Recently: summary 4"]
        );
    }

    fn layered_store() -> HistoryStore {
        let mut store = HistoryStore::new();
        for i in 0..4 {
            store
                .push_archive(ArchiveEntry::summary(format!("a{i}"), 0, 0, IsoDuration::zero()))
                .unwrap();
        }
        store.push_layer_entry(0, LayerEntry::new("l0-0", 0, 1)).unwrap();
        store.push_layer_entry(0, LayerEntry::new("l0-1", 2, 2)).unwrap();
        store.push_layer_entry(1, LayerEntry::new("l1-0", 0, 0)).unwrap();
        store
    }

    #[test]
    fn test_layered_context() {
        let store = layered_store();
        let request = ContextRequest::new(1000).with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);
        assert_eq!(
            built.context,
            vec!["Recently l1-0", "Recently l0-1", "Recently: a3"]
        );
        assert!(built.chapter_numbers.is_empty());
    }

    #[test]
    fn test_layered_context_with_chapter_labels() {
        let store = layered_store();
        let request = ContextRequest::new(1000)
            .with_chapter_labels(true)
            .with_min_tokens_for_intro(0);
        let built = build_context(&store, &request, &words);
        // the most summarized layer is chapter 1; layer 0 resumes where it left off
        assert_eq!(built.chapter_numbers, vec!["1.1", "2.2"]);
        assert_eq!(built.context[0], "### Chapter 1.1\nRecently l1-0");
        assert_eq!(built.context[1], "### Chapter 2.2\nRecently l0-1");
        assert_eq!(built.context[2], "### Current\n");
        assert_eq!(built.context[3], "Recently: a3");
    }

    #[test]
    fn test_layered_history_disabled_falls_back_to_archive() {
        let store = layered_store();
        let request = ContextRequest::new(1000)
            .with_layered_history(false)
            .with_min_tokens_for_intro(0);
        assert_eq!(build_context(&store, &request, &words).context.len(), 4);
    }

    #[test]
    fn test_layered_context_trimmed_from_oldest() {
        let store = layered_store();
        // context lane gets 4 tokens: only the last two segments fit
        let built = build_context(&store, &ContextRequest::new(8).with_min_tokens_for_intro(0), &words);
        assert_eq!(built.context, vec!["Recently l0-1", "Recently: a3"]);
    }

    #[test]
    fn test_intro_fallback() {
        let store = dialogue_store(1);
        let request = ContextRequest::new(1000)
            .with_intro("{{user}} arrives at the inn.")
            .with_player_name("Hero");
        let built = build_context(&store, &request, &words);
        assert_eq!(built.context, vec!["Hero arrives at the inn."]);
        assert_eq!(built.parts().len(), 2);

        // not inserted once the window is big enough
        let built = build_context(&store, &request.clone().with_min_tokens_for_intro(2), &words);
        assert!(built.context.is_empty());

        // nor when it would break the budget
        let built = build_context(&store, &request.with_context_share(0.0), &words);
        assert_eq!(built.context.len(), 1);
        let tight = ContextRequest::new(4)
            .with_intro("a very long intro that cannot fit")
            .with_player_name("Hero");
        assert!(build_context(&store, &tight, &words).context.is_empty());
    }
}
