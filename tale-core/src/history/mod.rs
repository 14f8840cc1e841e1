//! The scene history.
//!
//! [`HistoryStore`] owns the ordered live messages, the archive of
//! summaries, the summarization layers and the scene clock. Every mutation
//! goes through it so the clock and the single-director-per-source rule
//! stay consistent, and so observers hear about each change.

mod archive;
mod time;

pub use archive::{ArchiveEntry, LayerEntry};

use crate::clock::IsoDuration;
use crate::context::TokenCounter;
use crate::error::HistoryError;
use crate::events::{EventSink, SceneEvent};
use crate::id::{IdGenerator, MessageId};
use crate::message::{ConversationFormat, DirectionMode, Message, MessageKind};
use tracing::{debug, info, warn};

/// Scan limit used by [`HistoryStore::collect`] when the filter sets none.
pub const DEFAULT_COLLECT_SCAN: usize = 100;

/// Selects messages by kind and source within a bounded backward scan.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    kinds: Vec<MessageKind>,
    source: Option<String>,
    max_scan: Option<usize>,
}

impl MessageFilter {
    /// Matches every message.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches messages of one kind.
    pub fn kind(kind: MessageKind) -> Self {
        Self::default().with_kind(kind)
    }

    /// Also accept `kind`.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Only messages whose `source` equals `source`.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Examine at most `n` messages.
    pub fn with_max_scan(mut self, n: usize) -> Self {
        self.max_scan = Some(n);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&message.kind()))
            && self
                .source
                .as_deref()
                .map_or(true, |source| message.source == source)
    }
}

/// Ordered scene history with its summaries and clock.
#[derive(Debug, Default)]
pub struct HistoryStore {
    messages: Vec<Message>,
    archived: Vec<ArchiveEntry>,
    layers: Vec<Vec<LayerEntry>>,
    clock: IsoDuration,
    ids: IdGenerator,
    events: EventSink,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish changes on `events` instead of a private channel.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Rebuild a store from saved parts.
    ///
    /// Ids continue past the highest stored id; messages saved without an
    /// id get a fresh one.
    pub fn from_parts(
        messages: Vec<Message>,
        archived: Vec<ArchiveEntry>,
        layers: Vec<Vec<LayerEntry>>,
        clock: IsoDuration,
    ) -> Self {
        let mut ids = IdGenerator::new();
        for message in &messages {
            ids.observe(message.id);
        }

        let messages = messages
            .into_iter()
            .map(|mut m| {
                if !m.id.is_assigned() {
                    m.id = ids.next_id();
                }
                m
            })
            .collect();

        Self {
            messages,
            archived,
            layers,
            clock,
            ids,
            events: EventSink::new(),
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn archived(&self) -> &[ArchiveEntry] {
        &self.archived
    }

    pub fn layers(&self) -> &[Vec<LayerEntry>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Current scene time.
    pub fn clock(&self) -> IsoDuration {
        self.clock
    }

    pub fn set_clock(&mut self, ts: IsoDuration) {
        self.clock = ts;
    }

    /// The id the next appended message will receive is greater than this.
    pub fn last_id(&self) -> MessageId {
        self.ids.last()
    }

    /// Move the scene clock forward by `ts`.
    pub fn advance_time(&mut self, ts: IsoDuration) -> Result<(), HistoryError> {
        let advanced = self.clock.checked_add(ts)?;
        debug!(ts = %ts, scene_ts = %self.clock, advanced = %advanced, "advance_time");
        self.clock = advanced;
        Ok(())
    }

    /// Append messages in order.
    ///
    /// The batch is checked up front; a malformed message rejects the whole
    /// batch without touching the store. A director message evicts the
    /// previous director message with the same source, and a time passage
    /// advances the clock. One `history_add` is published per message once
    /// the batch is in.
    pub fn append(
        &mut self,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<Vec<MessageId>, HistoryError> {
        let batch: Vec<Message> = messages.into_iter().collect();
        for message in &batch {
            message.validate()?;
        }

        // sum the clock first so an overflow also leaves the store untouched
        let mut clock = self.clock;
        for message in &batch {
            if let Some(ts) = message.ts() {
                clock = clock.checked_add(ts)?;
            }
        }

        let mut appended = Vec::with_capacity(batch.len());
        for mut message in batch {
            if message.id.is_assigned() {
                self.ids.observe(message.id);
            } else {
                message.id = self.ids.next_id();
            }
            message.compact_meta();

            if message.is(MessageKind::Director) {
                self.evict_director(&message.source);
            }
            if let Some(ts) = message.ts() {
                debug!(ts = %ts, "time passage appended");
            }

            appended.push(message.id);
            self.messages.push(message);
        }
        self.clock = clock;

        // a later director in the same batch may have evicted an earlier one
        for message in self.messages.iter().filter(|m| appended.contains(&m.id)) {
            self.events.publish(SceneEvent::HistoryAdd {
                message: message.clone(),
            });
        }

        Ok(appended)
    }

    /// Convenience for appending a single message.
    pub fn push(&mut self, message: Message) -> Result<MessageId, HistoryError> {
        let ids = self.append([message])?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    fn evict_director(&mut self, source: &str) {
        let position = self
            .messages
            .iter()
            .rposition(|m| m.is(MessageKind::Director) && m.source == source);

        if let Some(idx) = position {
            let evicted = self.messages.remove(idx);
            debug!(id = %evicted.id, source, "evicted previous director message");
        }
    }

    /// Replace the text of message `id`. Returns whether it was found.
    pub fn edit(&mut self, id: MessageId, text: impl Into<String>) -> bool {
        let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == id) else {
            warn!(id = %id, "message_edited: no such message");
            return false;
        };

        message.text = text.into();
        info!(id = %id, "message_edited");
        let message = message.clone();
        self.events.publish(SceneEvent::MessageEdited { message });
        true
    }

    /// Remove message `id`.
    ///
    /// Removing a time passage re-synchronizes the scene clock.
    pub fn delete(&mut self, id: MessageId) -> Option<Message> {
        let idx = self.index_of(id)?;
        let removed = self.messages.remove(idx);
        info!(id = %id, "deleted message");
        self.events.publish(SceneEvent::RemoveMessage { id });

        if removed.is(MessageKind::TimePassage) {
            if let Err(e) = self.sync_time() {
                warn!(error = %e, "sync_time failed after delete");
            }
        }

        Some(removed)
    }

    /// Remove and return the newest message, without notification.
    pub fn pop_last(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id == id)
    }

    /// Most recent match within the filter's scan limit (unbounded by default).
    pub fn find_last(&self, filter: &MessageFilter) -> Option<&Message> {
        let scan = filter.max_scan.unwrap_or(usize::MAX);
        self.messages
            .iter()
            .rev()
            .take(scan)
            .find(|m| filter.matches(m))
    }

    /// Up to `max_results` matches from the newest `max_scan` messages,
    /// returned oldest first.
    pub fn collect(&self, filter: &MessageFilter, max_results: Option<usize>) -> Vec<&Message> {
        let scan = filter.max_scan.unwrap_or(DEFAULT_COLLECT_SCAN);
        let limit = max_results.unwrap_or(usize::MAX);

        let mut found: Vec<&Message> = self
            .messages
            .iter()
            .rev()
            .take(scan)
            .filter(|m| filter.matches(m))
            .take(limit)
            .collect();
        found.reverse();
        found
    }

    /// Remove the first (or every) match, scanning from the newest end, or
    /// from the oldest when `reverse` is set.
    pub fn pop_matching(&mut self, filter: &MessageFilter, all: bool, reverse: bool) -> Vec<Message> {
        let scan = filter.max_scan.unwrap_or(usize::MAX);
        let len = self.messages.len();
        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new(0..len)
        } else {
            Box::new((0..len).rev())
        };

        let mut hits = Vec::new();
        for idx in order.take(scan) {
            if filter.matches(&self.messages[idx]) {
                hits.push(idx);
                if !all {
                    break;
                }
            }
        }

        // remove from the back so earlier indices stay valid
        let mut sorted = hits.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed: Vec<(usize, Message)> = sorted
            .into_iter()
            .map(|idx| (idx, self.messages.remove(idx)))
            .collect();

        // hand back in scan order
        removed.sort_by_key(|(idx, _)| hits.iter().position(|h| h == idx));
        removed.into_iter().map(|(_, m)| m).collect()
    }

    /// Newest character message typed by the player.
    pub fn last_player_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is(MessageKind::Character) && m.source == "player")
    }

    /// Name of the character who spoke last.
    pub fn prev_actor(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is(MessageKind::Character))
            .and_then(Message::character_name)
    }

    /// Count messages by kind and by `source` or speaking character.
    pub fn count(&self, kind: Option<MessageKind>, source: Option<&str>) -> usize {
        self.messages
            .iter()
            .filter(|m| kind.map_or(true, |k| m.is(k)))
            .filter(|m| {
                source.map_or(true, |s| m.source == s || m.secondary_source() == s)
            })
            .count()
    }

    /// The last `lines` messages rendered in `format`, skipping `ignore`d
    /// kinds. `start` ends the window at that index instead of the tail.
    pub fn snapshot(
        &self,
        lines: usize,
        ignore: Option<&[MessageKind]>,
        start: Option<usize>,
        format: ConversationFormat,
    ) -> String {
        const DEFAULT_IGNORE: [MessageKind; 3] = [
            MessageKind::Reinforcement,
            MessageKind::Director,
            MessageKind::ContextInvestigation,
        ];
        let ignore = ignore.unwrap_or(&DEFAULT_IGNORE);

        let upto = match start {
            Some(s) => (s + 1).min(self.messages.len()),
            None => self.messages.len(),
        };
        let segment = &self.messages[upto.saturating_sub(lines)..upto];

        let mut collected: Vec<String> = segment
            .iter()
            .rev()
            .filter(|m| !ignore.contains(&m.kind()))
            .take(lines)
            .map(|m| m.as_format(format, DirectionMode::Direction))
            .collect();
        collected.reverse();
        collected.join("\n")
    }

    /// The newest visible messages until `max_tokens` is reached, oldest
    /// first. The message that reaches the limit is included, so the
    /// result can run past it by one message.
    pub fn recent(&self, max_tokens: usize, counter: &dyn TokenCounter) -> Vec<&Message> {
        let mut used = 0;
        let mut picked = Vec::new();
        for message in self.messages.iter().rev().filter(|m| !m.is_hidden()) {
            used += counter.count(&message.text);
            picked.push(message);
            if used >= max_tokens {
                break;
            }
        }
        picked.reverse();
        picked
    }

    /// Record a new summary.
    ///
    /// Summaries tied to the live history must not reach back before the
    /// previous summary's end.
    pub fn push_archive(&mut self, entry: ArchiveEntry) -> Result<(), HistoryError> {
        if let Some(end) = entry.end {
            let previous = self.archived.iter().rev().find_map(|e| e.end);
            if let Some(previous) = previous.filter(|p| end < *p) {
                return Err(HistoryError::NonMonotonicEnd {
                    lane: "archive".to_string(),
                    end,
                    previous,
                });
            }
        }

        debug!(end = ?entry.end, ts = ?entry.ts, "archive_add");
        self.archived.push(entry.clone());
        self.events.publish(SceneEvent::ArchiveAdd { entry });
        Ok(())
    }

    /// Append to summarization layer `layer`, creating it if it is the next
    /// one up.
    pub fn push_layer_entry(&mut self, layer: usize, entry: LayerEntry) -> Result<(), HistoryError> {
        if layer > self.layers.len() {
            return Err(HistoryError::NoSuchLayer { layer });
        }

        let below = if layer == 0 {
            self.archived.len()
        } else {
            self.layers[layer - 1].len()
        };
        if entry.end >= below {
            return Err(HistoryError::EndOutOfRange {
                end: entry.end,
                len: below,
            });
        }

        if layer == self.layers.len() {
            self.layers.push(Vec::new());
        }
        let entries = &mut self.layers[layer];
        if let Some(previous) = entries.last().map(|e| e.end).filter(|p| entry.end < *p) {
            return Err(HistoryError::NonMonotonicEnd {
                lane: format!("layer {layer}"),
                end: entry.end,
                previous,
            });
        }

        entries.push(entry);
        Ok(())
    }

    /// Drop the live history and everything summarized from it, keeping
    /// the scene's backstory.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.archived.retain(ArchiveEntry::is_static);
        self.layers.clear();
        if let Err(e) = self.sync_time() {
            warn!(error = %e, "sync_time failed after reset");
            self.clock = IsoDuration::zero();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(messages: Vec<Message>) -> HistoryStore {
        let mut store = HistoryStore::new();
        store.append(messages).unwrap();
        store
    }

    #[test]
    fn test_ids_are_assigned_in_order() {
        let mut store = HistoryStore::new();
        let ids = store
            .append([Message::narrator("a"), Message::narrator("b")])
            .unwrap();
        assert_eq!(ids, vec![MessageId::new(1), MessageId::new(2)]);
        assert_eq!(store.push(Message::narrator("c")).unwrap(), MessageId::new(3));
    }

    #[test]
    fn test_ids_are_per_store() {
        let mut a = HistoryStore::new();
        let mut b = HistoryStore::new();
        assert_eq!(a.push(Message::narrator("x")).unwrap(), MessageId::new(1));
        assert_eq!(b.push(Message::narrator("y")).unwrap(), MessageId::new(1));
    }

    #[test]
    fn test_director_eviction() {
        let mut store = HistoryStore::new();
        store.push(Message::director("Bob: sit down", "Bob")).unwrap();
        store.push(Message::narrator("The room darkens.")).unwrap();
        store.push(Message::director("Alice: stand up", "Alice")).unwrap();
        store.push(Message::director("Bob: stand up", "Bob")).unwrap();

        let bob = store.collect(
            &MessageFilter::kind(MessageKind::Director).with_source("Bob"),
            None,
        );
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].text, "Bob: stand up");
        assert_eq!(store.count(Some(MessageKind::Director), None), 2);
    }

    #[test]
    fn test_director_eviction_within_batch() {
        let store = store_with(vec![
            Message::director("Bob: one", "Bob"),
            Message::director("Bob: two", "Bob"),
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].text, "Bob: two");
    }

    #[test]
    fn test_time_passage_advances_clock() {
        let store = store_with(vec![
            Message::time_passage(IsoDuration::days(1), "A day later"),
            Message::character("Alice: hi"),
            Message::time_passage(IsoDuration::hours(3), "Later"),
        ]);
        assert_eq!(store.clock().to_string(), "P1DT3H");
    }

    #[test]
    fn test_malformed_batch_is_rejected_whole() {
        let mut store = HistoryStore::new();
        let result = store.append([
            Message::narrator("fine"),
            Message::time_passage(IsoDuration::days(1), "later"),
            Message::character("no speaker here"),
        ]);
        assert!(matches!(result, Err(HistoryError::MissingSpeaker { .. })));
        assert!(store.is_empty());
        assert!(store.clock().is_zero());
    }

    #[test]
    fn test_history_add_events_after_batch() {
        let mut store = HistoryStore::new();
        let mut rx = store.events().subscribe();
        store
            .append([Message::narrator("a"), Message::narrator("b")])
            .unwrap();

        for expected in ["a", "b"] {
            match rx.try_recv().unwrap() {
                SceneEvent::HistoryAdd { message } => assert_eq!(message.text, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_edit() {
        let mut store = store_with(vec![Message::narrator("old")]);
        let mut rx = store.events().subscribe();

        assert!(store.edit(MessageId::new(1), "new"));
        assert_eq!(store.get(MessageId::new(1)).unwrap().text, "new");
        assert!(matches!(rx.try_recv().unwrap(), SceneEvent::MessageEdited { .. }));

        assert!(!store.edit(MessageId::new(99), "nothing"));
    }

    #[test]
    fn test_delete_time_passage_resyncs_clock() {
        let mut store = store_with(vec![
            Message::time_passage(IsoDuration::days(1), "later"),
            Message::time_passage(IsoDuration::days(2), "later still"),
        ]);
        assert_eq!(store.clock(), IsoDuration::days(3));

        let removed = store.delete(MessageId::new(2)).unwrap();
        assert_eq!(removed.ts(), Some(IsoDuration::days(2)));
        assert_eq!(store.clock(), IsoDuration::days(1));
        assert!(store.delete(MessageId::new(2)).is_none());
    }

    #[test]
    fn test_find_last_respects_scan_limit() {
        let store = store_with(vec![
            Message::narrator("old narration"),
            Message::character("Alice: one"),
            Message::character("Alice: two"),
        ]);

        let narration = MessageFilter::kind(MessageKind::Narrator);
        assert_eq!(store.find_last(&narration).unwrap().text, "old narration");
        assert!(store.find_last(&narration.clone().with_max_scan(2)).is_none());

        let dialogue = MessageFilter::kind(MessageKind::Character).with_kind(MessageKind::Narrator);
        assert_eq!(store.find_last(&dialogue).unwrap().text, "Alice: two");
    }

    #[test]
    fn test_collect_is_chronological() {
        let store = store_with(vec![
            Message::character("Alice: one"),
            Message::narrator("n"),
            Message::character("Alice: two"),
            Message::character("Alice: three"),
        ]);

        let filter = MessageFilter::kind(MessageKind::Character);
        let texts: Vec<&str> = store
            .collect(&filter, Some(2))
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["Alice: two", "Alice: three"]);

        assert_eq!(store.collect(&filter, None).len(), 3);
        assert_eq!(store.collect(&filter.with_max_scan(1), None).len(), 1);
    }

    #[test]
    fn test_pop_matching() {
        let mut store = store_with(vec![
            Message::narrator("first"),
            Message::character("Alice: hi"),
            Message::narrator("second"),
        ]);
        let narration = MessageFilter::kind(MessageKind::Narrator);

        let popped = store.pop_matching(&narration, false, false);
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].text, "second");

        let popped = store.pop_matching(&narration, false, true);
        assert_eq!(popped[0].text, "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pop_matching_all_in_scan_order() {
        let mut store = store_with(vec![
            Message::narrator("a"),
            Message::narrator("b"),
            Message::character("Alice: hi"),
            Message::narrator("c"),
        ]);
        let popped = store.pop_matching(&MessageFilter::kind(MessageKind::Narrator), true, false);
        let texts: Vec<&str> = popped.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "b", "a"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pop_matching_without_match_is_noop() {
        let mut store = store_with(vec![Message::narrator("a"), Message::character("Bob: b")]);
        let popped = store.pop_matching(&MessageFilter::kind(MessageKind::Director), false, false);
        assert!(popped.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_recent_includes_message_reaching_limit() {
        let words = |text: &str| text.split_whitespace().count();
        let store = store_with(vec![
            Message::character("Bob: one two"),
            Message::character("Bob: three four five").hidden(),
            Message::character("Ann: six seven"),
            Message::character("Bob: eight"),
        ]);

        // 2 + 3 crosses 4, the crossing line is kept
        let texts: Vec<_> = store.recent(4, &words).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Ann: six seven", "Bob: eight"]);

        let texts: Vec<_> = store.recent(5, &words).iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Ann: six seven", "Bob: eight"]);

        assert_eq!(store.recent(100, &words).len(), 3);
        assert_eq!(store.recent(0, &words).len(), 1);
    }

    #[test]
    fn test_speakers() {
        let store = store_with(vec![
            Message::player("Hero: hello"),
            Message::character("Alice: hi"),
            Message::narrator("n"),
        ]);
        assert_eq!(store.prev_actor().as_deref(), Some("Alice"));
        assert_eq!(store.last_player_message().unwrap().text, "Hero: hello");
        assert_eq!(store.count(Some(MessageKind::Character), Some("Alice")), 1);
        assert_eq!(store.count(None, Some("player")), 1);
        assert_eq!(store.count(None, None), 3);
    }

    #[test]
    fn test_snapshot() {
        let store = store_with(vec![
            Message::character("Alice: one"),
            Message::director("Bob: act", "Bob"),
            Message::character("Bob: two"),
        ]);
        assert_eq!(
            store.snapshot(3, None, None, ConversationFormat::Chat),
            "Alice: one\nBob: two"
        );
        assert_eq!(
            store.snapshot(2, None, Some(0), ConversationFormat::Chat),
            "Alice: one"
        );
    }

    #[test]
    fn test_archive_end_is_monotonic() {
        let mut store = HistoryStore::new();
        store
            .push_archive(ArchiveEntry::backstory("Long ago", None))
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("s1", 0, 5, IsoDuration::zero()))
            .unwrap();
        let err = store
            .push_archive(ArchiveEntry::summary("s0", 0, 3, IsoDuration::zero()))
            .unwrap_err();
        assert!(matches!(err, HistoryError::NonMonotonicEnd { end: 3, previous: 5, .. }));
        assert_eq!(store.archived().len(), 2);
    }

    #[test]
    fn test_layer_entries() {
        let mut store = HistoryStore::new();
        for end in [2, 4] {
            store
                .push_archive(ArchiveEntry::summary("s", 0, end, IsoDuration::zero()))
                .unwrap();
        }

        assert!(matches!(
            store.push_layer_entry(1, LayerEntry::new("x", 0, 0)),
            Err(HistoryError::NoSuchLayer { layer: 1 })
        ));
        assert!(matches!(
            store.push_layer_entry(0, LayerEntry::new("x", 0, 2)),
            Err(HistoryError::EndOutOfRange { end: 2, len: 2 })
        ));

        store.push_layer_entry(0, LayerEntry::new("chapter", 0, 1)).unwrap();
        store.push_layer_entry(1, LayerEntry::new("book", 0, 0)).unwrap();
        assert_eq!(store.layers().len(), 2);
    }

    #[test]
    fn test_from_parts_resumes_ids() {
        let messages = vec![
            Message::narrator("a").with_id(MessageId::new(7)),
            Message::narrator("b"),
        ];
        let mut store = HistoryStore::from_parts(messages, vec![], vec![], IsoDuration::zero());
        assert_eq!(store.messages()[1].id, MessageId::new(8));
        assert_eq!(store.push(Message::narrator("c")).unwrap(), MessageId::new(9));
    }

    #[test]
    fn test_reset_keeps_backstory() {
        let mut store = store_with(vec![Message::time_passage(IsoDuration::days(4), "later")]);
        store
            .push_archive(ArchiveEntry::backstory("Before", Some(IsoDuration::days(1))))
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("s", 0, 1, IsoDuration::days(5)))
            .unwrap();

        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.archived().len(), 1);
        assert_eq!(store.clock(), IsoDuration::days(1));
    }
}
