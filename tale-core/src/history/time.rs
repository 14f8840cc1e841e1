//! Scene clock reconciliation.
//!
//! [`HistoryStore::sync_time`] is the incremental variant: trust the newest
//! timestamped summary and replay the time passages after it.
//! [`HistoryStore::fix_time`] treats the live history as the only source of
//! truth and rewrites summary timestamps from it.

use super::{HistoryStore, LayerEntry};
use crate::clock::IsoDuration;
use crate::error::HistoryError;
use crate::message::Message;
use tracing::{debug, error, info};

/// Everything [`HistoryStore::fix_time`] would change, computed up front so
/// a failure leaves the store as it was.
struct TimeFix {
    archive_ts: Vec<Option<IsoDuration>>,
    layer_ts: Vec<Vec<(IsoDuration, IsoDuration)>>,
    clock: IsoDuration,
}

impl HistoryStore {
    /// Recompute the clock from the newest timestamped summary plus every
    /// time passage from that summary's end onwards.
    pub fn sync_time(&mut self) -> Result<IsoDuration, HistoryError> {
        let baseline = self
            .archived
            .iter()
            .rev()
            .find_map(|entry| entry.ts)
            .unwrap_or_default();

        let from = self
            .archived
            .last()
            .and_then(|entry| entry.end)
            .unwrap_or(0);

        let mut ts = baseline;
        for message in self.messages.iter().skip(from) {
            if let Some(jump) = message.ts() {
                ts = ts.checked_add(jump)?;
            }
        }

        self.clock = ts;
        info!(ts = %ts, "sync_time");
        Ok(ts)
    }

    /// Rebuild every summary timestamp and the clock from the time passages
    /// in the live history.
    ///
    /// Best effort: on failure the error is logged and nothing changes.
    /// Returns the resulting clock.
    pub fn fix_time(&mut self) -> IsoDuration {
        match self.plan_time_fix() {
            Ok(fix) => {
                for (entry, ts) in self.archived.iter_mut().zip(fix.archive_ts) {
                    if ts.is_some() {
                        entry.ts = ts;
                    }
                }
                for (layer, times) in self.layers.iter_mut().zip(fix.layer_ts) {
                    for (entry, (start, end)) in layer.iter_mut().zip(times) {
                        entry.ts_start = start;
                        entry.ts_end = end;
                    }
                }
                debug!(ending_time = %fix.clock, "fix_time");
                self.clock = fix.clock;
            }
            Err(e) => {
                error!(error = %e, scene_ts = %self.clock, "fix_time failed, keeping scene time");
            }
        }
        self.clock
    }

    fn plan_time_fix(&self) -> Result<TimeFix, HistoryError> {
        // backstory entries before the first summary set the starting time
        let mut starting_time = IsoDuration::zero();
        for entry in &self.archived {
            if entry.end.is_some() {
                break;
            }
            if let Some(ts) = entry.ts {
                starting_time = ts;
            }
        }

        let mut cumulative: Vec<(usize, IsoDuration)> = Vec::new();
        let mut ts = starting_time;
        for (idx, message) in self.messages.iter().enumerate() {
            if let Some(jump) = message.ts() {
                ts = ts.checked_add(jump)?;
                cumulative.push((idx, ts));
            }
        }

        let Some(&(_, ending_time)) = cumulative.last() else {
            // nothing to reconcile against
            return Ok(TimeFix {
                archive_ts: vec![None; self.archived.len()],
                layer_ts: self
                    .layers
                    .iter()
                    .map(|layer| layer.iter().map(|e| (e.ts_start, e.ts_end)).collect())
                    .collect(),
                clock: starting_time,
            });
        };

        let mut running = starting_time;
        let archive_ts: Vec<Option<IsoDuration>> = self
            .archived
            .iter()
            .map(|entry| {
                let end = entry.end?;
                let best = cumulative
                    .iter()
                    .take_while(|(jump_idx, _)| *jump_idx < end)
                    .last()
                    .map(|(_, ts)| *ts);
                if let Some(best) = best {
                    running = best;
                }
                Some(running)
            })
            .collect();

        let resolved: Vec<Option<IsoDuration>> = self
            .archived
            .iter()
            .zip(&archive_ts)
            .map(|(entry, fixed)| fixed.or(entry.ts))
            .collect();

        let base: Vec<(IsoDuration, IsoDuration)> = resolved
            .iter()
            .map(|ts| {
                let ts = ts.unwrap_or_default();
                (ts, ts)
            })
            .collect();

        let mut layer_ts: Vec<Vec<(IsoDuration, IsoDuration)>> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let below = layer_ts.last().unwrap_or(&base);
            let times = span_times(layer, below)?;
            layer_ts.push(times);
        }

        Ok(TimeFix {
            archive_ts,
            layer_ts,
            clock: ending_time,
        })
    }

    /// Sum of the time passages in `messages[start..end]`, or `None` when
    /// the range holds none.
    pub fn calc_time(&self, start: usize, end: Option<usize>) -> Result<Option<IsoDuration>, HistoryError> {
        let end = end.unwrap_or(self.messages.len()).min(self.messages.len());
        let start = start.min(end);

        let mut total: Option<IsoDuration> = None;
        for jump in self.messages[start..end].iter().filter_map(Message::ts) {
            total = Some(total.unwrap_or_default().checked_add(jump)?);
        }
        Ok(total)
    }
}

/// `(ts_start, ts_end)` for each entry of a layer, taken from the entries
/// of the layer below that it spans.
fn span_times(
    layer: &[LayerEntry],
    below: &[(IsoDuration, IsoDuration)],
) -> Result<Vec<(IsoDuration, IsoDuration)>, HistoryError> {
    let lookup = |idx: usize| {
        below.get(idx).copied().ok_or(HistoryError::EndOutOfRange {
            end: idx,
            len: below.len(),
        })
    };

    let mut out = Vec::with_capacity(layer.len());
    let mut next_start = 0;
    for entry in layer {
        let (ts_start, _) = lookup(entry.start.unwrap_or(next_start))?;
        let (_, ts_end) = lookup(entry.end)?;
        out.push((ts_start, ts_end));
        next_start = entry.end + 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ArchiveEntry;

    fn days(n: i64) -> IsoDuration {
        IsoDuration::days(n)
    }

    #[test]
    fn test_fix_time_three_days() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::time_passage(days(1), "A day later"),
                Message::character("Alice: hi"),
                Message::time_passage(days(2), "Two days later"),
            ])
            .unwrap();
        store.set_clock(IsoDuration::zero());

        assert_eq!(store.fix_time(), days(3));
        assert_eq!(store.clock().to_string(), "P3D");
    }

    #[test]
    fn test_fix_time_is_idempotent() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::time_passage(days(1), "later"),
                Message::narrator("n"),
                Message::time_passage(IsoDuration::hours(5), "later"),
            ])
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("first", 0, 2, IsoDuration::zero()))
            .unwrap();

        let first = store.fix_time();
        let archived = store.archived().to_vec();
        let second = store.fix_time();
        assert_eq!(first, second);
        assert_eq!(archived, store.archived());
    }

    #[test]
    fn test_fix_time_assigns_archive_timestamps() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::narrator("start"),
                Message::time_passage(days(1), "later"), // idx 1
                Message::narrator("middle"),
                Message::time_passage(days(2), "later"), // idx 3
                Message::narrator("end"),
            ])
            .unwrap();
        store
            .push_archive(ArchiveEntry::backstory("Before", Some(days(10))))
            .unwrap();
        for end in [1, 2, 5] {
            store
                .push_archive(ArchiveEntry::summary("s", 0, end, IsoDuration::zero()))
                .unwrap();
        }

        assert_eq!(store.fix_time(), days(13));

        let ts: Vec<Option<IsoDuration>> = store.archived().iter().map(|e| e.ts).collect();
        assert_eq!(
            ts,
            vec![Some(days(10)), Some(days(10)), Some(days(11)), Some(days(13))]
        );
    }

    #[test]
    fn test_fix_time_without_jumps_uses_starting_time() {
        let mut store = HistoryStore::new();
        store.push(Message::narrator("quiet")).unwrap();
        store
            .push_archive(ArchiveEntry::backstory("Before", Some(days(2))))
            .unwrap();
        store.set_clock(days(40));

        assert_eq!(store.fix_time(), days(2));
    }

    #[test]
    fn test_fix_time_rederives_layers() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::time_passage(days(1), "later"),
                Message::time_passage(days(1), "later"),
                Message::time_passage(days(1), "later"),
            ])
            .unwrap();
        for end in [1, 2, 3] {
            store
                .push_archive(ArchiveEntry::summary("s", end - 1, end, IsoDuration::zero()))
                .unwrap();
        }
        store.push_layer_entry(0, LayerEntry::new("ch1", 0, 1)).unwrap();
        store.push_layer_entry(0, LayerEntry::new("ch2", 2, 2)).unwrap();
        store.push_layer_entry(1, LayerEntry::new("book", 0, 1)).unwrap();

        store.fix_time();

        let l0 = &store.layers()[0];
        assert_eq!((l0[0].ts_start, l0[0].ts_end), (days(1), days(2)));
        assert_eq!((l0[1].ts_start, l0[1].ts_end), (days(3), days(3)));
        let l1 = &store.layers()[1];
        assert_eq!((l1[0].ts_start, l1[0].ts_end), (days(1), days(3)));
    }

    #[test]
    fn test_sync_time_uses_archive_baseline() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::time_passage(days(1), "later"),
                Message::narrator("n"),
                Message::time_passage(days(2), "later"),
            ])
            .unwrap();
        store
            .push_archive(ArchiveEntry::summary("s", 0, 2, days(5)))
            .unwrap();

        // baseline P5D, then only the jump at index 2 is replayed
        assert_eq!(store.sync_time().unwrap(), days(7));
    }

    #[test]
    fn test_calc_time() {
        let mut store = HistoryStore::new();
        store
            .append([
                Message::narrator("n"),
                Message::time_passage(days(1), "later"),
                Message::time_passage(IsoDuration::hours(2), "later"),
            ])
            .unwrap();

        assert_eq!(store.calc_time(0, Some(1)).unwrap(), None);
        assert_eq!(store.calc_time(0, None).unwrap().unwrap().to_string(), "P1DT2H");
        assert_eq!(store.calc_time(2, Some(100)).unwrap(), Some(IsoDuration::hours(2)));
    }
}
