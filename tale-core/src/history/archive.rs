//! Summaries of live history.

use crate::clock::IsoDuration;
use serde::{Deserialize, Serialize};

/// One summarized span of the live history.
///
/// Entries without an `end` are static backstory entered with the scene;
/// they are never tied to a range of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub text: String,

    /// Scene time at the end of the summarized span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<IsoDuration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,

    /// Index into the live history up to which this entry summarizes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl ArchiveEntry {
    /// A summary of `history[start..end]`.
    pub fn summary(text: impl Into<String>, start: usize, end: usize, ts: IsoDuration) -> Self {
        Self {
            text: text.into(),
            ts: Some(ts),
            start: Some(start),
            end: Some(end),
        }
    }

    /// Backstory that precedes the live history.
    pub fn backstory(text: impl Into<String>, ts: Option<IsoDuration>) -> Self {
        Self {
            text: text.into(),
            ts,
            start: None,
            end: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.end.is_none()
    }
}

/// An entry of a summarization layer.
///
/// `start`/`end` index into the layer below, or into the archive for
/// layer 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub text: String,

    #[serde(default)]
    pub ts_start: IsoDuration,

    #[serde(default)]
    pub ts_end: IsoDuration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,

    pub end: usize,
}

impl LayerEntry {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            ts_start: IsoDuration::zero(),
            ts_end: IsoDuration::zero(),
            start: Some(start),
            end,
        }
    }

    pub fn with_times(mut self, ts_start: IsoDuration, ts_end: IsoDuration) -> Self {
        self.ts_start = ts_start;
        self.ts_end = ts_end;
        self
    }
}
