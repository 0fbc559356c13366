//! `LatestEvents` — the bounded ring of recent user-visible events the
//! terminal collaborator renders (§3).
//!
//! Older entries collapse into a single "(N more events)" marker rather than
//! scrolling the terminal forever.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default ring capacity (§3: "a small ring (≤ ~10)").
pub const DEFAULT_CAPACITY: usize = 10;

/// One entry in the event timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    /// Unix epoch milliseconds when the event was recorded.
    pub at_millis: u128,
    /// Human-readable summary, e.g. "Changed src/Main.elm".
    pub summary: String,
}

impl TimelineEvent {
    fn now(summary: impl Into<String>) -> Self {
        let at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self {
            at_millis,
            summary: summary.into(),
        }
    }
}

/// A bounded ring of recent events plus a running count of how many were
/// evicted, so the renderer can show "(N more events)".
#[derive(Debug, Clone, Default)]
pub struct LatestEvents {
    capacity: usize,
    entries: VecDeque<TimelineEvent>,
    dropped: u64,
}

impl LatestEvents {
    /// Creates a new timeline with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a new timeline with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
            dropped: 0,
        }
    }

    /// Records a new event, evicting the oldest if the ring is full.
    pub fn record(&mut self, summary: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(TimelineEvent::now(summary));
    }

    /// Returns the retained events, oldest first.
    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.entries.iter()
    }

    /// Number of events evicted from the ring so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Renders the timeline as lines suitable for terminal display, with a
    /// trailing "(N more events)" line when entries have been evicted.
    #[must_use]
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.entries.iter().map(|e| e.summary.clone()).collect();
        if self.dropped > 0 {
            lines.insert(0, format!("({} more events)", self.dropped));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_within_capacity() {
        let mut timeline = LatestEvents::with_capacity(3);
        timeline.record("a");
        timeline.record("b");
        let lines = timeline.render_lines();
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(timeline.dropped(), 0);
    }

    #[test]
    fn evicts_oldest_and_counts_dropped() {
        let mut timeline = LatestEvents::with_capacity(2);
        timeline.record("a");
        timeline.record("b");
        timeline.record("c");
        let lines = timeline.render_lines();
        assert_eq!(lines, vec!["(1 more events)", "b", "c"]);
        assert_eq!(timeline.dropped(), 1);
    }

    #[test]
    fn default_capacity_matches_spec() {
        let timeline = LatestEvents::new();
        assert_eq!(timeline.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn entries_preserve_order() {
        let mut timeline = LatestEvents::with_capacity(5);
        for i in 0..3 {
            timeline.record(format!("event-{i}"));
        }
        let summaries: Vec<&str> = timeline.entries().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["event-0", "event-1", "event-2"]);
    }
}
