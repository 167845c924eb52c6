// ==============================================================================
// watermark.rs - Completion Watermark
// ==============================================================================
// Description: Tracks the highest locus every input stream has moved past
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 0.1.0
// ==============================================================================

use crate::models::{Locus, StreamId};

/// Per-stream progress and the watermark derived from it
///
/// Because every stream is sorted, a stream whose last-seen locus is `L` can
/// never again deliver anything below `L`. With locus-aligned batches it can
/// never deliver `L` itself either, so the minimum last-seen locus over the
/// open streams is complete.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    last_seen: Vec<Option<Locus>>,
    exhausted: Vec<bool>,
    current: Option<Locus>,
}

impl WatermarkTracker {
    pub fn new(streams: usize) -> Self {
        Self {
            last_seen: vec![None; streams],
            exhausted: vec![false; streams],
            current: None,
        }
    }

    /// Record a locus delivered by `stream`; loci never move backwards
    pub fn observe(&mut self, stream: StreamId, locus: Locus) {
        let slot = &mut self.last_seen[stream];
        if slot.map_or(true, |seen| locus > seen) {
            *slot = Some(locus);
        }
    }

    pub fn mark_exhausted(&mut self, stream: StreamId) {
        self.exhausted[stream] = true;
    }

    pub fn last_seen(&self, stream: StreamId) -> Option<Locus> {
        self.last_seen[stream]
    }

    pub fn all_exhausted(&self) -> bool {
        self.exhausted.iter().all(|&done| done)
    }

    /// Recompute after an ingest cycle
    ///
    /// `None` means no locus is complete yet (an open stream has delivered
    /// nothing). Once every stream is exhausted the result is `Locus::MAX`.
    pub fn recompute(&mut self) -> Option<Locus> {
        let candidate = if self.all_exhausted() {
            Some(Locus::MAX)
        } else {
            self.last_seen
                .iter()
                .zip(&self.exhausted)
                .filter(|(_, done)| !**done)
                .map(|(seen, _)| *seen)
                .try_fold(Locus::MAX, |min, seen| seen.map(|s| min.min(s)))
        };

        // Monotonic: never step back below an already published watermark
        self.current = match (self.current, candidate) {
            (Some(current), Some(next)) => Some(current.max(next)),
            (current, next) => next.or(current),
        };
        self.current
    }

    /// Whether a stream should be pulled in the next cycle
    ///
    /// A stream already past the watermark cannot lower it, so pulling it would
    /// only grow the index. The stream defining the watermark is always pulled.
    pub fn needs_more(&self, stream: StreamId) -> bool {
        if self.exhausted[stream] {
            return false;
        }
        match (self.last_seen[stream], self.current) {
            (Some(seen), Some(watermark)) => seen <= watermark,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_watermark_until_every_stream_reports() {
        let mut tracker = WatermarkTracker::new(2);
        tracker.observe(0, Locus::new(0, 100));
        assert_eq!(tracker.recompute(), None);

        tracker.observe(1, Locus::new(0, 50));
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 50)));
    }

    #[test]
    fn test_minimum_uses_chromosome_rank() {
        let mut tracker = WatermarkTracker::new(3);
        tracker.observe(0, Locus::new(1, 10));
        tracker.observe(1, Locus::new(0, 900_000));
        tracker.observe(2, Locus::new(2, 5));
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 900_000)));
    }

    #[test]
    fn test_exhausted_streams_are_ignored() {
        let mut tracker = WatermarkTracker::new(2);
        tracker.observe(0, Locus::new(0, 10));
        tracker.observe(1, Locus::new(0, 500));
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 10)));

        tracker.mark_exhausted(0);
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 500)));

        tracker.mark_exhausted(1);
        assert!(tracker.all_exhausted());
        assert_eq!(tracker.recompute(), Some(Locus::MAX));
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut tracker = WatermarkTracker::new(1);
        tracker.observe(0, Locus::new(0, 100));
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 100)));

        // A stale observation does not move the stream backwards
        tracker.observe(0, Locus::new(0, 40));
        assert_eq!(tracker.last_seen(0), Some(Locus::new(0, 100)));
        assert_eq!(tracker.recompute(), Some(Locus::new(0, 100)));
    }

    #[test]
    fn test_streams_ahead_are_not_pulled() {
        let mut tracker = WatermarkTracker::new(2);
        assert!(tracker.needs_more(0));

        tracker.observe(0, Locus::new(0, 10));
        tracker.observe(1, Locus::new(0, 500));
        tracker.recompute();
        assert!(tracker.needs_more(0));
        assert!(!tracker.needs_more(1));

        tracker.mark_exhausted(0);
        assert!(!tracker.needs_more(0));
    }
}
