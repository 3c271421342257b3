use std::sync::atomic::{AtomicU64, Ordering};
use chrono::Utc;

/// Source of changelog numbers.
pub trait SequenceSource: Send + Sync {
    fn next(&self) -> u64;
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Wall-clock milliseconds, bumped past the last number handed out so
/// numbers strictly increase within the process even under bursts or a
/// clock stepping backwards.
#[derive(Debug, Default)]
pub struct MonotonicClockSequence {
    last: AtomicU64,
}

impl MonotonicClockSequence {
    pub fn new() -> Self {
        MonotonicClockSequence { last: AtomicU64::new(0) }
    }
}

impl SequenceSource for MonotonicClockSequence {
    fn next(&self) -> u64 {
        let now = now_millis();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

/// Raw wall-clock milliseconds. Not unique under bursts.
#[derive(Debug, Default)]
pub struct WallClockSequence;

impl SequenceSource for WallClockSequence {
    fn next(&self) -> u64 {
        now_millis()
    }
}

/// Plain in-process counter.
#[derive(Debug)]
pub struct CounterSequence {
    next: AtomicU64,
}

impl CounterSequence {
    pub fn starting_at(first: u64) -> Self {
        CounterSequence { next: AtomicU64::new(first) }
    }
}

impl Default for CounterSequence {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl SequenceSource for CounterSequence {
    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn monotonic_clock_never_repeats() {
        let sequence = MonotonicClockSequence::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let n = sequence.next();
            assert!(n > last);
            last = n;
        }
        assert!(last >= now_millis() - 60_000);
    }

    #[test]
    fn monotonic_clock_is_unique_across_threads() {
        let sequence = Arc::new(MonotonicClockSequence::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sequence = sequence.clone();
                std::thread::spawn(move || (0..1000).map(|_| sequence.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn counter_counts() {
        let counter = CounterSequence::starting_at(7);
        assert_eq!((counter.next(), counter.next()), (7, 8));
    }
}
