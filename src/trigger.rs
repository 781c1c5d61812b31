//! Run triggers and run-number allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Fired by the scheduler for the given cron expression.
    Schedule(String),
    /// Requested on demand.
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Schedule(expr) => write!(f, "schedule ({expr})"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Process-wide monotonic run-number source.
///
/// The only way to read a number out of it is [`RunCounter::allocate`], so two
/// callers can never observe the same value.
#[derive(Debug)]
pub struct RunCounter {
    last: AtomicU64,
}

impl RunCounter {
    /// Start a counter whose first allocation returns `last + 1`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for RunCounter {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn allocations_increase() {
        let counter = RunCounter::default();
        assert_eq!(counter.allocate(), 1);
        assert_eq!(counter.allocate(), 2);
        assert_eq!(counter.allocate(), 3);
    }

    #[test]
    fn seeded_counter_continues_after_seed() {
        let counter = RunCounter::starting_after(41);
        assert_eq!(counter.allocate(), 42);
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let counter = Arc::new(RunCounter::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || (0..100).map(|_| counter.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for n in handle.join().unwrap() {
                assert!(seen.insert(n), "run number {n} allocated twice");
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().max(), Some(&800));
    }

    #[test]
    fn trigger_display() {
        assert_eq!(Trigger::Manual.to_string(), "manual");
        assert_eq!(
            Trigger::Schedule("0 2 * * 0".into()).to_string(),
            "schedule (0 2 * * 0)"
        );
    }
}
