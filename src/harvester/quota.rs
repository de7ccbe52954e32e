//! Exact quota enforcement
//!
//! Workers check [`QuotaGate::is_full`] early to skip needless fetches, but
//! only a successful [`QuotaGate::try_reserve`] entitles a worker to write a
//! game record. Reservation is a compare-and-swap on one counter, so the
//! number of granted slots can never pass the maximum.

use std::sync::atomic::{AtomicU64, Ordering};

/// A granted quota slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// 1-based position of this slot within the quota
    pub number: u64,

    /// This slot filled the quota
    pub is_last: bool,
}

/// Shared valid-game counter with a hard ceiling
#[derive(Debug)]
pub struct QuotaGate {
    max: u64,
    count: AtomicU64,
}

impl QuotaGate {
    /// Creates a gate with `already` slots taken by earlier runs
    pub fn new(max: u64, already: u64) -> Self {
        Self {
            max,
            count: AtomicU64::new(already.min(max)),
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.count())
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.max
    }

    /// Takes one slot, or `None` if the quota is already met
    pub fn try_reserve(&self) -> Option<Slot> {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            if current >= self.max {
                return None;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    let number = current + 1;
                    return Some(Slot {
                        number,
                        is_last: number == self.max,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Gives back a slot whose record was never written
    pub fn release(&self, _slot: Slot) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_until_full() {
        let gate = QuotaGate::new(2, 0);

        let first = gate.try_reserve().unwrap();
        assert_eq!(first, Slot { number: 1, is_last: false });

        let second = gate.try_reserve().unwrap();
        assert!(second.is_last);

        assert!(gate.is_full());
        assert!(gate.try_reserve().is_none());
        assert_eq!(gate.count(), 2);
    }

    #[test]
    fn test_previous_runs_count() {
        let gate = QuotaGate::new(5, 4);
        assert_eq!(gate.remaining(), 1);
        assert!(gate.try_reserve().unwrap().is_last);

        let over = QuotaGate::new(3, 10);
        assert!(over.is_full());
        assert_eq!(over.count(), 3);
    }

    #[test]
    fn test_release_frees_slot() {
        let gate = QuotaGate::new(1, 0);
        let slot = gate.try_reserve().unwrap();
        gate.release(slot);
        assert!(!gate.is_full());
        assert!(gate.try_reserve().is_some());
    }

    #[test]
    fn test_concurrent_reservations_never_overshoot() {
        let gate = Arc::new(QuotaGate::new(50, 0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    let mut granted = Vec::new();
                    while let Some(slot) = gate.try_reserve() {
                        granted.push(slot);
                    }
                    granted
                })
            })
            .collect();

        let slots: Vec<Slot> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(slots.len(), 50);
        assert_eq!(slots.iter().filter(|s| s.is_last).count(), 1);
        assert_eq!(gate.count(), 50);
    }
}
