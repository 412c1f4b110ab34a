use std::cell::Cell;

use parking_lot::ReentrantMutex;

/// Process-wide event sequence counter.
///
/// The lock is held while an event is allocated *and* delivered, so two
/// threads emitting concurrently deliver in sequence order. It is reentrant:
/// a subscriber that emits from inside its handler re-enters on the same
/// thread and receives the next number.
#[derive(Debug, Default)]
pub struct Sequencer {
    last: ReentrantMutex<Cell<u64>>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence of the most recently emitted event (0 before the first).
    pub fn current(&self) -> u64 {
        self.last.lock().get()
    }

    /// Restore the counter, typically from the highest persisted sequence.
    /// Never moves backwards.
    pub fn restore(&self, sequence: u64) {
        let guard = self.last.lock();
        if sequence > guard.get() {
            guard.set(sequence);
        }
    }

    /// Allocate the next sequence and run `f` with the lock held.
    pub fn with_next<R>(&self, f: impl FnOnce(u64) -> R) -> R {
        let guard = self.last.lock();
        let next = guard.get() + 1;
        guard.set(next);
        f(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_one() {
        let seq = Sequencer::new();
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.with_next(|n| n), 1);
        assert_eq!(seq.with_next(|n| n), 2);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn restore_only_moves_forward() {
        let seq = Sequencer::new();
        seq.restore(41);
        assert_eq!(seq.with_next(|n| n), 42);
        seq.restore(10);
        assert_eq!(seq.current(), 42);
    }

    #[test]
    fn nested_allocation_on_same_thread() {
        let seq = Sequencer::new();
        let (outer, inner) = seq.with_next(|outer| (outer, seq.with_next(|inner| inner)));
        assert_eq!(outer, 1);
        assert_eq!(inner, 2);
    }
}
