//! Fence-gated destruction.
//!
//! Resources whose last owner let go while GPU work may still reference them
//! are parked here with the serial of the frame that released them. Dropping
//! a parked value is what destroys it, so draining simply drops the entries
//! whose serial is safe.

use std::collections::VecDeque;

use crate::fence::{FenceTracker, SubmissionSerial};

#[derive(Debug)]
struct PendingRelease<T> {
    /// Never read; dropping the entry destroys it.
    _resource: T,
    serial: SubmissionSerial,
}

#[derive(Debug)]
pub struct DeferredQueue<T> {
    entries: VecDeque<PendingRelease<T>>,
    destroyed: u64,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            destroyed: 0,
        }
    }

    /// Parks `resource` until `serial` is safe.
    ///
    /// Serials must be non-decreasing across calls.
    pub fn enqueue(&mut self, resource: T, serial: SubmissionSerial) {
        debug_assert!(
            self.entries.back().is_none_or(|last| last.serial <= serial),
            "deferred release stamped {serial} after a later serial"
        );
        self.entries.push_back(PendingRelease {
            _resource: resource,
            serial,
        });
    }

    /// Destroys entries from the oldest while their serial is safe, or all of
    /// them when `force` is set. Returns the number destroyed.
    ///
    /// Forcing is for shutdown, after the device has gone idle.
    pub fn drain(&mut self, fence: &FenceTracker, force: bool) -> usize {
        if force && !self.entries.is_empty() && !fence.is_idle() {
            log::error!(
                "forcing destruction of {} resources while GPU work up to {} is outstanding (safe {})",
                self.entries.len(),
                fence.current(),
                fence.safe()
            );
        }

        let mut count = 0;
        while let Some(front) = self.entries.front() {
            if !force && !fence.is_safe(front.serial) {
                break;
            }
            drop(self.entries.pop_front());
            count += 1;
        }

        self.destroyed += count as u64;
        if count > 0 {
            log::trace!("destroyed {count} deferred resources ({} pending)", self.entries.len());
        }
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total destroyed over the queue's lifetime.
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    pub fn oldest_serial(&self) -> Option<SubmissionSerial> {
        self.entries.front().map(|e| e.serial)
    }

    pub fn serials(&self) -> impl Iterator<Item = SubmissionSerial> + '_ {
        self.entries.iter().map(|e| e.serial)
    }
}

impl<T> Drop for DeferredQueue<T> {
    fn drop(&mut self) {
        if self.entries.is_empty() || std::thread::panicking() {
            return;
        }
        log::error!(
            "deferred queue dropped with {} resources still pending (oldest {:?})",
            self.entries.len(),
            self.oldest_serial()
        );
        debug_assert!(false, "deferred queue must be force-drained before drop");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::mock::XorShift;

    /// Records its serial into a shared log when destroyed.
    struct Tracked {
        serial: SubmissionSerial,
        log: Rc<RefCell<Vec<SubmissionSerial>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.serial);
        }
    }

    fn tracked(serial: SubmissionSerial, log: &Rc<RefCell<Vec<SubmissionSerial>>>) -> Tracked {
        Tracked {
            serial,
            log: Rc::clone(log),
        }
    }

    // ── draining ──────────────────────────────────────────────────────────

    #[test]
    fn drains_only_safe_prefix() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fence = FenceTracker::new();
        let mut queue = DeferredQueue::new();

        for _ in 0..3 {
            let s = fence.current();
            queue.enqueue(tracked(s, &log), s);
            fence.advance();
        }
        fence.update_safe(SubmissionSerial(2));

        assert_eq!(queue.drain(&fence, false), 2);
        assert_eq!(*log.borrow(), vec![SubmissionSerial(1), SubmissionSerial(2)]);
        assert_eq!(queue.oldest_serial(), Some(SubmissionSerial(3)));

        queue.drain(&fence, true);
        assert!(queue.is_empty());
        assert_eq!(queue.destroyed(), 3);
    }

    #[test]
    fn drain_without_progress_is_a_no_op() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fence = FenceTracker::new();
        let mut queue = DeferredQueue::new();

        for _ in 0..4 {
            let s = fence.current();
            queue.enqueue(tracked(s, &log), s);
            queue.enqueue(tracked(s, &log), s);
            fence.advance();
        }
        fence.update_safe(SubmissionSerial(2));

        queue.drain(&fence, false);
        let len = queue.len();
        assert_eq!(len, 4);

        assert_eq!(queue.drain(&fence, false), 0);
        assert_eq!(queue.len(), len);

        queue.drain(&fence, true);
    }

    #[test]
    fn force_drain_empties_queue() {
        let mut fence = FenceTracker::new();
        let mut queue = DeferredQueue::new();
        queue.enqueue("a", fence.current());
        let s = fence.current();
        fence.advance();
        fence.update_safe(s);

        assert_eq!(queue.drain(&fence, true), 1);
        assert!(queue.is_empty());
    }

    // ── ordering property ─────────────────────────────────────────────────

    #[test]
    fn remaining_entries_are_unsafe_and_removed_ones_were_safe() {
        for seed in 1..=16 {
            let log = Rc::new(RefCell::new(Vec::new()));
            let mut rng = XorShift::new(seed);
            let mut fence = FenceTracker::new();
            let mut queue = DeferredQueue::new();

            for _ in 0..500 {
                match rng.below(4) {
                    0 => {
                        let s = fence.current();
                        queue.enqueue(tracked(s, &log), s);
                    }
                    1 => {
                        fence.advance();
                    }
                    2 => {
                        let submitted = fence.current().get() - 1;
                        fence.update_safe(SubmissionSerial(rng.below(submitted + 1)));
                    }
                    _ => {
                        log.borrow_mut().clear();
                        queue.drain(&fence, false);

                        let safe = fence.safe();
                        assert!(log.borrow().iter().all(|s| *s <= safe));
                        assert!(queue.serials().all(|s| s > safe));
                    }
                }
            }

            queue.drain(&fence, true);
        }
    }
}
