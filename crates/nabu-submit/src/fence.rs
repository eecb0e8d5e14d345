//! Submission counters.
//!
//! The tracker stamps resources with the serial of the frame that last used
//! them and answers whether that serial has completed on the GPU. Completion
//! is published through [`FenceSignal`], which platform callbacks may hold on
//! any thread; everything else is owned by the device thread.
//!
//! Serials must complete in submission order. Only a single submission queue
//! is supported.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic submission counter.
///
/// `SubmissionSerial::NONE` (0) is never submitted and is therefore always safe.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubmissionSerial(pub u64);

impl SubmissionSerial {
    pub const NONE: SubmissionSerial = SubmissionSerial(0);

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubmissionSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cloneable completion handle.
///
/// Backends hand this to whatever notifies them of finished GPU work.
#[derive(Debug, Clone)]
pub struct FenceSignal {
    completed: Arc<AtomicU64>,
}

impl FenceSignal {
    /// Publishes that all work up to and including `serial` has completed.
    ///
    /// Out-of-order notifications are harmless; the safe value never decreases.
    pub fn complete(&self, serial: SubmissionSerial) {
        self.completed.fetch_max(serial.0, Ordering::AcqRel);
    }
}

/// Tracks the current (recording) serial and the last completed one.
#[derive(Debug)]
pub struct FenceTracker {
    current: u64,
    completed: Arc<AtomicU64>,
}

impl Default for FenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceTracker {
    pub fn new() -> Self {
        Self {
            current: 1,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serial of the frame being recorded. Resources released now are stamped with it.
    #[inline]
    pub fn current(&self) -> SubmissionSerial {
        SubmissionSerial(self.current)
    }

    /// Last serial known to have finished on the GPU.
    #[inline]
    pub fn safe(&self) -> SubmissionSerial {
        SubmissionSerial(self.completed.load(Ordering::Acquire))
    }

    /// Moves past the submitted frame and returns the new current serial.
    pub fn advance(&mut self) -> SubmissionSerial {
        self.current += 1;
        SubmissionSerial(self.current)
    }

    /// Records that the GPU finished everything up to `serial`.
    pub fn update_safe(&self, serial: SubmissionSerial) {
        debug_assert!(
            serial.0 < self.current,
            "completion {serial} reported for a serial that was never submitted (current {})",
            self.current
        );
        self.completed.fetch_max(serial.0, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_safe(&self, serial: SubmissionSerial) -> bool {
        serial.0 <= self.completed.load(Ordering::Acquire)
    }

    /// True once every submitted serial has completed.
    pub fn is_idle(&self) -> bool {
        self.safe().0 + 1 >= self.current
    }

    pub fn signal(&self) -> FenceSignal {
        FenceSignal {
            completed: Arc::clone(&self.completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── counters ──────────────────────────────────────────────────────────

    #[test]
    fn starts_with_nothing_submitted() {
        let fence = FenceTracker::new();
        assert_eq!(fence.current(), SubmissionSerial(1));
        assert_eq!(fence.safe(), SubmissionSerial::NONE);
        assert!(fence.is_safe(SubmissionSerial::NONE));
        assert!(!fence.is_safe(fence.current()));
        assert!(fence.is_idle());
    }

    #[test]
    fn advance_returns_new_current() {
        let mut fence = FenceTracker::new();
        assert_eq!(fence.advance(), SubmissionSerial(2));
        assert_eq!(fence.advance(), SubmissionSerial(3));
        assert_eq!(fence.current(), SubmissionSerial(3));
        assert!(!fence.is_idle());
    }

    // ── safety ────────────────────────────────────────────────────────────

    #[test]
    fn safe_value_never_decreases() {
        let mut fence = FenceTracker::new();
        for _ in 0..4 {
            fence.advance();
        }
        fence.update_safe(SubmissionSerial(3));
        fence.update_safe(SubmissionSerial(2));
        assert_eq!(fence.safe(), SubmissionSerial(3));
        assert!(fence.is_safe(SubmissionSerial(3)));
        assert!(!fence.is_safe(SubmissionSerial(4)));
    }

    #[test]
    fn signal_publishes_across_threads() {
        let mut fence = FenceTracker::new();
        let submitted = fence.current();
        fence.advance();

        let signal = fence.signal();
        std::thread::spawn(move || signal.complete(submitted))
            .join()
            .unwrap();

        assert!(fence.is_safe(submitted));
        assert!(fence.is_idle());
    }
}
