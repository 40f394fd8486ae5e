//! Progress cursor shared by the two sides of a streaming operation.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;
const FAILED: u8 = 2;

/// Lifecycle of the writing side as seen by the reading side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorStatus {
    /// More bytes may still be published
    Open,
    /// The writer finished; the position is final
    Closed,
    /// The writer gave up; published bytes are valid but incomplete
    Failed,
}

/// Monotonic count of bytes published by one writer to one reader.
///
/// The writer stores with `Release` after the bytes are in place; the reader
/// loads with `Acquire`, so every byte below an observed position is visible.
/// The status flag follows the same protocol and is set only after the final
/// position store.
#[derive(Debug, Default)]
pub(crate) struct ProgressCursor {
    position: AtomicUsize,
    status: AtomicU8,
}

impl ProgressCursor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, position: usize) {
        debug_assert!(position >= self.position.load(Ordering::Relaxed));
        self.position.store(position, Ordering::Release);
    }

    pub(crate) fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.status.store(CLOSED, Ordering::Release);
    }

    pub(crate) fn fail(&self) {
        self.status.store(FAILED, Ordering::Release);
    }

    pub(crate) fn status(&self) -> CursorStatus {
        match self.status.load(Ordering::Acquire) {
            OPEN => CursorStatus::Open,
            CLOSED => CursorStatus::Closed,
            _ => CursorStatus::Failed,
        }
    }
}

/// Bounded waiting for a cursor to move.
///
/// Spins and yields through a [`Backoff`] first, then falls back to short
/// sleeps so a stalled peer cannot pin a core.
pub(crate) struct IdleWait {
    backoff: Backoff,
    sleep: Duration,
}

impl IdleWait {
    pub(crate) fn new(sleep: Duration) -> Self {
        Self {
            backoff: Backoff::new(),
            sleep,
        }
    }

    pub(crate) fn wait(&self) {
        if self.backoff.is_completed() {
            thread::sleep(self.sleep);
        } else {
            self.backoff.snooze();
        }
    }

    /// Call after progress so the next stall starts spinning again.
    pub(crate) fn reset(&self) {
        self.backoff.reset();
    }
}
