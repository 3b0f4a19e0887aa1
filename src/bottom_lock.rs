use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use tracing::info;

use crate::error::{DvfsError, Result};

/// Reference-counted minimum level.
///
/// The counter is atomic so it can be read without the engine lock, but
/// `push` and `pop` are only called with the engine's state lock held.
#[derive(Debug, Default)]
pub struct BottomLock {
    depth: AtomicI32,
    floor: AtomicUsize,
}

impl BottomLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> i32 {
        self.depth.load(Ordering::Acquire)
    }

    pub fn floor_step(&self) -> usize {
        self.floor.load(Ordering::Acquire)
    }

    /// The floor while at least one lock is outstanding.
    pub fn active_floor(&self) -> Option<usize> {
        (self.depth() > 0).then(|| self.floor_step())
    }

    /// Registers a lock at `step` and returns the new depth.
    pub fn push(&self, step: usize) -> Result<i32> {
        let depth = self.depth();
        if depth < 0 {
            return Err(DvfsError::InvalidBottomLockState { depth });
        }
        self.floor.fetch_max(step, Ordering::AcqRel);
        Ok(self.depth.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Drops one lock and returns the new depth. The floor goes back to 0
    /// with the last lock.
    pub fn pop(&self) -> Result<i32> {
        let depth = self.depth();
        if depth <= 0 {
            return Err(DvfsError::InvalidBottomLockState { depth });
        }
        let depth = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if depth == 0 {
            self.floor.store(0, Ordering::Release);
            info!("bottom lock released");
        }
        Ok(depth)
    }
}
