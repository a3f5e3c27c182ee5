//! Generation-counter cancellation tokens.
//!
//! Every fetch is issued with a [`FetchToken`] stamped with the generation of
//! the operation that started it. Starting a newer operation (or tearing the
//! owner down) bumps the shared counter, which turns every older token stale.
//! Completion handlers check [`FetchToken::is_current`] right before they
//! touch shared state, so a superseded result is never applied after a newer
//! one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared generation counter for one family of operations.
///
/// Cloning shares the same counter.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    current: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation: invalidates all outstanding tokens and returns
    /// the only current one.
    pub fn issue(&self) -> FetchToken {
        let generation = self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        FetchToken {
            generation,
            current: Arc::clone(&self.current),
        }
    }

    /// Invalidate all outstanding tokens without starting anything.
    pub fn cancel(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }
}

/// Cancellation token handed to one remote fetch.
#[derive(Debug, Clone)]
pub struct FetchToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl FetchToken {
    /// A token that is never cancelled. For one-shot calls with no owner.
    pub fn detached() -> Self {
        Generation::new().issue()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while no newer operation has been issued on the same counter.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        !self.is_current()
    }
}
