//! Time-synchronized sampling engine.
//!
//! A measurement window is a fixed number of ticks at a fixed step. The
//! [`Sampler`] owns the tick schedule; per tick every configured
//! [`crate::sources::MetricSource`] is read once. Readings land in
//! [`TimeSeries`] columns that stay index-aligned with the schedule even
//! when individual reads fail.

mod sampler;
mod series;

pub use sampler::{Sampler, SamplingError};
pub use series::{RunResult, TimeSeries};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, checked between ticks and between
/// optimization steps. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once any holder has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
