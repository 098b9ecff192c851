//! Cancellation tokens for rescan and indexing operations.
//!
//! Every monitored pipeline step checks its token at the step boundary;
//! member loops use `check_sparse` to keep the atomic-read overhead out of
//! tight decoding loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{IndexError, Result};

/// How often tight loops check whether execution was cancelled.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400; // 1,024

/// A cloneable cancellation token shared between a job and its requester.
#[derive(Clone, Debug, Default)]
pub struct ProgressToken {
    cancelled: Arc<AtomicBool>,
}

impl ProgressToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Running work notices it at the next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(IndexError::Cancelled)` once cancellation was requested,
    /// so pipeline steps can bail with `?`.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sparse cancellation check - only checks every `CANCEL_CHECK_INTERVAL`
    /// iterations.
    #[inline]
    pub fn check_sparse(&self, counter: usize) -> Result<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}
