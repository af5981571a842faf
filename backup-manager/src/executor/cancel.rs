//! Cancellation gate shared between a job's caller and its worker.
//!
//! Cancelling and entering the finalizing stage race for the same atomic, so
//! exactly one of them wins: either the worker finalizes and the cancel
//! request is refused, or the cancel lands and the worker never finalizes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const RUNNING: u8 = 0;
const FINALIZING: u8 = 1;
const CANCELLED: u8 = 2;

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    Signalled,
    AlreadyCancelled,
    /// The worker has started finalizing and will complete normally.
    TooLate,
}

#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<AtomicU8>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    pub fn cancel(&self) -> CancelRequest {
        match self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => CancelRequest::Signalled,
            Err(FINALIZING) => CancelRequest::TooLate,
            Err(_) => CancelRequest::AlreadyCancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Called by the worker before finalizing. Returns false if a cancel
    /// request got there first.
    pub fn begin_finalizing(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, FINALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
