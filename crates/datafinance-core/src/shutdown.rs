//! Cooperative cancellation shared by the download and extraction pipelines.
//!
//! Workers poll the handle between files and between batches; whatever is
//! in flight runs to completion first, so temp files are always cleaned up
//! and no partial output ever appears under a final name.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide cancellation state.
pub struct Cancellation {
    requested: AtomicBool,
}

impl Cancellation {
    const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Ask every running pipeline to stop after its current file.
    /// Safe to call from a signal handler.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Polled by workers before claiming new work.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Clear the flag. The state is process-wide, so hosts running several
    /// batches in one process call this between runs.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::Relaxed);
    }
}

/// The process-wide cancellation handle.
pub fn cancellation() -> &'static Cancellation {
    static CANCELLATION: Cancellation = Cancellation::new();
    &CANCELLATION
}
