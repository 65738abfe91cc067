//! Shared queue of pending files, claimed lock-free by pool workers.
//!
//! Built once from the validated plan, then drained concurrently: a worker
//! claims the next unprocessed item with a single atomic increment, so no
//! two workers ever touch the same target path.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct TaskQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> TaskQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next pending item; `None` once the queue is drained.
    pub fn claim(&self) -> Option<&T> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
