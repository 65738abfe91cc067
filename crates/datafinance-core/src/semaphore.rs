//! Counting semaphore bounding how many archives are processed at once.
//!
//! `Mutex + Condvar` from std; permits are returned through an RAII guard
//! so an archive task that fails or panics still frees its slot.

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

/// Held for the duration of one archive; returns its permit on drop.
pub struct Permit<'a>(&'a Semaphore);

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is free, then take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut free = self.permits.lock().unwrap();
        while *free == 0 {
            free = self.available.wait(free).unwrap();
        }
        *free -= 1;
        Permit(self)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut free = self.0.permits.lock().unwrap();
        *free += 1;
        self.0.available.notify_one();
    }
}
