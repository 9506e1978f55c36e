//! Cancelable one-shot timers.
//!
//! A [`Timer`] owns at most one pending callback. Arming replaces any pending
//! callback; canceling aborts it. Every arm or cancel bumps a generation
//! counter, and the callback receives the generation it was armed with, so a
//! callback that woke up just as it was superseded can tell it is stale by
//! calling [`Timer::fire`] before acting.

use crate::bus::panic_message;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Default)]
pub struct Timer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to run after `delay`, replacing any pending arm.
    ///
    /// Must be called from within a tokio runtime. Panics inside the callback
    /// are caught and logged.
    pub fn arm<F>(&mut self, delay: Duration, callback: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(generation))) {
                error!(
                    reason = panic_message(panic.as_ref()),
                    "Timer callback panicked"
                );
            }
        }));
        generation
    }

    /// Aborts the pending callback, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Claims the expiry for `generation`.
    ///
    /// Returns `true` exactly once for the current arm; returns `false` if the
    /// timer was re-armed or canceled after that callback was scheduled.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.handle.is_none() || self.generation != generation {
            return false;
        }
        self.handle = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
