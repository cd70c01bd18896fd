// src/process/cancel.rs

//! Cross-thread cancellation
//!
//! One external thread may request cancellation while the pipeline runs on
//! its own thread. The request sets a flag and kills the active child, if
//! any. Spawn sites check the flag and register their child under the same
//! lock, so a child is never started after cancellation was requested.

use crate::error::{Outcome, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// A spawned child shared between its handle and the cancellation state
///
/// The child is only ever killed or reaped while holding `state`, so a kill
/// can never hit a pid that was already reaped and reused.
pub(crate) struct ChildSlot {
    pid: u32,
    state: Mutex<ChildState>,
}

pub(crate) struct ChildState {
    pub(crate) child: Child,
    pub(crate) status: Option<ExitStatus>,
}

impl ChildSlot {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            state: Mutex::new(ChildState { child, status: None }),
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ChildState> {
        self.state.lock()
    }

    /// Kill the child and its process group unless it was already reaped
    pub(crate) fn terminate(&self) {
        let mut state = self.state.lock();
        if state.status.is_some() {
            return;
        }

        debug!("Killing process group {}", self.pid);
        match i32::try_from(self.pid) {
            Ok(raw) => match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => debug!("killpg({}) failed: {}", self.pid, e),
            },
            Err(_) => debug!("pid {} does not fit a process group id", self.pid),
        }
        if let Err(e) = state.child.kill() {
            debug!("kill({}) failed: {}", self.pid, e);
        }
    }
}

/// Shared cancellation flag plus the currently active child
#[derive(Default)]
pub struct CancellationState {
    cancelled: AtomicBool,
    active: Mutex<Option<Weak<ChildSlot>>>,
}

impl CancellationState {
    /// Create a fresh, shareable state
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Request cancellation and kill the active child, if any
    ///
    /// Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        let active = self.active.lock();
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Cancellation requested");
        }
        if let Some(slot) = active.as_ref().and_then(Weak::upgrade) {
            slot.terminate();
        }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Kill the active child without setting the flag
    pub fn terminate_if_present(&self) {
        let active = self.active.lock();
        if let Some(slot) = active.as_ref().and_then(Weak::upgrade) {
            slot.terminate();
        }
    }

    /// Check the flag, spawn and register the child, all under one lock
    pub(crate) fn spawn<F>(&self, spawn: F) -> Result<Outcome<Arc<ChildSlot>>>
    where
        F: FnOnce() -> io::Result<Child>,
    {
        let mut active = self.active.lock();
        if self.is_cancelled() {
            debug!("Not spawning: cancellation already requested");
            return Ok(Outcome::Cancelled);
        }

        let slot = Arc::new(ChildSlot::new(spawn()?));
        *active = Some(Arc::downgrade(&slot));
        Ok(Outcome::Completed(slot))
    }

    /// Forget `slot` if it is still the active child
    pub(crate) fn clear(&self, slot: &Arc<ChildSlot>) {
        let mut active = self.active.lock();
        let is_current = active
            .as_ref()
            .is_some_and(|current| Weak::ptr_eq(current, &Arc::downgrade(slot)));
        if is_current {
            *active = None;
        }
    }

    /// Whether a live child is registered
    #[cfg(test)]
    pub(crate) fn has_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|current| current.strong_count() > 0)
    }
}

impl std::fmt::Debug for CancellationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationState")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
