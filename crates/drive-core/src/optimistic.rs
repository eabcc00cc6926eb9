//! Optimistic boolean control.
//!
//! A toggle flips its local value immediately, then waits for the remote commit.
//! On failure the previous value is restored. While a commit is in flight further
//! toggles on the same control are ignored; this is the only mutual exclusion in
//! the crate and it covers exactly one control.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Result of a [`OptimisticToggle::toggle`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The remote accepted the new value.
    Committed(bool),
    /// The remote refused; the control is back at this value.
    Reverted(bool),
    /// Another commit was already in flight.
    Ignored,
}

#[derive(Debug, Default)]
pub struct OptimisticToggle {
    value: AtomicBool,
    in_flight: AtomicBool,
}

impl OptimisticToggle {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Value currently shown to the user.
    pub fn value(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Adopt an authoritative value, unless a commit is pending. Returns whether
    /// the value was adopted.
    pub fn observe(&self, value: bool) -> bool {
        if self.is_in_flight() {
            return false;
        }
        self.value.store(value, Ordering::Release);
        true
    }

    /// Flip the value and commit it with `commit(new_value)`.
    ///
    /// Dropping the returned future before it completes counts as a failure.
    pub async fn toggle<F, Fut, E>(&self, commit: F) -> ToggleOutcome
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Toggle ignored, commit already in flight");
            return ToggleOutcome::Ignored;
        }

        let previous = self.value.load(Ordering::Acquire);
        let next = !previous;
        self.value.store(next, Ordering::Release);
        let mut guard = InFlight {
            toggle: self,
            previous,
            revert: true,
        };

        match commit(next).await {
            Ok(()) => {
                guard.revert = false;
                ToggleOutcome::Committed(next)
            }
            Err(e) => {
                warn!("Commit failed, reverting to {}: {}", previous, e);
                ToggleOutcome::Reverted(previous)
            }
        }
    }
}

/// Clears the in-flight flag on every exit path, restoring the previous value
/// unless the commit succeeded.
struct InFlight<'a> {
    toggle: &'a OptimisticToggle,
    previous: bool,
    revert: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.revert {
            self.toggle.value.store(self.previous, Ordering::Release);
        }
        self.toggle.in_flight.store(false, Ordering::Release);
    }
}
