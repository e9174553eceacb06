//! Save propagation
//!
//! Every context a stack creates carries a `SavePropagator`. After the context pushes its changes
//! into its parent, the propagator saves the parent on the parent's queue and waits, so a save
//! returns only once it has reached the store. The shared `PropagationTracker` counts hops in
//! flight; a store reset waits for it to drain.

use crate::context::Context;
use crate::error::ContextError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Counts save propagations in flight
#[derive(Debug, Default)]
pub struct PropagationTracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl PropagationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a propagation; it ends when the guard drops
    pub fn enter(self: &Arc<Self>) -> PropagationGuard {
        *self.pending.lock() += 1;
        PropagationGuard {
            tracker: self.clone(),
        }
    }

    fn leave(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until no propagation is in flight
    pub fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }

    /// Like `wait_idle`, giving up after `timeout`; returns whether the tracker drained
    pub fn wait_idle_for(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_for(&mut pending, timeout).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

/// Marks one propagation in flight
#[derive(Debug)]
pub struct PropagationGuard {
    tracker: Arc<PropagationTracker>,
}

impl Drop for PropagationGuard {
    fn drop(&mut self) {
        self.tracker.leave();
    }
}

/// Continues a save up to the parent context
#[derive(Debug)]
pub(crate) struct SavePropagator {
    tracker: Arc<PropagationTracker>,
}

impl SavePropagator {
    pub(crate) fn new(tracker: Arc<PropagationTracker>) -> Self {
        Self { tracker }
    }

    /// Mark a save as in flight from the moment it starts pushing to its parent
    pub(crate) fn begin(&self) -> PropagationGuard {
        self.tracker.enter()
    }

    /// Save `parent` and wait for it
    pub(crate) fn propagate(&self, child: &str, parent: &Context) -> Result<(), ContextError> {
        let _hop = self.tracker.enter();
        debug!(child = %child, parent = %parent.label(), "propagating save to parent");
        parent
            .perform_and_wait(|session| session.save())
            .map_err(|source| {
                warn!(
                    child = %child,
                    parent = %parent.label(),
                    error = %source,
                    "parent save failed during propagation"
                );
                ContextError::Propagation {
                    parent: parent.label().to_string(),
                    source: Box::new(source),
                }
            })
    }
}
