//! The in-flight request table.
//!
//! Exists for exactly one reason: when the host is torn down, every request
//! still on the wire must be aborted so native resources are released and no
//! outcome fires against a dead consumer. The table is an explicit service
//! owned by the [`Host`](crate::host::Host) that composes transports, not
//! process-global state, so shutdown behavior is testable in isolation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;

use tracing::{debug, info};

use crate::request::RequestLifecycle;

/// Table of in-flight requests, keyed by a monotonically increasing index.
///
/// An entry exists iff its request is non-terminal and was created through a
/// registry-carrying host; the request unregisters itself during cleanup.
#[derive(Default)]
pub struct RequestRegistry {
    entries: RefCell<BTreeMap<u64, Rc<RequestLifecycle>>>,
    next_index: Cell<u64>,
}

impl RequestRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request and return its index.
    pub fn register(&self, request: Rc<RequestLifecycle>) -> u64 {
        let index = self.next_index.get();
        self.next_index.set(index + 1);
        self.entries.borrow_mut().insert(index, request);
        debug!(index, "request registered");
        index
    }

    /// Remove a request by index. Removing an absent index is a no-op.
    pub fn unregister(&self, index: u64) {
        if self.entries.borrow_mut().remove(&index).is_some() {
            debug!(index, "request unregistered");
        }
    }

    /// How many requests are in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Abort every in-flight request.
    ///
    /// The table is drained before any abort runs, so the reentrant
    /// unregistration each abort triggers finds nothing left to remove.
    pub fn shutdown(&self) {
        let drained = mem::take(&mut *self.entries.borrow_mut());
        if !drained.is_empty() {
            info!(in_flight = drained.len(), "aborting in-flight requests at shutdown");
        }
        for request in drained.into_values() {
            request.abort();
        }
    }
}
