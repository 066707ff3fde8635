//! The composition root shared by every transport in a process.
//!
//! A [`Host`] is built once at startup: it probes the request primitives,
//! fixes the capability flags, and owns the collaborators every request
//! needs — the scheduler, the optional context origin, and the optional
//! in-flight registry whose lifetime (constructed here, drained by
//! [`shutdown`](Host::shutdown)) replaces implicit module-level state.

use std::rc::Rc;

use crate::backend::BackendFactory;
use crate::capability::{self, Capabilities};
use crate::error::ProbeError;
use crate::origin::Origin;
use crate::registry::RequestRegistry;
use crate::scheduler::Schedule;

/// Immutable per-process transport environment.
pub struct Host {
    factory: Rc<dyn BackendFactory>,
    capabilities: Capabilities,
    scheduler: Rc<dyn Schedule>,
    origin: Option<Origin>,
    registry: Option<Rc<RequestRegistry>>,
}

impl Host {
    /// Probe the request primitives once and fix the capability flags.
    ///
    /// `legacy` is the same-origin-only fallback construction path, tried
    /// best-effort when the preferred primitive is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when no backend can be constructed at all.
    pub fn probe(
        preferred: Rc<dyn BackendFactory>,
        legacy: Option<Rc<dyn BackendFactory>>,
        scheduler: Rc<dyn Schedule>,
    ) -> Result<Self, ProbeError> {
        let (factory, capabilities) = capability::probe(preferred, legacy)?;
        Ok(Self {
            factory,
            capabilities,
            scheduler,
            origin: None,
            registry: None,
        })
    }

    /// Record the execution context's origin, enabling cross-domain
    /// determination. Hosts without one treat every target as same-origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Track in-flight requests so [`shutdown`](Self::shutdown) can abort
    /// them. Only requests created through a tracking host register.
    #[must_use]
    pub fn with_shutdown_tracking(mut self) -> Self {
        self.registry = Some(Rc::new(RequestRegistry::new()));
        self
    }

    /// The probed capability flags.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The execution context's origin, when configured.
    #[must_use]
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// The in-flight registry, when tracking is enabled.
    #[must_use]
    pub fn registry(&self) -> Option<Rc<RequestRegistry>> {
        self.registry.clone()
    }

    /// The selected backend factory.
    #[must_use]
    pub fn factory(&self) -> Rc<dyn BackendFactory> {
        Rc::clone(&self.factory)
    }

    /// The deferred-execution scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Schedule> {
        Rc::clone(&self.scheduler)
    }

    /// Abort every request still in flight. The process-teardown hook, made
    /// explicit: call it when the host environment is going away, so no
    /// native resource leaks and no outcome fires against a dead consumer.
    pub fn shutdown(&self) {
        if let Some(registry) = &self.registry {
            registry.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFactory;
    use crate::scheduler::TaskQueue;

    #[test]
    fn untracked_host_has_no_registry() {
        let host = Host::probe(
            Rc::new(MockFactory::new()),
            None,
            Rc::new(TaskQueue::new()),
        )
        .expect("probe");

        assert!(host.registry().is_none());
        // Shutdown with nothing tracked is a no-op.
        host.shutdown();
    }

    #[test]
    fn capabilities_are_fixed_at_probe_time() {
        let factory = Rc::new(MockFactory::new());
        factory.advertise(true, false);
        let host = Host::probe(factory.clone(), None, Rc::new(TaskQueue::new())).expect("probe");

        // Later re-advertisement does not change what was probed.
        factory.advertise(false, true);
        assert!(host.capabilities().binary);
        assert!(!host.capabilities().cross_origin);
    }
}
