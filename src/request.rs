//! The request lifecycle state machine.
//!
//! One [`RequestLifecycle`] owns exactly one backend handle and drives it
//! from creation to a single terminal outcome:
//!
//! ```text
//! Created ──send ok──► Sent ──headers──► HeadersReceived ──status ok──► Completed
//!    │                   │                     │
//!    │ send/open/create  └──── bad status (deferred) ────► Errored
//!    │ failed (deferred)
//!    └────────────────────────► Errored          abort() ──► Aborted
//! ```
//!
//! Construction never raises: failures before the request is on the wire
//! are posted through the scheduler and delivered as the `error` outcome on
//! a later tick, so a listener attached right after construction still sees
//! them. Every transition funnels through one mutation entry point, and no
//! listener ever runs while the internal state is borrowed — consumers may
//! reenter freely (for example aborting from inside `data`).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error};
use url::Url;

use crate::backend::{Method, Payload, ReadyState, RequestBackend};
use crate::cookie::CookieJar;
use crate::error::RequestError;
use crate::host::Host;
use crate::registry::RequestRegistry;
use crate::scheduler::Schedule;
use crate::{ACCEPT_ANY, STATUS_NO_CONTENT_LEGACY, STATUS_OK, TEXT_CONTENT_TYPE};

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Constructed; not on the wire yet (or creation already failed and the
    /// error outcome is pending delivery).
    Created,
    /// On the wire, nothing back yet.
    Sent,
    /// Response headers observed; cookies parsed if a jar is configured.
    HeadersReceived,
    /// Terminal: success outcome emitted.
    Completed,
    /// Terminal: error outcome emitted.
    Errored,
    /// Terminal: explicitly cancelled, no outcome emitted.
    Aborted,
}

impl RequestState {
    /// Whether the state is terminal. A request reaches a terminal state at
    /// most once.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }
}

/// Every option a single request recognizes.
pub struct RequestConfig {
    /// GET for reads, POST for writes.
    pub method: Method,
    /// The complete target; query assembly belongs to the caller.
    pub url: Url,
    /// Write content, absent on reads.
    pub payload: Option<Payload>,
    /// Deadline delegated to the backend's own timeout mechanism.
    pub timeout: Option<Duration>,
    /// Ask the backend for cross-origin credentials, where supported.
    pub with_credentials: bool,
    /// Caller headers, applied before the fixed method/accept headers.
    pub extra_headers: Vec<(String, String)>,
    /// Shared jar for credentialed requests; not owned by the request.
    pub cookie_jar: Option<Rc<dyn CookieJar>>,
}

impl RequestConfig {
    /// A read request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            payload: None,
            timeout: None,
            with_credentials: false,
            extra_headers: Vec::new(),
            cookie_jar: None,
        }
    }

    /// A write request carrying `payload`.
    #[must_use]
    pub fn post(url: Url, payload: Payload) -> Self {
        Self {
            method: Method::Post,
            payload: Some(payload),
            ..Self::get(url)
        }
    }

    /// Delegate a deadline to the backend.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request cross-origin credentials.
    #[must_use]
    pub fn with_credentials(mut self) -> Self {
        self.with_credentials = true;
        self
    }

    /// Share a cookie jar with this request.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: Rc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }
}

/// Terminal outcome listeners. Each fires at most once; an aborted request
/// fires none of them.
#[derive(Default)]
pub struct RequestListeners {
    on_data: Option<Box<dyn FnOnce(Payload)>>,
    on_success: Option<Box<dyn FnOnce()>>,
    on_error: Option<Box<dyn FnOnce(RequestError)>>,
}

impl RequestListeners {
    /// No listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the response body of a completed request. Not invoked when
    /// the response carried no body.
    #[must_use]
    pub fn on_data(mut self, listener: impl FnOnce(Payload) + 'static) -> Self {
        self.on_data = Some(Box::new(listener));
        self
    }

    /// Observe successful completion, after any `data` emission.
    #[must_use]
    pub fn on_success(mut self, listener: impl FnOnce() + 'static) -> Self {
        self.on_success = Some(Box::new(listener));
        self
    }

    /// Observe terminal failure.
    #[must_use]
    pub fn on_error(mut self, listener: impl FnOnce(RequestError) + 'static) -> Self {
        self.on_error = Some(Box::new(listener));
        self
    }
}

struct Inner {
    state: RequestState,
    backend: Option<Box<dyn RequestBackend>>,
    registry_slot: Option<(Rc<RequestRegistry>, u64)>,
    listeners: RequestListeners,
    cookie_jar: Option<Rc<dyn CookieJar>>,
    method: Method,
    url: Url,
}

/// One outstanding request, from creation to its terminal outcome.
pub struct RequestLifecycle {
    inner: RefCell<Inner>,
    scheduler: Rc<dyn Schedule>,
}

impl RequestLifecycle {
    /// Create a request and start it immediately.
    ///
    /// Registers with the host's in-flight registry when one is installed,
    /// then opens, applies headers, and sends. Never fails synchronously:
    /// any creation failure arrives through `on_error` on a later tick.
    pub fn spawn(config: RequestConfig, listeners: RequestListeners, host: &Host) -> Rc<Self> {
        let request = Rc::new(Self {
            scheduler: host.scheduler(),
            inner: RefCell::new(Inner {
                state: RequestState::Created,
                backend: None,
                registry_slot: None,
                listeners,
                cookie_jar: config.cookie_jar.clone(),
                method: config.method,
                url: config.url.clone(),
            }),
        });
        if let Some(registry) = host.registry() {
            let index = registry.register(Rc::clone(&request));
            request.inner.borrow_mut().registry_slot = Some((registry, index));
        }
        Rc::clone(&request).create(config, host);
        request
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.inner.borrow().state
    }

    /// Cancel the request: forced backend termination, no outcome. Any
    /// completion the backend delivers afterwards is ignored.
    pub fn abort(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = RequestState::Aborted;
        }
        debug!(url = %self.inner.borrow().url, "request aborted");
        self.cleanup(true);
    }

    fn create(self: Rc<Self>, config: RequestConfig, host: &Host) {
        let mut backend = match host.factory().create() {
            Ok(backend) => backend,
            Err(err) => {
                self.defer_failure(RequestError::Creation(err));
                return;
            }
        };

        if let Err(err) = backend.open(config.method, &config.url) {
            self.inner.borrow_mut().backend = Some(backend);
            self.defer_failure(RequestError::Creation(err));
            return;
        }

        // Caller headers first, then the fixed pair. Each application is
        // guarded on its own: one rejected header never aborts the request.
        for (name, value) in &config.extra_headers {
            if let Err(err) = backend.set_request_header(name, value) {
                debug!(header = name.as_str(), error = %err, "request header rejected");
            }
        }
        if config.method == Method::Post {
            if let Err(err) = backend.set_request_header("content-type", TEXT_CONTENT_TYPE) {
                debug!(error = %err, "content-type header rejected");
            }
        }
        if let Err(err) = backend.set_request_header("accept", ACCEPT_ANY) {
            debug!(error = %err, "accept header rejected");
        }

        if config.with_credentials && !backend.set_credentials(true) {
            debug!("backend has no credentials flag");
        }
        if let Some(timeout) = config.timeout {
            backend.set_timeout(timeout);
        }

        let weak = Rc::downgrade(&self);
        backend.on_ready(Box::new(move || {
            if let Some(request) = weak.upgrade() {
                request.on_ready_change();
            }
        }));

        let jar = self.inner.borrow().cookie_jar.clone();
        if let Some(jar) = jar {
            jar.add_cookies(backend.as_mut());
        }

        match backend.send(config.payload) {
            Ok(()) => {
                let mut inner = self.inner.borrow_mut();
                inner.backend = Some(backend);
                inner.state = RequestState::Sent;
                debug!(method = %config.method, url = %config.url, "request sent");
            }
            Err(err) => {
                self.inner.borrow_mut().backend = Some(backend);
                self.defer_failure(RequestError::Creation(err));
            }
        }
    }

    // Deliver `error` on the next tick so callers attached right after
    // construction still observe it, and so a failure observed inside a host
    // callback unwinds before listeners run.
    fn defer_failure(self: Rc<Self>, err: RequestError) {
        let scheduler = Rc::clone(&self.scheduler);
        scheduler.defer(Box::new(move || self.fail(err)));
    }

    fn on_ready_change(self: Rc<Self>) {
        let (state, ready) = {
            let inner = self.inner.borrow();
            let Some(backend) = inner.backend.as_ref() else {
                return;
            };
            (inner.state, backend.ready_state())
        };
        match ready {
            ReadyState::HeadersReceived if state == RequestState::Sent => self.headers_received(),
            ReadyState::Done
                if matches!(state, RequestState::Sent | RequestState::HeadersReceived) =>
            {
                self.done();
            }
            _ => {}
        }
    }

    fn headers_received(&self) {
        let parse = {
            let mut inner = self.inner.borrow_mut();
            inner.state = RequestState::HeadersReceived;
            match (&inner.cookie_jar, inner.backend.as_ref()) {
                (Some(jar), Some(backend)) => backend
                    .response_header("set-cookie")
                    .map(|header| (Rc::clone(jar), header)),
                _ => None,
            }
        };
        debug!("response headers received");
        if let Some((jar, header)) = parse {
            jar.parse_cookies(&header);
        }
    }

    fn done(self: Rc<Self>) {
        let status = {
            let inner = self.inner.borrow();
            inner
                .backend
                .as_ref()
                .and_then(|backend| backend.status())
                .unwrap_or(0)
        };
        if status == STATUS_OK || status == STATUS_NO_CONTENT_LEGACY {
            self.complete();
        } else {
            self.defer_failure(RequestError::Status { status });
        }
    }

    fn complete(&self) {
        let (body, on_data, on_success) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = RequestState::Completed;
            (
                inner
                    .backend
                    .as_ref()
                    .and_then(|backend| backend.response_body()),
                inner.listeners.on_data.take(),
                inner.listeners.on_success.take(),
            )
        };
        debug!(has_body = body.is_some(), "request completed");
        if let (Some(body), Some(on_data)) = (body, on_data) {
            on_data(body);
        }
        if let Some(on_success) = on_success {
            on_success();
        }
        self.cleanup(false);
    }

    fn fail(&self, err: RequestError) {
        let on_error = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = RequestState::Errored;
            error!(error = %err, method = %inner.method, url = %inner.url, "request failed");
            inner.listeners.on_error.take()
        };
        if let Some(on_error) = on_error {
            on_error(err);
        }
        self.cleanup(true);
    }

    // Release everything exactly once; safe to call repeatedly. The only
    // path that drops the backend handle. The readiness listener is swapped
    // for a no-op first, so a late host callback finds nothing to run.
    fn cleanup(&self, force_abort: bool) {
        let (registry_slot, backend) = {
            let mut inner = self.inner.borrow_mut();
            (inner.registry_slot.take(), inner.backend.take())
        };
        if let Some((registry, index)) = registry_slot {
            registry.unregister(index);
        }
        if let Some(mut backend) = backend {
            backend.on_ready(Box::new(|| {}));
            if force_abort {
                backend.abort();
            }
        }
        self.inner.borrow_mut().listeners = RequestListeners::default();
    }

    #[cfg(test)]
    fn has_backend(&self) -> bool {
        self.inner.borrow().backend.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use testresult::TestResult;

    use super::*;
    use crate::backend::mock::MockFactory;
    use crate::backend::BackendFactory;
    use crate::scheduler::TaskQueue;

    struct Harness {
        factory: Rc<MockFactory>,
        queue: Rc<TaskQueue>,
        host: Host,
    }

    fn harness() -> Harness {
        let factory = Rc::new(MockFactory::new());
        let queue = Rc::new(TaskQueue::new());
        let host = Host::probe(
            Rc::clone(&factory) as Rc<dyn BackendFactory>,
            None,
            Rc::clone(&queue) as Rc<dyn Schedule>,
        )
        .expect("probe");
        Harness {
            factory,
            queue,
            host,
        }
    }

    fn target() -> Url {
        Url::parse("http://example.test/channel?sid=1").expect("static url")
    }

    /// Records outcome emission order.
    fn tracking_listeners(log: &Rc<RefCell<Vec<String>>>) -> RequestListeners {
        let data_log = Rc::clone(log);
        let success_log = Rc::clone(log);
        let error_log = Rc::clone(log);
        RequestListeners::new()
            .on_data(move |payload| {
                data_log
                    .borrow_mut()
                    .push(format!("data:{}", String::from_utf8_lossy(payload.as_bytes())));
            })
            .on_success(move || success_log.borrow_mut().push("success".into()))
            .on_error(move |err| error_log.borrow_mut().push(format!("error:{err}")))
    }

    #[test]
    fn success_emits_data_then_success_then_cleans_up() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        handle.deliver_headers(&[]);
        handle.deliver_completion(Some(200), Some(Payload::Text("hello".into())));

        assert_eq!(*log.borrow(), vec!["data:hello", "success"]);
        assert_eq!(request.state(), RequestState::Completed);
        assert!(!request.has_backend());
        assert!(!handle.aborted());
    }

    #[test]
    fn legacy_no_content_status_is_success() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        handle.deliver_completion(Some(1223), None);

        // No body, so no data emission; success still fires.
        assert_eq!(*log.borrow(), vec!["success"]);
        assert_eq!(request.state(), RequestState::Completed);
    }

    #[test]
    fn non_success_status_errors_on_a_later_tick() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        handle.deliver_completion(Some(404), Some(Payload::Text("gone".into())));

        // Not yet: delivery happens after the host callback unwinds.
        assert!(log.borrow().is_empty());
        h.queue.run_until_idle();

        assert_eq!(*log.borrow(), vec!["error:request failed with status 404"]);
        assert_eq!(request.state(), RequestState::Errored);
        assert!(handle.aborted());
        assert!(!request.has_backend());
    }

    #[test]
    fn statusless_completion_coerces_to_zero() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        h.factory
            .last_handle()
            .expect("handle")
            .deliver_completion(None, None);
        h.queue.run_until_idle();

        assert_eq!(*log.borrow(), vec!["error:request failed with status 0"]);
    }

    #[test]
    fn factory_failure_is_deferred_not_thrown() {
        let h = harness();
        h.factory.refuse_creation();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        // Construction returned normally; the outcome arrives on the queue.
        assert_eq!(request.state(), RequestState::Created);
        assert!(log.borrow().is_empty());
        h.queue.run_until_idle();

        assert_eq!(
            *log.borrow(),
            vec!["error:request could not be created: mock backend unavailable"]
        );
        assert_eq!(request.state(), RequestState::Errored);
    }

    #[test]
    fn send_failure_is_deferred_and_aborts_backend() {
        let h = harness();
        h.factory.refuse_next_send();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        h.queue.run_until_idle();
        assert_eq!(
            *log.borrow(),
            vec!["error:request could not be created: mock send refused"]
        );
        assert_eq!(request.state(), RequestState::Errored);
        assert!(h.factory.last_handle().expect("handle").aborted());
    }

    #[test]
    fn rejected_headers_do_not_stop_the_request() {
        let h = harness();
        h.factory.refuse_next_headers();
        let _request = RequestLifecycle::spawn(
            RequestConfig::post(target(), Payload::Text("ping".into())),
            RequestListeners::new(),
            &h.host,
        );

        let handle = h.factory.last_handle().expect("handle");
        assert!(handle.was_sent());
        assert!(h.queue.is_idle());
    }

    #[test]
    fn write_headers_applied_in_order() {
        let h = harness();
        let mut config = RequestConfig::post(target(), Payload::Text("ping".into()));
        config.extra_headers = vec![("x-poll-token".into(), "t1".into())];
        let _request = RequestLifecycle::spawn(config, RequestListeners::new(), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        let names: Vec<String> = handle
            .request_headers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["x-poll-token", "content-type", "accept"]);
        assert_eq!(
            handle.request_header("content-type").as_deref(),
            Some(TEXT_CONTENT_TYPE)
        );
        assert_eq!(handle.request_header("accept").as_deref(), Some(ACCEPT_ANY));
    }

    #[test]
    fn read_requests_carry_no_content_type() {
        let h = harness();
        let _request =
            RequestLifecycle::spawn(RequestConfig::get(target()), RequestListeners::new(), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        assert_eq!(handle.request_header("content-type"), None);
        assert_eq!(handle.request_header("accept").as_deref(), Some(ACCEPT_ANY));
        assert_eq!(handle.opened().map(|(method, _)| method), Some(Method::Get));
    }

    #[test]
    fn credentials_and_timeout_are_delegated() {
        let h = harness();
        let config = RequestConfig::get(target())
            .with_credentials()
            .with_timeout(Duration::from_secs(25));
        let _request = RequestLifecycle::spawn(config, RequestListeners::new(), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        assert_eq!(handle.credentials(), Some(true));
        assert_eq!(handle.timeout(), Some(Duration::from_secs(25)));
    }

    #[test]
    fn abort_suppresses_late_completion() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        request.abort();
        assert_eq!(request.state(), RequestState::Aborted);
        let handle = h.factory.last_handle().expect("handle");
        assert!(handle.aborted());

        // The host delivers anyway; nothing fires.
        handle.deliver_headers(&[]);
        handle.deliver_completion(Some(200), Some(Payload::Text("late".into())));
        h.queue.run_until_idle();
        assert!(log.borrow().is_empty());
        assert_eq!(request.state(), RequestState::Aborted);
    }

    #[test]
    fn abort_beats_a_pending_error_tick() {
        let h = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), tracking_listeners(&log), &h.host);

        h.factory
            .last_handle()
            .expect("handle")
            .deliver_completion(Some(500), None);
        // Abort lands before the deferred error runs.
        request.abort();
        h.queue.run_until_idle();

        assert!(log.borrow().is_empty());
        assert_eq!(request.state(), RequestState::Aborted);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let h = harness();
        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), RequestListeners::new(), &h.host);

        request.abort();
        request.abort();
        request.cleanup(true);
        assert_eq!(request.state(), RequestState::Aborted);
        assert!(!request.has_backend());
    }

    #[test]
    fn reentrant_abort_from_data_listener_is_safe() {
        let h = harness();
        let success = Rc::new(Cell::new(false));
        let success_seen = Rc::clone(&success);

        let slot: Rc<RefCell<Option<Rc<RequestLifecycle>>>> = Rc::new(RefCell::new(None));
        let reenter = Rc::clone(&slot);
        let listeners = RequestListeners::new()
            .on_data(move |_| {
                if let Some(request) = reenter.borrow().as_ref() {
                    request.abort();
                }
            })
            .on_success(move || success_seen.set(true));

        let request =
            RequestLifecycle::spawn(RequestConfig::get(target()), listeners, &h.host);
        *slot.borrow_mut() = Some(Rc::clone(&request));

        h.factory
            .last_handle()
            .expect("handle")
            .deliver_completion(Some(200), Some(Payload::Text("x".into())));

        // The terminal state was fixed before listeners ran; the reentrant
        // abort is a no-op and success still fires.
        assert!(success.get());
        assert_eq!(request.state(), RequestState::Completed);
    }

    #[test]
    fn cookie_jar_called_once_before_send_and_once_on_headers() -> TestResult {
        struct CountingJar {
            added: Cell<usize>,
            parsed: Cell<usize>,
        }
        impl CookieJar for CountingJar {
            fn add_cookies(&self, _backend: &mut dyn RequestBackend) {
                self.added.set(self.added.get() + 1);
            }
            fn parse_cookies(&self, _header: &str) {
                self.parsed.set(self.parsed.get() + 1);
            }
        }

        let h = harness();
        let jar = Rc::new(CountingJar {
            added: Cell::new(0),
            parsed: Cell::new(0),
        });
        let config = RequestConfig::get(target())
            .with_credentials()
            .with_cookie_jar(Rc::clone(&jar) as Rc<dyn CookieJar>);
        let _request = RequestLifecycle::spawn(config, RequestListeners::new(), &h.host);

        assert_eq!(jar.added.get(), 1);
        assert_eq!(jar.parsed.get(), 0);

        let handle = h.factory.last_handle().expect("handle");
        handle.deliver_headers(&[("set-cookie", "sid=9")]);
        assert_eq!(jar.parsed.get(), 1);

        // Duplicate headers notification does not re-parse.
        handle.deliver_headers(&[("set-cookie", "sid=9")]);
        assert_eq!(jar.parsed.get(), 1);

        handle.deliver_completion(Some(200), None);
        assert_eq!(jar.added.get(), 1);
        assert_eq!(jar.parsed.get(), 1);
        Ok(())
    }

    #[test]
    fn no_jar_means_no_cookie_traffic() {
        let h = harness();
        let _request =
            RequestLifecycle::spawn(RequestConfig::get(target()), RequestListeners::new(), &h.host);

        let handle = h.factory.last_handle().expect("handle");
        handle.deliver_headers(&[("set-cookie", "sid=9")]);
        handle.deliver_completion(Some(200), None);
        assert_eq!(handle.request_header("cookie"), None);
    }
}
