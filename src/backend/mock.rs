//! An in-memory, scriptable request backend.
//!
//! Used by the test suites and by embedding hosts without a native HTTP
//! stack. The factory hands out backends whose state is shared with a
//! [`MockHandle`], through which a test (or host glue) delivers response
//! headers and completions and inspects what the lifecycle did.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use url::Url;

use crate::backend::{BackendFactory, Method, Payload, ReadyListener, ReadyState, RequestBackend};
use crate::error::BackendError;

#[derive(Default)]
struct MockState {
    opened: Option<(Method, Url)>,
    request_headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    credentials: Option<bool>,
    sent_payload: Option<Option<Payload>>,
    listener: Option<ReadyListener>,
    ready: Option<ReadyState>,
    status: Option<u16>,
    response_headers: Vec<(String, String)>,
    body: Option<Payload>,
    aborted: bool,
    fail_open: bool,
    fail_send: bool,
    fail_headers: bool,
}

/// Produces [`MockBackend`]s and records a [`MockHandle`] for each.
///
/// Failures are scripted at the factory so they are already in place when a
/// lifecycle consumes the backend synchronously at spawn.
pub struct MockFactory {
    fail_create: Cell<bool>,
    fail_open_next: Cell<bool>,
    fail_send_next: Cell<bool>,
    fail_headers_next: Cell<bool>,
    binary: Cell<bool>,
    cross_origin: Cell<bool>,
    handles: RefCell<Vec<MockHandle>>,
}

impl MockFactory {
    /// A factory that succeeds and advertises full capability.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_create: Cell::new(false),
            fail_open_next: Cell::new(false),
            fail_send_next: Cell::new(false),
            fail_headers_next: Cell::new(false),
            binary: Cell::new(true),
            cross_origin: Cell::new(true),
            handles: RefCell::new(Vec::new()),
        }
    }

    /// Make every subsequent `create` fail, as an unavailable primitive would.
    pub fn refuse_creation(&self) {
        self.fail_create.set(true);
    }

    /// Script the next backend's `open` to fail.
    pub fn refuse_next_open(&self) {
        self.fail_open_next.set(true);
    }

    /// Script the next backend's `send` to fail.
    pub fn refuse_next_send(&self) {
        self.fail_send_next.set(true);
    }

    /// Script every header application on the next backend to fail.
    pub fn refuse_next_headers(&self) {
        self.fail_headers_next.set(true);
    }

    /// Script the advertised capability flags.
    pub fn advertise(&self, binary: bool, cross_origin: bool) {
        self.binary.set(binary);
        self.cross_origin.set(cross_origin);
    }

    /// Handle for the most recently created backend.
    #[must_use]
    pub fn last_handle(&self) -> Option<MockHandle> {
        self.handles.borrow().last().cloned()
    }

    /// How many backends this factory has created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.handles.borrow().len()
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for MockFactory {
    fn create(&self) -> Result<Box<dyn RequestBackend>, BackendError> {
        if self.fail_create.get() {
            return Err(BackendError::new("mock backend unavailable"));
        }
        let state = Rc::new(RefCell::new(MockState {
            fail_open: self.fail_open_next.take(),
            fail_send: self.fail_send_next.take(),
            fail_headers: self.fail_headers_next.take(),
            ..MockState::default()
        }));
        self.handles
            .borrow_mut()
            .push(MockHandle { state: Rc::clone(&state) });
        Ok(Box::new(MockBackend { state }))
    }

    fn supports_binary(&self) -> bool {
        self.binary.get()
    }

    fn supports_cross_origin(&self) -> bool {
        self.cross_origin.get()
    }
}

/// The lifecycle-facing half of a scripted request.
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl RequestBackend for MockBackend {
    fn open(&mut self, method: Method, url: &Url) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if state.fail_open {
            return Err(BackendError::new("mock open refused"));
        }
        state.opened = Some((method, url.clone()));
        state.ready = Some(ReadyState::Opened);
        Ok(())
    }

    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if state.fail_headers {
            return Err(BackendError::new("mock header refused"));
        }
        state
            .request_headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.state.borrow_mut().timeout = Some(timeout);
    }

    fn set_credentials(&mut self, enabled: bool) -> bool {
        self.state.borrow_mut().credentials = Some(enabled);
        true
    }

    fn on_ready(&mut self, listener: ReadyListener) {
        self.state.borrow_mut().listener = Some(listener);
    }

    fn send(&mut self, payload: Option<Payload>) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if state.fail_send {
            return Err(BackendError::new("mock send refused"));
        }
        state.sent_payload = Some(payload);
        Ok(())
    }

    fn abort(&mut self) {
        self.state.borrow_mut().aborted = true;
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready.unwrap_or(ReadyState::Opened)
    }

    fn status(&self) -> Option<u16> {
        self.state.borrow().status
    }

    fn response_header(&self, name: &str) -> Option<String> {
        let lower = name.to_ascii_lowercase();
        self.state
            .borrow()
            .response_headers
            .iter()
            .find(|(key, _)| *key == lower)
            .map(|(_, value)| value.clone())
    }

    fn response_body(&self) -> Option<Payload> {
        self.state.borrow().body.clone()
    }
}

/// The test-facing half of a scripted request.
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
}

impl MockHandle {
    /// Deliver response headers and advance readiness to `HeadersReceived`.
    pub fn deliver_headers(&self, headers: &[(&str, &str)]) {
        {
            let mut state = self.state.borrow_mut();
            state.response_headers = headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), (*value).to_string()))
                .collect();
            state.ready = Some(ReadyState::HeadersReceived);
        }
        self.fire();
    }

    /// Deliver the terminal status and body and advance readiness to `Done`.
    ///
    /// `status: None` models a primitive that produced no numeric status
    /// (network-level failure, or its own timeout firing).
    pub fn deliver_completion(&self, status: Option<u16>, body: Option<Payload>) {
        {
            let mut state = self.state.borrow_mut();
            state.status = status;
            state.body = body;
            state.ready = Some(ReadyState::Done);
        }
        self.fire();
    }

    /// Whether the lifecycle force-terminated this backend.
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.state.borrow().aborted
    }

    /// The payload handed to `send`, if `send` was reached.
    #[must_use]
    pub fn sent_payload(&self) -> Option<Option<Payload>> {
        self.state.borrow().sent_payload.clone()
    }

    /// Whether `send` was reached at all.
    #[must_use]
    pub fn was_sent(&self) -> bool {
        self.state.borrow().sent_payload.is_some()
    }

    /// The method and target `open` received.
    #[must_use]
    pub fn opened(&self) -> Option<(Method, Url)> {
        self.state.borrow().opened.clone()
    }

    /// All request headers in application order, names lowercased.
    #[must_use]
    pub fn request_headers(&self) -> Vec<(String, String)> {
        self.state.borrow().request_headers.clone()
    }

    /// Look up one applied request header.
    #[must_use]
    pub fn request_header(&self, name: &str) -> Option<String> {
        let lower = name.to_ascii_lowercase();
        self.state
            .borrow()
            .request_headers
            .iter()
            .find(|(key, _)| *key == lower)
            .map(|(_, value)| value.clone())
    }

    /// The credentials flag the lifecycle applied, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<bool> {
        self.state.borrow().credentials
    }

    /// The timeout the lifecycle delegated, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.state.borrow().timeout
    }

    // Invoke the readiness listener without holding the state borrow: the
    // listener may reenter (cleanup replaces it with a no-op mid-call), in
    // which case the old listener must not be restored afterwards.
    fn fire(&self) {
        let listener = self.state.borrow_mut().listener.take();
        if let Some(mut listener) = listener {
            listener();
            let mut state = self.state.borrow_mut();
            if state.listener.is_none() {
                state.listener = Some(listener);
            }
        }
    }
}
