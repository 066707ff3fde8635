//! Native request backend over [`reqwest`]'s blocking client.
//!
//! Each `send` runs on its own worker thread; the thread reports one
//! [`Completion`] through an [`async_channel`] and exits. The single-threaded
//! core never sees that thread: the host pumps [`ReqwestDriver::dispatch`]
//! (or [`ReqwestDriver::dispatch_blocking`]) on its loop, which routes each
//! completion to the owning request's state and fires its readiness listener
//! there. Aborting a request is best-effort — the in-flight exchange cannot
//! be cancelled mid-wire, but its completion is discarded unrouted.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};
use url::Url;

use crate::backend::{
    BackendFactory, Method, Payload, ReadyListener, ReadyState, RequestBackend,
};
use crate::error::BackendError;

struct Completion {
    slot: u64,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Option<Payload>,
}

#[derive(Default)]
struct SlotState {
    ready: Option<ReadyState>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Option<Payload>,
    listener: Option<ReadyListener>,
    aborted: bool,
}

/// Owns the blocking client and routes worker-thread completions back onto
/// the event-loop thread.
pub struct ReqwestDriver {
    client: reqwest::blocking::Client,
    completions_tx: async_channel::Sender<Completion>,
    completions_rx: async_channel::Receiver<Completion>,
    slots: RefCell<BTreeMap<u64, Weak<RefCell<SlotState>>>>,
    next_slot: Cell<u64>,
}

impl ReqwestDriver {
    /// A driver over a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::blocking::Client::new())
    }

    /// A driver over a caller-configured client (proxies, TLS, pools).
    #[must_use]
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        let (completions_tx, completions_rx) = async_channel::unbounded();
        Self {
            client,
            completions_tx,
            completions_rx,
            slots: RefCell::new(BTreeMap::new()),
            next_slot: Cell::new(0),
        }
    }

    /// Route every completion that has already arrived. Returns how many
    /// were dispatched. Call from the event-loop thread only.
    pub fn dispatch(&self) -> usize {
        let mut routed = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.route(completion);
            routed += 1;
        }
        routed
    }

    /// Block until at least one completion arrives, route it, then drain the
    /// rest. Returns how many were dispatched; 0 means the channel is dead.
    pub fn dispatch_blocking(&self) -> usize {
        match self.completions_rx.recv_blocking() {
            Ok(completion) => {
                self.route(completion);
                1 + self.dispatch()
            }
            Err(_) => 0,
        }
    }

    fn route(&self, completion: Completion) {
        let slot = self.slots.borrow_mut().remove(&completion.slot);
        let Some(state) = slot.and_then(|weak| weak.upgrade()) else {
            trace!(slot = completion.slot, "completion for a released request dropped");
            return;
        };
        {
            let mut state = state.borrow_mut();
            if state.aborted {
                return;
            }
            state.status = completion.status;
            state.headers = completion.headers;
            state.body = completion.body;
        }
        // A statused response surfaces headers first, then the terminal
        // event, preserving per-request readiness ordering.
        if state.borrow().status.is_some() {
            state.borrow_mut().ready = Some(ReadyState::HeadersReceived);
            fire(&state);
        }
        state.borrow_mut().ready = Some(ReadyState::Done);
        fire(&state);
    }
}

impl Default for ReqwestDriver {
    fn default() -> Self {
        Self::new()
    }
}

// Same discipline as the mock backend: never hold the state borrow while the
// listener runs, and keep a listener swapped in mid-call.
fn fire(state: &Rc<RefCell<SlotState>>) {
    let listener = state.borrow_mut().listener.take();
    if let Some(mut listener) = listener {
        listener();
        let mut state = state.borrow_mut();
        if state.listener.is_none() {
            state.listener = Some(listener);
        }
    }
}

/// Factory for [`ReqwestBackend`]s.
pub struct ReqwestFactory {
    driver: Rc<ReqwestDriver>,
}

impl ReqwestFactory {
    /// A factory handing out backends bound to `driver`.
    #[must_use]
    pub fn new(driver: Rc<ReqwestDriver>) -> Self {
        Self { driver }
    }
}

impl BackendFactory for ReqwestFactory {
    fn create(&self) -> Result<Box<dyn RequestBackend>, BackendError> {
        let driver = Rc::clone(&self.driver);
        let slot = driver.next_slot.get();
        driver.next_slot.set(slot + 1);
        let state = Rc::new(RefCell::new(SlotState::default()));
        driver
            .slots
            .borrow_mut()
            .insert(slot, Rc::downgrade(&state));
        Ok(Box::new(ReqwestBackend {
            driver,
            slot,
            state,
            method: None,
            url: None,
            headers: Vec::new(),
            timeout: None,
        }))
    }
}

/// One request over the blocking client.
pub struct ReqwestBackend {
    driver: Rc<ReqwestDriver>,
    slot: u64,
    state: Rc<RefCell<SlotState>>,
    method: Option<Method>,
    url: Option<Url>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestBackend for ReqwestBackend {
    fn open(&mut self, method: Method, url: &Url) -> Result<(), BackendError> {
        self.method = Some(method);
        self.url = Some(url.clone());
        self.state.borrow_mut().ready = Some(ReadyState::Opened);
        Ok(())
    }

    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(BackendError::new(format!("invalid header name {name:?}")));
        }
        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn set_credentials(&mut self, _enabled: bool) -> bool {
        // A native client is not subject to an ambient credentials policy;
        // cookies travel through the jar's explicit header.
        false
    }

    fn on_ready(&mut self, listener: ReadyListener) {
        self.state.borrow_mut().listener = Some(listener);
    }

    fn send(&mut self, payload: Option<Payload>) -> Result<(), BackendError> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| BackendError::new("send before open"))?;
        let method = match self.method.unwrap_or(Method::Get) {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let client = self.driver.client.clone();
        let completions = self.driver.completions_tx.clone();
        let slot = self.slot;
        let headers = self.headers.clone();
        let timeout = self.timeout;
        let body = payload.map(Payload::into_bytes);

        thread::Builder::new()
            .name(format!("longpoll-request-{slot}"))
            .spawn(move || {
                let mut request = client.request(method, url);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                if let Some(timeout) = timeout {
                    request = request.timeout(timeout);
                }
                if let Some(body) = body {
                    request = request.body(body);
                }

                let completion = match request.send() {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let headers: Vec<(String, String)> = response
                            .headers()
                            .iter()
                            .filter_map(|(name, value)| {
                                value
                                    .to_str()
                                    .ok()
                                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                            })
                            .collect();
                        let content_type = headers
                            .iter()
                            .find(|(name, _)| name == "content-type")
                            .map(|(_, value)| value.clone())
                            .unwrap_or_default();
                        let bytes = response
                            .bytes()
                            .map(|bytes| bytes.to_vec())
                            .unwrap_or_default();
                        let body = if bytes.is_empty() {
                            None
                        } else if content_type.starts_with("text/") {
                            Some(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()))
                        } else {
                            Some(Payload::Binary(bytes))
                        };
                        Completion {
                            slot,
                            status: Some(status),
                            headers,
                            body,
                        }
                    }
                    Err(error) => {
                        debug!(slot, error = %error, "request finished without a status");
                        Completion {
                            slot,
                            status: error.status().map(|status| status.as_u16()),
                            headers: Vec::new(),
                            body: None,
                        }
                    }
                };

                if completions.send_blocking(completion).is_err() {
                    warn!(slot, "driver gone before completion could be delivered");
                }
            })
            .map_err(|error| BackendError::new(format!("could not spawn request worker: {error}")))?;
        Ok(())
    }

    fn abort(&mut self) {
        self.state.borrow_mut().aborted = true;
        self.driver.slots.borrow_mut().remove(&self.slot);
        trace!(slot = self.slot, "request abandoned");
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
            .headers
            .iter()
            .find(|(key, _)| *key == lower)
            .map(|(_, value)| value.clone())
    }

    fn response_body(&self) -> Option<Payload> {
        self.state.borrow().body.clone()
    }
}

impl Drop for ReqwestBackend {
    fn drop(&mut self) {
        // Completions for a released request must not fire into a torn-down
        // lifecycle.
        self.driver.slots.borrow_mut().remove(&self.slot);
    }
}
