//! The native request primitive, modeled as an interface.
//!
//! [`RequestBackend`] exposes exactly what the request lifecycle needs from
//! a host HTTP primitive: open, header application, send, abort, readiness
//! notification, and terminal status/header/body access. Alternate host
//! environments supply alternate implementations without touching the
//! lifecycle itself; [`BackendFactory`] is how one concrete backend is
//! selected once at startup by the capability probe.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::BackendError;

pub mod mock;

#[cfg(feature = "reqwest")]
pub mod reqwest_backend;

/// Callback invoked whenever the backend's readiness advances.
pub type ReadyListener = Box<dyn FnMut()>;

/// The only two methods this transport issues: reads poll with GET, writes
/// post with POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read cycle.
    Get,
    /// Write cycle.
    Post,
}

impl Method {
    /// The wire form of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request or response content.
///
/// Binary payloads are only usable when the capability probe reported
/// binary support; callers without it stay textual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text content.
    Text(String),
    /// Raw binary content.
    Binary(Vec<u8>),
}

impl Payload {
    /// The content as bytes, regardless of form.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Consume into raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Content length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// How far the backend has progressed, as reported through the readiness
/// listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The request is open but nothing has come back yet.
    Opened,
    /// Response headers are available; the body may still be in flight.
    HeadersReceived,
    /// The request finished, successfully or not. Status and body are final.
    Done,
}

/// A single native request handle.
///
/// Exclusively owned by one request lifecycle from creation to cleanup.
/// Implementations deliver progress by invoking the listener installed via
/// [`on_ready`](Self::on_ready) on the event-loop thread, never concurrently.
pub trait RequestBackend {
    /// Prepare a request for `method` against `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the primitive rejects the target.
    fn open(&mut self, method: Method, url: &Url) -> Result<(), BackendError>;

    /// Apply one request header.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the primitive rejects the header. Callers
    /// treat each application independently; one rejected header never
    /// aborts the request.
    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), BackendError>;

    /// Delegate a deadline to the primitive's own timeout mechanism.
    /// Exceeding it surfaces as a statusless completion, not a distinct kind.
    fn set_timeout(&mut self, timeout: Duration);

    /// Apply the cross-origin credentials flag. Returns whether the
    /// primitive supports one at all.
    fn set_credentials(&mut self, enabled: bool) -> bool;

    /// Install the readiness listener. Replaces any previous listener;
    /// installing a no-op is how a lifecycle guards against late callbacks
    /// after teardown.
    fn on_ready(&mut self, listener: ReadyListener);

    /// Put the request on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] only for synchronous dispatch failures;
    /// asynchronous failures arrive through the readiness listener.
    fn send(&mut self, payload: Option<Payload>) -> Result<(), BackendError>;

    /// Forcibly terminate the request. Best-effort and infallible; failures
    /// inside the primitive are swallowed.
    fn abort(&mut self);

    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// The terminal HTTP status, when the primitive produced a numeric one.
    fn status(&self) -> Option<u16>;

    /// Look up a response header by name, case-insensitively.
    fn response_header(&self, name: &str) -> Option<String>;

    /// The response body, if a non-empty one arrived.
    fn response_body(&self) -> Option<Payload>;
}

/// Constructs request handles for one concrete backend.
pub trait BackendFactory {
    /// Construct a fresh handle.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the primitive is unavailable in this
    /// host; the capability probe interprets that as grounds for fallback.
    fn create(&self) -> Result<Box<dyn RequestBackend>, BackendError>;

    /// Whether handles from this factory carry binary payloads.
    fn supports_binary(&self) -> bool {
        true
    }

    /// Whether handles from this factory can target foreign origins.
    fn supports_cross_origin(&self) -> bool {
        true
    }
}
