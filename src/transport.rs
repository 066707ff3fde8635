//! The polling transport: one read cycle, one write cycle.
//!
//! A [`PollingTransport`] issues one [`RequestLifecycle`] per operation and
//! forwards its outcomes to the external consumer. The consumer owns the
//! loop policy — when to poll again, whether to retry, how to decode frames;
//! this layer only classifies failures as poll or write errors and hands
//! them over.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::backend::{Method, Payload};
use crate::cookie::{CookieJar, MemoryCookieJar};
use crate::error::TransportError;
use crate::host::Host;
use crate::origin;
use crate::request::{RequestConfig, RequestLifecycle, RequestListeners};

/// The external consumer of transport outcomes — typically the polling state
/// machine that schedules the next cycle and decodes frames.
pub trait TransportEvents {
    /// A response body arrived from a poll request.
    fn on_data(&self, payload: Payload);

    /// A poll or write request failed terminally. No retry happens here.
    fn on_error(&self, error: TransportError);
}

/// Transport construction options.
pub struct TransportConfig {
    url: Url,
    with_credentials: bool,
    timeout: Option<Duration>,
    extra_headers: Vec<(String, String)>,
    cookie_jar: Option<Rc<dyn CookieJar>>,
}

impl TransportConfig {
    /// Target the given endpoint. The URL is complete; query assembly is the
    /// caller's concern.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            with_credentials: false,
            timeout: None,
            extra_headers: Vec::new(),
            cookie_jar: None,
        }
    }

    /// Enable credentialed mode: a cookie jar is shared with every request,
    /// and backends that support a credentials flag get it set.
    #[must_use]
    pub fn with_credentials(mut self) -> Self {
        self.with_credentials = true;
        self
    }

    /// Delegate a per-request deadline to the backend.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header to every request this transport issues.
    #[must_use]
    pub fn with_extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Share a caller-owned cookie jar instead of the default in-memory one.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: Rc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }
}

/// Issues poll and write requests against one endpoint.
pub struct PollingTransport {
    url: Url,
    with_credentials: bool,
    timeout: Option<Duration>,
    extra_headers: Vec<(String, String)>,
    cross_domain: bool,
    cookie_jar: Option<Rc<dyn CookieJar>>,
    host: Rc<Host>,
    events: Rc<dyn TransportEvents>,
    // Weak on purpose: the transport reaches the in-flight poll only to
    // cancel it, never to keep it alive.
    active_poll: RefCell<Weak<RequestLifecycle>>,
}

impl PollingTransport {
    /// Build a transport. Cross-domain is computed here, once, from the
    /// host's context origin, and never changes afterwards.
    #[must_use]
    pub fn new(config: TransportConfig, host: Rc<Host>, events: Rc<dyn TransportEvents>) -> Self {
        let cross_domain = origin::cross_domain(host.origin(), &config.url);
        let cookie_jar = match (config.cookie_jar, config.with_credentials) {
            (Some(jar), _) => Some(jar),
            (None, true) => Some(Rc::new(MemoryCookieJar::new()) as Rc<dyn CookieJar>),
            (None, false) => None,
        };
        debug!(url = %config.url, cross_domain, "polling transport ready");
        Self {
            url: config.url,
            with_credentials: config.with_credentials,
            timeout: config.timeout,
            extra_headers: config.extra_headers,
            cross_domain,
            cookie_jar,
            host,
            events,
            active_poll: RefCell::new(Weak::new()),
        }
    }

    /// Whether the target lies outside the context origin.
    #[must_use]
    pub fn cross_domain(&self) -> bool {
        self.cross_domain
    }

    /// The jar shared with every request, present in credentialed mode.
    #[must_use]
    pub fn cookie_jar(&self) -> Option<Rc<dyn CookieJar>> {
        self.cookie_jar.clone()
    }

    /// Issue one read cycle. The response body is forwarded to the
    /// consumer's `on_data`; failure arrives as [`TransportError::Poll`].
    ///
    /// One poll is expected outstanding at a time; the returned handle is
    /// also reachable through [`cancel_poll`](Self::cancel_poll).
    pub fn do_poll(&self) -> Rc<RequestLifecycle> {
        debug!(url = %self.url, "poll");
        let data_events = Rc::clone(&self.events);
        let error_events = Rc::clone(&self.events);
        let listeners = RequestListeners::new()
            .on_data(move |payload| data_events.on_data(payload))
            .on_error(move |err| error_events.on_error(TransportError::Poll(err)));

        let request =
            RequestLifecycle::spawn(self.request_config(Method::Get, None), listeners, &self.host);
        *self.active_poll.borrow_mut() = Rc::downgrade(&request);
        request
    }

    /// Abort the in-flight poll, if one is still running. No outcome fires
    /// for an aborted poll.
    pub fn cancel_poll(&self) {
        let active = self.active_poll.borrow().upgrade();
        if let Some(request) = active {
            request.abort();
        }
    }

    /// Issue one write cycle carrying `payload`. `on_flushed` runs exactly
    /// once on success; failure arrives as [`TransportError::Write`]. The
    /// write path attaches no data listener — response bodies on writes are
    /// not decoded.
    pub fn do_write(
        &self,
        payload: Payload,
        on_flushed: impl FnOnce() + 'static,
    ) -> Rc<RequestLifecycle> {
        debug!(url = %self.url, bytes = payload.len(), "write");
        let error_events = Rc::clone(&self.events);
        let listeners = RequestListeners::new()
            .on_success(on_flushed)
            .on_error(move |err| error_events.on_error(TransportError::Write(err)));

        RequestLifecycle::spawn(
            self.request_config(Method::Post, Some(payload)),
            listeners,
            &self.host,
        )
    }

    fn request_config(&self, method: Method, payload: Option<Payload>) -> RequestConfig {
        RequestConfig {
            method,
            url: self.url.clone(),
            payload,
            timeout: self.timeout,
            with_credentials: self.with_credentials,
            extra_headers: self.extra_headers.clone(),
            cookie_jar: self.cookie_jar.clone(),
        }
    }
}
