//! Cookie propagation for credentialed requests.
//!
//! The transport only needs a narrow capability interface: put stored
//! cookies on an outgoing request, and record whatever a response's
//! `Set-Cookie` header carries. A full store with expiry and domain matching
//! belongs to an HTTP client, not here.

use std::cell::RefCell;
use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::backend::RequestBackend;

/// Read/write cookie headers independently of any full cookie store.
///
/// One jar is shared by reference across every request a transport issues;
/// implementations must not keep per-request state beyond these two calls.
pub trait CookieJar {
    /// Attach stored cookies to an outgoing request. Invoked exactly once
    /// per request, immediately before send.
    fn add_cookies(&self, backend: &mut dyn RequestBackend);

    /// Record cookies from a `Set-Cookie` response header. Invoked exactly
    /// once per request, when response headers become available. Malformed
    /// input simply yields no cookies.
    fn parse_cookies(&self, header: &str);
}

// Attribute names that may trail the cookie pair in a Set-Cookie header.
const COOKIE_ATTRIBUTES: [&str; 7] = [
    "path", "domain", "expires", "max-age", "samesite", "secure", "httponly",
];

/// An in-memory name→value jar.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RefCell<BTreeMap<String, String>>,
}

impl MemoryCookieJar {
    /// An empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one cookie by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.borrow().get(name).cloned()
    }

    /// How many cookies are stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.borrow().len()
    }

    /// Whether the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.borrow().is_empty()
    }

    /// The `Cookie` header value for the stored set, if any.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.borrow();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl CookieJar for MemoryCookieJar {
    fn add_cookies(&self, backend: &mut dyn RequestBackend) {
        if let Some(header) = self.cookie_header() {
            if let Err(error) = backend.set_request_header("cookie", &header) {
                debug!(error = %error, "cookie header rejected");
            }
        }
    }

    fn parse_cookies(&self, header: &str) {
        for part in header.split(';') {
            let Some((name, value)) = part.split_once('=') else {
                // Bare attributes (Secure, HttpOnly) and noise land here.
                continue;
            };
            let name = name.trim();
            if name.is_empty() || COOKIE_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            trace!(cookie = name, "cookie recorded");
            self.cookies
                .borrow_mut()
                .insert(name.to_string(), value.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::backend::mock::MockFactory;
    use crate::backend::{BackendFactory, Method};

    #[test]
    fn parses_pairs_and_skips_attributes() {
        let jar = MemoryCookieJar::new();
        jar.parse_cookies("sid=abc123; Path=/; HttpOnly; Max-Age=3600");

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get("sid").as_deref(), Some("abc123"));
    }

    #[test]
    fn malformed_headers_parse_to_nothing() {
        let jar = MemoryCookieJar::new();
        jar.parse_cookies("");
        jar.parse_cookies(";;;");
        jar.parse_cookies("no-equals-sign-here");

        assert!(jar.is_empty());
        assert_eq!(jar.cookie_header(), None);
    }

    #[test]
    fn add_cookies_sets_single_header() {
        let jar = MemoryCookieJar::new();
        jar.parse_cookies("a=1");
        jar.parse_cookies("b=2; Secure");

        let factory = MockFactory::new();
        let mut backend = factory.create().expect("create");
        backend
            .open(Method::Get, &Url::parse("http://example.test/").expect("url"))
            .expect("open");
        jar.add_cookies(backend.as_mut());

        let handle = factory.last_handle().expect("handle");
        assert_eq!(handle.request_header("cookie").as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn empty_jar_sets_no_header() {
        let jar = MemoryCookieJar::new();
        let factory = MockFactory::new();
        let mut backend = factory.create().expect("create");
        jar.add_cookies(backend.as_mut());

        let handle = factory.last_handle().expect("handle");
        assert_eq!(handle.request_header("cookie"), None);
    }
}
