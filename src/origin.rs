//! Execution-context origins and cross-domain determination.

use url::Url;

/// A scheme/host/port triple identifying where the transport runs.
///
/// The port is always effective: when a context reports none, the
/// conventional default for its scheme (80 for http, 443 for https) is
/// substituted, so `http://a` and `http://a:80` are the same origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    /// Build an origin from its parts. Returns `None` when no port is given
    /// and the scheme has no conventional default.
    #[must_use]
    pub fn new(scheme: &str, host: &str, port: Option<u16>) -> Option<Self> {
        let scheme = scheme.to_ascii_lowercase();
        let port = port.or(default_port(&scheme))?;
        Some(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// The origin of an absolute URL, when one can be derived.
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        Some(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default()?,
        })
    }
}

/// Whether `target` lies outside `context`'s origin.
///
/// False without a context origin (headless hosts have nothing to differ
/// from); true for targets whose own origin cannot be derived.
#[must_use]
pub fn cross_domain(context: Option<&Origin>, target: &Url) -> bool {
    let Some(context) = context else {
        return false;
    };
    Origin::from_url(target).is_none_or(|target| target != *context)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}
