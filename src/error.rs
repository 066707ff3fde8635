//! Error types for the long-poll transport core.

use thiserror::Error;

/// A failure reported by the native request primitive.
///
/// Carries the primitive's own failure text; the core does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(String);

impl BackendError {
    /// Wrap a primitive failure message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// No request backend could be constructed during the capability probe.
///
/// Carries the preferred primitive's failure; a legacy fallback failure is
/// swallowed best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no usable request backend: {0}")]
pub struct ProbeError(BackendError);

impl ProbeError {
    pub(crate) fn new(reason: BackendError) -> Self {
        Self(reason)
    }
}

/// Terminal failure of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Backend construction or setup failed before the request was sent.
    ///
    /// Always delivered on a later scheduler tick, never raised from
    /// construction itself.
    #[error("request could not be created: {0}")]
    Creation(#[from] BackendError),

    /// The request completed with a status outside the success set.
    ///
    /// A backend that reports no numeric status at all (including its own
    /// timeout firing) surfaces here as status 0.
    #[error("request failed with status {status}")]
    Status {
        /// The reported HTTP status, or 0 when none was available.
        status: u16,
    },
}

impl RequestError {
    /// The HTTP status carried by this error, if it is a status failure.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Creation(_) => None,
            Self::Status { status } => Some(*status),
        }
    }
}

/// A request failure classified by the operation that issued it.
///
/// This is the form forwarded to the external consumer; retry and reconnect
/// policy are entirely that consumer's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The in-flight poll request failed.
    #[error("poll request failed: {0}")]
    Poll(#[source] RequestError),

    /// A write request failed.
    #[error("write request failed: {0}")]
    Write(#[source] RequestError),
}
