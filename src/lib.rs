//! # HTTP Long-Poll Transport Core
//!
//! An event-driven long-polling transport: framed data is exchanged with a
//! remote endpoint by repeatedly issuing HTTP requests when no persistent
//! bidirectional channel is available. The crate owns the lifecycle of each
//! individual request; deciding *when* to poll or write, and interpreting the
//! bytes that come back, belongs to the consumer driving it.
//!
//! # Request lifecycle
//!
//! ```text
//! PollingTransport::do_poll() / do_write()
//!      │
//!      ▼
//! RequestLifecycle ──► RequestBackend (selected once by capability probe)
//!      │                     │
//!      │   Created ──► Sent ──► HeadersReceived ──► Completed
//!      │                │              │                │
//!      │                └──────────────┴──► Errored     │
//!      │                       abort() ──► Aborted      │
//!      ▼                                                ▼
//! RequestRegistry (shutdown abort-all)        data / success / error
//! ```
//!
//! Creation never fails synchronously: any failure before the request is on
//! the wire is posted through the host [`scheduler`](crate::scheduler) and
//! delivered as an `error` outcome on a later tick, so listeners attached
//! immediately after construction still observe it. A request reaches a
//! terminal state at most once, and resource cleanup is idempotent.
//!
//! The whole core is single-threaded and cooperative: state changes happen
//! only on callback boundaries delivered by the host's event loop, so there
//! are no locks. The `reqwest` feature adds a native backend that confines
//! its worker threads behind a completion channel drained on the loop thread.

#![warn(missing_docs)]

pub mod backend;
pub mod capability;
pub mod cookie;
pub mod error;
pub mod host;
pub mod origin;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod transport;

pub use backend::{Method, Payload};
pub use error::{RequestError, TransportError};
pub use transport::{PollingTransport, TransportConfig, TransportEvents};

/// The standard success status.
pub const STATUS_OK: u16 = 200;

/// Legacy success status: some older HTTP stacks report an empty no-content
/// response as 1223 rather than 204. Treated as success, never generalized.
pub const STATUS_NO_CONTENT_LEGACY: u16 = 1223;

/// Content type applied to write requests.
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// Accept header value applied to every request.
pub const ACCEPT_ANY: &str = "*/*";
