//! Sentry error reporting for tnet services.
//!
//! This crate provides a small, synchronous reporting client for
//! [Sentry](https://sentry.io/), a process-wide capture hook that reports
//! panics and renders a generic JSON 500 response for errors that escape a
//! request handler, and the routine behind the `sentry-test` command which
//! checks that the collector can be reached.
//!
//! # Quickstart
//!
//! The most convenient way to use this library is via the [`init`] function,
//! which builds a [`Client`] from a [`ReportingConfig`] and installs the
//! capture hook for it. The returned guard dereferences to the client:
//!
//! ```no_run
//! let sentry = tnet_sentry::init(tnet_sentry::ReportingConfig::from_env()?)?;
//!
//! let err = "NaN".parse::<u32>().unwrap_err();
//! if let Err(failure) = sentry.capture_error(&err) {
//!     eprintln!("not reported: {}", failure);
//! }
//! # Ok::<(), tnet_sentry::ConfigError>(())
//! ```
//!
//! Every capture sends exactly one envelope and returns a [`DeliveryResult`]:
//! the identifier assigned by the collector, or a [`TransmissionError`]
//! describing why it was not delivered. Nothing is queued or retried.
//!
//! # Features
//!
//! - `transport`: the default HTTP transport based on blocking `reqwest`.
//!   Without it [`Client::new`] fails and only [`Client::with_transport`]
//!   can be used.
//! - `native-tls` / `rustls`: the TLS backend of the HTTP transport.
#![warn(missing_docs)]

mod auth;
pub mod backtrace;
mod client;
mod constants;
pub mod connectivity;
mod dsn;
mod error;
pub mod hook;
mod init;
mod logger;
mod options;
mod performance;
mod project_id;
pub mod protocol;
mod transport;
pub mod utils;

pub use crate::auth::{Auth, ParseAuthError, PROTOCOL_VERSION};
pub use crate::client::Client;
pub use crate::constants::{SDK_NAME, VERSION};
pub use crate::dsn::{Dsn, ParseDsnError, Scheme};
pub use crate::error::{event_from_error, event_from_panic};
pub use crate::init::{init, InitGuard};
pub use crate::logger::{DiagnosticSink, LOG_TARGET};
pub use crate::options::{ConfigError, HttpOptions, ReportingConfig};
pub use crate::performance::{PrematureFinishError, Span, Transaction, TransactionContext};
pub use crate::project_id::{ParseProjectIdError, ProjectId};
pub use crate::protocol::{Envelope, Event, Level};
pub use crate::transport::{DeliveryResult, TransmissionError, Transport};

/// The transports that ship with this crate.
pub mod transports {
    #[cfg(feature = "transport")]
    pub use crate::transport::ReqwestHttpTransport;
    pub use crate::transport::Transport;
}

// Re-export external types for convenience
pub use uuid::Uuid;
