//! The event protocol: events, exceptions, transactions and the envelope
//! container they are shipped in.
//!
//! Most types are directly serializable or deserializable and implement
//! `Default`, so objects can be created with struct update syntax:
//!
//! ```
//! use tnet_sentry::protocol::{Event, Level};
//!
//! let event = Event {
//!     message: Some("Hello World!".to_string()),
//!     level: Level::Info,
//!     ..Default::default()
//! };
//! assert!(event.exception.is_empty());
//! ```

mod envelope;
mod event;
mod span;

pub use self::envelope::{Envelope, EnvelopeError, EnvelopeItem};
pub use self::event::{
    ClientSdkInfo, Context, DeviceContext, Event, Exception, Frame, Level, Mechanism, OsContext,
    Stacktrace, Values,
};
pub use self::span::{Span, SpanId, TraceContext, TraceId, Transaction};

/// The maps used by the protocol.
pub type Map<K, V> = std::collections::BTreeMap<K, V>;

/// Arbitrary structured data attached to events and spans.
pub use serde_json::Value;

pub use uuid::Uuid;
