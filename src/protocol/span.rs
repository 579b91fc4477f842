use std::fmt;
use std::str;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::defaults;
use super::{ClientSdkInfo, Context, Map, Value};
use crate::utils::{ts_seconds_float, ts_seconds_float_opt};

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; $len]);

        impl Default for $name {
            fn default() -> Self {
                Self(rand::random())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                write!(fmt, "{}", hex::encode(self.0))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }

        impl str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                let mut buf = [0; $len];
                hex::decode_to_slice(input, &mut buf)?;
                Ok(Self(buf))
            }
        }

        impl TryFrom<String> for $name {
            type Error = hex::FromHexError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

hex_id!(
    /// Uniquely identifies a span within a trace.
    SpanId,
    8
);
hex_id!(
    /// Holds the identifier for a trace.
    TraceId,
    16
);

/// Holds information about a tracing event.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TraceContext {
    /// The ID of the trace event
    #[serde(default)]
    pub span_id: SpanId,
    /// Determines which trace the transaction belongs to.
    #[serde(default)]
    pub trace_id: TraceId,
    /// Determines the parent of this transaction if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Short code identifying the type of operation the transaction is measuring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Human readable detail description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Represents a tracing span.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Span {
    /// The ID of the span
    #[serde(default)]
    pub span_id: SpanId,
    /// Determines which trace the span belongs to.
    #[serde(default)]
    pub trace_id: TraceId,
    /// Determines the parent of this span, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Short code identifying the type of operation the span is measuring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Longer description of the span's operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The timestamp at the measuring of the span finished.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_seconds_float_opt"
    )]
    pub timestamp: Option<SystemTime>,
    /// The timestamp at the measuring of the span started.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub start_timestamp: SystemTime,
    /// Optional extra information to be sent with the span.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            span_id: Default::default(),
            trace_id: Default::default(),
            parent_span_id: Default::default(),
            op: Default::default(),
            description: Default::default(),
            timestamp: Default::default(),
            start_timestamp: SystemTime::now(),
            data: Default::default(),
        }
    }
}

impl Span {
    /// Creates a new span with the current timestamp and random id.
    pub fn new() -> Span {
        Default::default()
    }

    /// Finalizes the span.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }
}

/// Represents a tracing transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    /// The ID of the event
    #[serde(
        default = "defaults::default_id",
        serialize_with = "defaults::serialize_id"
    )]
    pub event_id: Uuid,
    /// The transaction name.
    #[serde(
        rename = "transaction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    /// A release identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// An optional environment identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Optional extra information to be sent with the transaction.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// SDK metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<ClientSdkInfo>,
    /// A platform identifier for this event.
    #[serde(default = "defaults::default_platform")]
    pub platform: String,
    /// The end time of the transaction.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "ts_seconds_float_opt"
    )]
    pub timestamp: Option<SystemTime>,
    /// The start time of the transaction.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub start_timestamp: SystemTime,
    /// The collection of finished spans part of this transaction.
    #[serde(default)]
    pub spans: Vec<Span>,
    /// Optional contexts.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Context>,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            event_id: defaults::default_id(),
            name: Default::default(),
            release: Default::default(),
            environment: Default::default(),
            extra: Default::default(),
            sdk: Default::default(),
            platform: defaults::default_platform(),
            timestamp: Default::default(),
            start_timestamp: SystemTime::now(),
            spans: Default::default(),
            contexts: Default::default(),
        }
    }
}

impl Transaction {
    /// Creates a new transaction with the current timestamp and random id.
    pub fn new() -> Transaction {
        Default::default()
    }

    /// Finalizes the transaction to be dispatched.
    pub fn finish(&mut self) {
        self.timestamp = Some(SystemTime::now());
    }

    /// Returns the trace context of this transaction, if set.
    pub fn trace_context(&self) -> Option<&TraceContext> {
        match self.contexts.get("trace") {
            Some(Context::Trace(trace)) => Some(trace),
            _ => None,
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Transaction(id: {}, ts: {})",
            self.event_id,
            crate::utils::to_rfc3339(&self.start_timestamp)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_hex() {
        let span_id = SpanId::default();
        let trace_id = TraceId::default();
        assert_eq!(span_id.to_string().len(), 16);
        assert_eq!(trace_id.to_string().len(), 32);
        assert_eq!(span_id.to_string().parse::<SpanId>().unwrap(), span_id);
        assert!("xyz".parse::<SpanId>().is_err());
    }

    #[test]
    fn test_transaction_serialization() {
        let mut transaction = Transaction {
            name: Some("checkout".into()),
            ..Default::default()
        };
        let trace = TraceContext {
            op: Some("http.server".into()),
            ..Default::default()
        };
        transaction.contexts.insert("trace".into(), trace.into());
        transaction.spans.push(Span {
            op: Some("db".into()),
            ..Default::default()
        });
        transaction.finish();

        let json = serde_json::to_value(&transaction).unwrap();
        assert_eq!(json["transaction"], "checkout");
        assert_eq!(json["contexts"]["trace"]["type"], "trace");
        assert_eq!(json["contexts"]["trace"]["op"], "http.server");

        let parsed: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.trace_context().and_then(|t| t.op.as_deref()),
            Some("http.server")
        );
        assert_eq!(parsed.spans.len(), 1);
        assert!(parsed.timestamp.is_some());
    }
}
