use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use super::{Map, TraceContext, Value};
use crate::utils::ts_seconds_float;

/// A wrapper type for collections with attached meta data.
///
/// Serialized as an object with a single `values` array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Values<T> {
    /// The values of the collection.
    pub values: Vec<T>,
}

impl<T> Values<T> {
    /// Creates an empty values struct.
    pub fn new() -> Values<T> {
        Values { values: Vec::new() }
    }

    /// Checks whether this struct is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl<T> Default for Values<T> {
    fn default() -> Self {
        Values::new()
    }
}

impl<T> From<Vec<T>> for Values<T> {
    fn from(values: Vec<T>) -> Self {
        Values { values }
    }
}

impl<T> std::ops::Deref for Values<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.values
    }
}

impl<T> std::ops::DerefMut for Values<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.values
    }
}

/// Represents a frame.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Frame {
    /// The name of the function if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// The potentially mangled name of the symbol as it appears in the executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// The name of the module (crate) the frame is contained in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// The filename (basename only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// If known the absolute path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    /// The line number if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    /// The column number if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u64>,
    /// In-app indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
    /// If known the location of the instruction, as a hex string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_addr: Option<String>,
}

/// Represents a stacktrace.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Stacktrace {
    /// The list of frames in the stacktrace, oldest call first.
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    /// Optionally creates a stacktrace from a list of stack frames.
    ///
    /// The frames are expected innermost first and are stored outermost first.
    pub fn from_frames_reversed(mut frames: Vec<Frame>) -> Option<Stacktrace> {
        if frames.is_empty() {
            None
        } else {
            frames.reverse();
            Some(Stacktrace { frames })
        }
    }
}

/// How an exception was caught.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Mechanism {
    /// The mechanism type identifier.
    #[serde(rename = "type")]
    pub ty: String,
    /// Human readable detail description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// An optional flag indicating whether this exception was handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
    /// An optional flag indicating a synthetic exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<bool>,
    /// Additional attributes depending on the mechanism type.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

/// Represents a single exception.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Exception {
    /// The type of the exception.
    #[serde(rename = "type")]
    pub ty: String,
    /// The optional value of the exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// An optional module for this exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Optionally the stacktrace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    /// The mechanism of the exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<Mechanism>,
}

/// An error used when parsing `Level`.
#[derive(Debug, Error)]
#[error("invalid level")]
pub struct ParseLevelError;

/// Represents the level of severity of an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    /// Indicates very spammy debug information.
    Debug,
    /// Informational messages.
    Info,
    /// A warning.
    Warning,
    /// An error.
    #[default]
    Error,
    /// Similar to error but indicates a critical event that usually causes a shutdown.
    Fatal,
}

impl Level {
    /// A quick way to check if the level is `error`.
    pub fn is_error(&self) -> bool {
        *self == Level::Error
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(string: &str) -> Result<Level, Self::Err> {
        Ok(match string {
            "debug" => Level::Debug,
            "info" | "log" => Level::Info,
            "warning" => Level::Warning,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => return Err(ParseLevelError),
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Level::Debug => write!(f, "debug"),
            Level::Info => write!(f, "info"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
            Level::Fatal => write!(f, "fatal"),
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Information about the SDK that produced an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClientSdkInfo {
    /// The name of the SDK.
    pub name: String,
    /// The version of the SDK.
    pub version: String,
}

/// Operating system information.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OsContext {
    /// The name of the operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Device information.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceContext {
    /// The CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

/// Typed event contexts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Context {
    /// Operating system information.
    Os(Box<OsContext>),
    /// Device information.
    Device(Box<DeviceContext>),
    /// Tracing data.
    Trace(Box<TraceContext>),
}

macro_rules! into_context {
    ($kind:ident, $ty:ty) => {
        impl From<$ty> for Context {
            fn from(data: $ty) -> Self {
                Context::$kind(Box::new(data))
            }
        }
    };
}

into_context!(Os, OsContext);
into_context!(Device, DeviceContext);
into_context!(Trace, TraceContext);

pub(super) mod defaults {
    use super::*;

    pub fn default_id() -> Uuid {
        Uuid::new_v4()
    }

    pub fn serialize_id<S: Serializer>(uuid: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_some(&uuid.as_simple().to_string())
    }

    pub fn default_platform() -> String {
        "native".into()
    }
}

/// Represents a captured error or message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    /// The ID of the event
    #[serde(
        default = "defaults::default_id",
        serialize_with = "defaults::serialize_id"
    )]
    pub event_id: Uuid,
    /// The level of the event (defaults to error)
    #[serde(default, skip_serializing_if = "Level::is_error")]
    pub level: Level,
    /// The human readable message of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A release identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// An optional environment identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// The server name reporting the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// A platform identifier for this event.
    #[serde(default = "defaults::default_platform")]
    pub platform: String,
    /// One or multiple chained (nested) exceptions, oldest first.
    #[serde(default, skip_serializing_if = "Values::is_empty")]
    pub exception: Values<Exception>,
    /// Optional tags to be attached to the event.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, String>,
    /// Optional extra information to be sent with the event.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Optional contexts.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub contexts: Map<String, Context>,
    /// SDK metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk: Option<ClientSdkInfo>,
    /// The timestamp of when the event was created.
    #[serde(default = "SystemTime::now", with = "ts_seconds_float")]
    pub timestamp: SystemTime,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            event_id: defaults::default_id(),
            level: Level::Error,
            message: None,
            release: None,
            environment: None,
            server_name: None,
            platform: defaults::default_platform(),
            exception: Default::default(),
            tags: Default::default(),
            extra: Default::default(),
            contexts: Default::default(),
            sdk: None,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event {
    /// Creates a new event with the current timestamp and random id.
    pub fn new() -> Event {
        Default::default()
    }

    /// The type of the outermost exception, if any.
    pub fn exception_type(&self) -> Option<&str> {
        self.exception.last().map(|exc| exc.ty.as_str())
    }

    /// The frames of the outermost exception's stacktrace.
    pub fn stack_frames(&self) -> &[Frame] {
        self.exception
            .last()
            .and_then(|exc| exc.stacktrace.as_ref())
            .map(|st| &st.frames[..])
            .unwrap_or(&[])
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Event(id: {}, ts: {})",
            self.event_id,
            crate::utils::to_rfc3339(&self.timestamp)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_defaults_roundtrip() {
        let event = Event {
            message: Some("boom".into()),
            exception: vec![Exception {
                ty: "IoError".into(),
                value: Some("boom".into()),
                stacktrace: Stacktrace::from_frames_reversed(vec![
                    Frame {
                        function: Some("inner".into()),
                        ..Default::default()
                    },
                    Frame {
                        function: Some("outer".into()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }]
            .into(),
            ..Default::default()
        };

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("level").is_none());
        assert_eq!(json["exception"]["values"][0]["type"], "IoError");
        assert_eq!(
            json["event_id"].as_str().unwrap(),
            event.event_id.as_simple().to_string()
        );

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.exception_type(), Some("IoError"));
        assert_eq!(parsed.stack_frames().len(), 2);
        assert_eq!(parsed.stack_frames()[0].function.as_deref(), Some("outer"));
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(serde_json::to_string(&Level::Fatal).unwrap(), "\"fatal\"");
        assert_eq!(
            serde_json::from_str::<Level>("\"warning\"").unwrap(),
            Level::Warning
        );
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_values_shape() {
        let values: Values<Level> = vec![Level::Error].into();
        assert_eq!(
            serde_json::to_string(&values).unwrap(),
            r#"{"values":["error"]}"#
        );
        assert!(serde_json::from_str::<Values<Level>>(r#"["error"]"#).is_err());
    }

    #[test]
    fn test_context_is_tagged() {
        let ctx: Context = OsContext {
            name: Some("linux".into()),
        }
        .into();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["type"], "os");
        assert_eq!(json["name"], "linux");
    }
}
