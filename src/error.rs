use std::error::Error;

use crate::backtrace::current_stacktrace;
use crate::protocol::{Event, Exception, Level, Mechanism};
use crate::utils::parse_type_from_debug;

/// Create an `Event` from a `std::error::Error`.
///
/// The chain of sources is resolved as well and stored oldest to newest. The
/// outermost exception carries the current stacktrace.
///
/// # Examples
///
/// ```
/// use thiserror::Error;
///
/// #[derive(Debug, Error)]
/// #[error("connection reset")]
/// struct ResetError;
///
/// #[derive(Debug, Error)]
/// #[error("charge failed")]
/// struct ChargeError(#[from] ResetError);
///
/// let event = tnet_sentry::event_from_error(&ChargeError(ResetError));
/// assert_eq!(event.level, tnet_sentry::protocol::Level::Error);
/// assert_eq!(event.message.as_deref(), Some("charge failed"));
/// assert_eq!(event.exception.len(), 2);
/// assert_eq!(&event.exception[0].ty, "ResetError");
/// assert_eq!(&event.exception[1].ty, "ChargeError");
/// ```
pub fn event_from_error<E: Error + ?Sized>(err: &E) -> Event {
    let mut exceptions = vec![exception_from_error(err)];

    let mut source = err.source();
    while let Some(err) = source {
        exceptions.push(exception_from_error(err));
        source = err.source();
    }

    exceptions.reverse();
    if let Some(outermost) = exceptions.last_mut() {
        outermost.stacktrace = current_stacktrace();
        outermost.mechanism = Some(Mechanism {
            ty: "generic".into(),
            handled: Some(true),
            ..Default::default()
        });
    }

    Event {
        message: Some(err.to_string()),
        exception: exceptions.into(),
        level: Level::Error,
        ..Default::default()
    }
}

fn exception_from_error<E: Error + ?Sized>(err: &E) -> Exception {
    Exception {
        ty: parse_type_from_debug(err),
        value: Some(err.to_string()),
        ..Default::default()
    }
}

/// Create a fatal `Event` for a panic with the given message.
pub fn event_from_panic(message: &str, location: Option<&str>) -> Event {
    let mut event = Event {
        message: Some(message.to_owned()),
        exception: vec![Exception {
            ty: "panic".into(),
            mechanism: Some(Mechanism {
                ty: "panic".into(),
                handled: Some(false),
                ..Default::default()
            }),
            value: Some(message.to_owned()),
            stacktrace: current_stacktrace(),
            ..Default::default()
        }]
        .into(),
        level: Level::Fatal,
        ..Default::default()
    };
    if let Some(location) = location {
        event.extra.insert("location".into(), location.into());
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_event() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "config missing");
        let event = event_from_error(&err);
        assert_eq!(event.exception.len(), 1);
        assert_eq!(event.exception_type(), Some("Custom"));
        assert_eq!(event.exception[0].value.as_deref(), Some("config missing"));
        assert_eq!(
            event.exception[0].mechanism.as_ref().and_then(|m| m.handled),
            Some(true)
        );
    }

    #[test]
    fn test_panic_event() {
        let event = event_from_panic("index out of bounds", Some("src/main.rs:3:5"));
        assert_eq!(event.level, Level::Fatal);
        assert_eq!(event.exception_type(), Some("panic"));
        let mechanism = event.exception[0].mechanism.as_ref().unwrap();
        assert_eq!(mechanism.ty, "panic");
        assert_eq!(mechanism.handled, Some(false));
        assert_eq!(event.extra["location"], "src/main.rs:3:5");
    }
}
