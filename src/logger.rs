//! Client diagnostics.
//!
//! Everything the client has to say about its own operation goes to the
//! `log` facade under the `tnet_sentry` target. A [`DiagnosticSink`] attached
//! with [`Client::attach_logger`](crate::Client::attach_logger) receives the
//! same messages.

/// The `log` target used for client diagnostics.
pub const LOG_TARGET: &str = "tnet_sentry";

/// Receives the diagnostic messages of a client.
pub trait DiagnosticSink: Send + Sync {
    /// Called once per diagnostic message.
    fn log(&self, level: log::Level, message: &str);
}

impl<F> DiagnosticSink for F
where
    F: Fn(log::Level, &str) + Send + Sync,
{
    fn log(&self, level: log::Level, message: &str) {
        self(level, message)
    }
}

/// Emits a diagnostic message through a client.
macro_rules! client_log {
    ($client:expr, $level:expr, $($arg:tt)+) => {
        $client.emit_diagnostic($level, &format!($($arg)+))
    };
}

pub(crate) use client_log;

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |level: log::Level, message: &str| {
            seen.lock().unwrap().push(format!("{}: {}", level, message));
        };
        sink.log(log::Level::Warn, "slow collector");
        assert_eq!(*seen.lock().unwrap(), vec!["WARN: slow collector"]);
    }
}
