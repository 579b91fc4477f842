//! The connectivity test: send a synthetic event, and optionally a
//! transaction, to check that the collector can be reached.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use uuid::Uuid;

use crate::logger::DiagnosticSink;
use crate::options::{ConfigError, ReportingConfig};
use crate::performance::{PrematureFinishError, TransactionContext};
use crate::transport::TransmissionError;
use crate::Client;

/// The name of the synthetic transaction.
pub const TEST_TRANSACTION_NAME: &str = "Sentry Test Transaction";
/// The operation of the synthetic transaction.
pub const TEST_TRANSACTION_OP: &str = "sentry.test";
/// The operation of the child span.
pub const TEST_SPAN_OP: &str = "sentry.sent";

const CERTIFICATE_PHRASES: &[&str] = &[
    "SSL certificate problem",
    "certificate has expired",
    "certificate verify failed",
    "invalid peer certificate",
];

/// The error sent as the test event.
#[derive(Debug, Error)]
#[error("This is a test exception sent from the tnet-sentry SDK.")]
pub struct TestException;

/// Arguments of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestArgs {
    /// DSN to test; takes priority over the configured one.
    pub dsn: Option<String>,
    /// Also send a transaction with a child span.
    pub transaction: bool,
    /// Echo debug and info diagnostics as well.
    pub verbose: bool,
}

/// Where the test run writes its lines.
pub trait Console: Send + Sync {
    /// Writes an informational line.
    fn info(&self, line: &str);
    /// Writes a warning line.
    fn warn(&self, line: &str);
    /// Writes an error line.
    fn error(&self, line: &str);
}

/// Writes info lines to stdout and everything else to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl Console for StdConsole {
    fn info(&self, line: &str) {
        println!("{}", line);
    }

    fn warn(&self, line: &str) {
        eprintln!("{}", line);
    }

    fn error(&self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Why a test run failed.
#[derive(Debug, Error)]
pub enum TestFailure {
    /// Neither `--dsn` nor the configuration provided a DSN.
    #[error("could not discover DSN")]
    NoDsn,
    /// The test client could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The test event was not delivered.
    #[error("there was an error sending the event: {0}")]
    Event(#[source] TransmissionError),
    /// The test transaction was not delivered.
    #[error("there was an error sending the transaction: {0}")]
    Transaction(#[source] TransmissionError),
    /// The test transaction was finished with an open span.
    #[error(transparent)]
    PrematureFinish(#[from] PrematureFinishError),
}

impl TestFailure {
    /// The process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// The identifiers of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestReport {
    /// The id of the test event.
    pub event_id: Uuid,
    /// The id of the test transaction, if one was sent.
    pub transaction_id: Option<Uuid>,
}

/// Guidance printed after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugTip {
    /// A TLS certificate could not be verified.
    CertificateProblem,
    /// The client reported errors; they were printed above.
    InspectMessages,
    /// Nothing was reported; the DSN is the likely culprit.
    CheckDsn,
}

impl DebugTip {
    /// Picks the tip for the buffered error messages.
    pub fn for_messages<S: AsRef<str>>(messages: &[S]) -> DebugTip {
        let certificate_problem = messages.iter().any(|message| {
            CERTIFICATE_PHRASES
                .iter()
                .any(|phrase| message.as_ref().contains(phrase))
        });
        if certificate_problem {
            DebugTip::CertificateProblem
        } else if !messages.is_empty() {
            DebugTip::InspectMessages
        } else {
            DebugTip::CheckDsn
        }
    }

    fn print(self, console: &dyn Console) {
        match self {
            DebugTip::CertificateProblem => {
                console.warn(
                    "The problem might be related to an expired root certificate: your machine \
                     may not have an up-to-date TLS library or may still have the expired root \
                     in its certificate authority store.",
                );
                console.warn(
                    "For more information on how to resolve this for your environment see: \
                     https://community.letsencrypt.org/t/production-chain-changes/150739/4",
                );
            }
            DebugTip::InspectMessages => console.error(
                "Please check the error message from the SDK above for further hints about \
                 what went wrong.",
            ),
            DebugTip::CheckDsn => console.error(
                "Please check if your DSN is set properly in the environment as `SENTRY_DSN` \
                 or passed with `--dsn`.",
            ),
        }
    }
}

/// Collects the error diagnostics of the test client and echoes everything
/// to the console.
struct DiagnosticBuffer {
    console: Arc<dyn Console>,
    verbose: bool,
    errors: Mutex<Vec<String>>,
}

impl DiagnosticBuffer {
    fn clear(&self) {
        self.errors.lock().unwrap().clear();
    }

    fn tip(&self) -> DebugTip {
        let errors = self.errors.lock().unwrap();
        DebugTip::for_messages(errors.as_slice())
    }
}

struct BufferSink(Arc<DiagnosticBuffer>);

impl DiagnosticSink for BufferSink {
    fn log(&self, level: log::Level, message: &str) {
        let buffer = &self.0;
        let echo = buffer.verbose || level <= log::Level::Warn;
        if echo {
            buffer.console.info(&format!(
                "SDK({}): {}",
                level.as_str().to_ascii_lowercase(),
                message
            ));
        }
        if level == log::Level::Error {
            buffer.errors.lock().unwrap().push(message.to_owned());
        }
    }
}

/// Raises the global `log` verbosity for the duration of a run.
struct MaxLevelGuard(log::LevelFilter);

impl MaxLevelGuard {
    fn raise() -> MaxLevelGuard {
        let previous = log::max_level();
        log::set_max_level(log::LevelFilter::Trace);
        MaxLevelGuard(previous)
    }
}

impl Drop for MaxLevelGuard {
    fn drop(&mut self) {
        log::set_max_level(self.0);
    }
}

/// Runs the connectivity test.
///
/// `configured` looks up the application's configured client; failures of
/// the lookup are ignored. Every failure is reported on the console together
/// with a [`DebugTip`] before it is returned.
pub fn run<F>(
    args: &TestArgs,
    configured: F,
    console: Arc<dyn Console>,
) -> Result<TestReport, TestFailure>
where
    F: FnOnce() -> Result<Client, ConfigError>,
{
    let _verbosity = MaxLevelGuard::raise();

    let configured = match configured() {
        Ok(client) => Some(client),
        Err(err) => {
            log::debug!(
                target: crate::logger::LOG_TARGET,
                "No configured client available: {}",
                err
            );
            None
        }
    };

    // an explicit `--dsn`, even an empty one, never falls back
    let dsn = match args.dsn {
        Some(ref dsn) => Some(dsn.trim().to_owned()),
        None => configured.as_ref().map(|client| {
            console.info("DSN discovered from the environment!");
            client.dsn().to_string()
        }),
    };
    let dsn = match dsn.filter(|dsn| !dsn.is_empty()) {
        Some(dsn) => dsn,
        None => {
            console.error("Could not discover DSN!");
            DebugTip::CheckDsn.print(&*console);
            return Err(TestFailure::NoDsn);
        }
    };

    let mut options = ReportingConfig {
        traces_sample_rate: 1.0,
        ..ReportingConfig::new(dsn)
    };
    if let Some(client) = configured {
        let configured = client.options();
        options.release.clone_from(&configured.release);
        options.environment.clone_from(&configured.environment);
        options.http = configured.http.clone();
    }

    let client = match Client::new(options) {
        Ok(client) => client,
        Err(err) => {
            console.error(&err.to_string());
            return Err(err.into());
        }
    };

    let buffer = Arc::new(DiagnosticBuffer {
        console: console.clone(),
        verbose: args.verbose,
        errors: Mutex::new(Vec::new()),
    });
    client.attach_logger(BufferSink(buffer.clone()));

    console.info("Sending test event...");
    let event_id = match client.capture_error(&TestException) {
        Ok(id) => id,
        Err(err) => {
            console.error("There was an error sending the event.");
            buffer.tip().print(&*console);
            return Err(TestFailure::Event(err));
        }
    };
    console.info(&format!("Test event sent with ID: {}", event_id.as_simple()));

    let mut transaction_id = None;
    if args.transaction {
        buffer.clear();

        let mut ctx = TransactionContext::new(TEST_TRANSACTION_NAME, TEST_TRANSACTION_OP);
        ctx.set_sampled(true);
        let transaction = client.start_transaction(ctx);
        let span = transaction.start_child(TEST_SPAN_OP, "");

        console.info("Sending transaction...");

        span.finish();
        match client.finish_transaction(transaction)? {
            Ok(id) => {
                console.info(&format!("Transaction sent with ID: {}", id.as_simple()));
                transaction_id = Some(id);
            }
            Err(err) => {
                console.error("There was an error sending the transaction.");
                buffer.tip().print(&*console);
                return Err(TestFailure::Transaction(err));
            }
        }
    }

    Ok(TestReport {
        event_id,
        transaction_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingConsole {
        lines: Mutex<Vec<(&'static str, String)>>,
    }

    impl Console for RecordingConsole {
        fn info(&self, line: &str) {
            self.lines.lock().unwrap().push(("info", line.into()));
        }

        fn warn(&self, line: &str) {
            self.lines.lock().unwrap().push(("warn", line.into()));
        }

        fn error(&self, line: &str) {
            self.lines.lock().unwrap().push(("error", line.into()));
        }
    }

    #[test]
    fn test_debug_tip_priority() {
        let none: [&str; 0] = [];
        assert_eq!(DebugTip::for_messages(&none), DebugTip::CheckDsn);
        assert_eq!(
            DebugTip::for_messages(&["collector responded with HTTP 403"]),
            DebugTip::InspectMessages
        );
        assert_eq!(
            DebugTip::for_messages(&[
                "collector responded with HTTP 403",
                "error sending request: SSL certificate problem: certificate has expired",
            ]),
            DebugTip::CertificateProblem
        );
    }

    #[test]
    fn test_buffer_keeps_errors_and_echoes() {
        let console = Arc::new(RecordingConsole::default());
        let buffer = Arc::new(DiagnosticBuffer {
            console: console.clone(),
            verbose: false,
            errors: Mutex::new(Vec::new()),
        });
        let sink = BufferSink(buffer.clone());
        sink.log(log::Level::Debug, "[Client] Sending event");
        sink.log(log::Level::Warn, "slow response");
        sink.log(log::Level::Error, "[Client] Failed to send envelope: refused");

        assert_eq!(
            *buffer.errors.lock().unwrap(),
            vec!["[Client] Failed to send envelope: refused".to_string()]
        );
        let lines = console.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                ("info", "SDK(warn): slow response".to_string()),
                (
                    "info",
                    "SDK(error): [Client] Failed to send envelope: refused".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_no_dsn() {
        let console = Arc::new(RecordingConsole::default());
        let failure = run(
            &TestArgs::default(),
            || Err(ConfigError::MissingDsn),
            console.clone(),
        )
        .unwrap_err();
        assert!(matches!(failure, TestFailure::NoDsn));
        assert_eq!(failure.exit_code(), 1);

        let lines = console.lines.lock().unwrap();
        assert_eq!(lines[0], ("error", "Could not discover DSN!".to_string()));
        assert!(lines[1].1.contains("SENTRY_DSN"));
    }

    #[test]
    fn test_empty_dsn_flag_ignores_configured_client() {
        let console = Arc::new(RecordingConsole::default());
        let args = TestArgs {
            dsn: Some("  ".into()),
            ..Default::default()
        };
        let configured = || {
            Client::with_transport(
                ReportingConfig::new("https://public@sentry.invalid/1"),
                crate::test::TestTransport::new(),
            )
        };
        let failure = run(&args, configured, console.clone()).unwrap_err();
        assert!(matches!(failure, TestFailure::NoDsn));

        let lines = console.lines.lock().unwrap();
        assert_eq!(lines[0], ("error", "Could not discover DSN!".to_string()));
    }

    #[test]
    fn test_invalid_dsn_flag() {
        let console = Arc::new(RecordingConsole::default());
        let args = TestArgs {
            dsn: Some("not a dsn".into()),
            ..Default::default()
        };
        let failure = run(&args, || Err(ConfigError::MissingDsn), console).unwrap_err();
        assert!(matches!(
            failure,
            TestFailure::Config(ConfigError::InvalidDsn(_))
        ));
    }
}
