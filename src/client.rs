use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

use rand::random;

use crate::constants::{ARCH, PLATFORM, SDK_INFO};
use crate::dsn::Dsn;
use crate::error::event_from_error;
use crate::logger::{client_log, DiagnosticSink, LOG_TARGET};
use crate::options::{ConfigError, ReportingConfig};
use crate::performance::{PrematureFinishError, Transaction, TransactionContext};
use crate::protocol::{DeviceContext, Envelope, Event, Level, OsContext};
use crate::transport::{DeliveryResult, TransmissionError, Transport};

/// The reporting client.
///
/// The client owns its configuration and a [`Transport`]. Every capture builds
/// one envelope, sends it synchronously and hands back the [`DeliveryResult`].
///
/// ```
/// use tnet_sentry::test::TestTransport;
/// use tnet_sentry::{Client, Level, ReportingConfig};
///
/// let transport = TestTransport::new();
/// let config = ReportingConfig::new("https://public@sentry.invalid/1");
/// let client = Client::with_transport(config, transport.clone()).unwrap();
///
/// let id = client.capture_message("cache warmed", Level::Info).unwrap();
/// assert_eq!(transport.fetch_and_clear_events()[0].event_id, id);
/// ```
pub struct Client {
    options: ReportingConfig,
    dsn: Dsn,
    transport: Arc<dyn Transport>,
    sink: RwLock<Option<Arc<dyn DiagnosticSink>>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dsn", &self.dsn.to_string())
            .field("options", &self.options)
            .finish()
    }
}

impl Client {
    /// Creates a new client that sends over HTTP.
    ///
    /// Fails if the configuration is invalid or the crate was built without
    /// the `transport` feature.
    pub fn new(config: ReportingConfig) -> Result<Client, ConfigError> {
        let dsn = config.validate()?;
        #[cfg(feature = "transport")]
        {
            let transport = crate::transport::ReqwestHttpTransport::new(&dsn, &config.http)?;
            Ok(Client::from_parts(config, dsn, Arc::new(transport)))
        }
        #[cfg(not(feature = "transport"))]
        {
            let _ = dsn;
            Err(ConfigError::TransportUnavailable)
        }
    }

    /// Creates a new client that sends through the given transport.
    pub fn with_transport<T: Transport>(
        config: ReportingConfig,
        transport: T,
    ) -> Result<Client, ConfigError> {
        let dsn = config.validate()?;
        Ok(Client::from_parts(config, dsn, Arc::new(transport)))
    }

    fn from_parts(options: ReportingConfig, dsn: Dsn, transport: Arc<dyn Transport>) -> Client {
        log::debug!(
            target: LOG_TARGET,
            "[Client] Creating new client for project {} at {}",
            dsn.project_id(),
            dsn.host()
        );
        Client {
            options,
            dsn,
            transport,
            sink: RwLock::new(None),
        }
    }

    /// Returns the options of this client.
    pub fn options(&self) -> &ReportingConfig {
        &self.options
    }

    /// Returns the DSN that constructed this client.
    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    /// Routes every diagnostic message of this client to `sink` as well.
    ///
    /// Replaces a previously attached sink.
    pub fn attach_logger<S: DiagnosticSink + 'static>(&self, sink: S) {
        *self.sink.write().unwrap() = Some(Arc::new(sink));
    }

    /// Removes the attached diagnostic sink.
    pub fn detach_logger(&self) {
        *self.sink.write().unwrap() = None;
    }

    pub(crate) fn emit_diagnostic(&self, level: log::Level, message: &str) {
        log::log!(target: LOG_TARGET, level, "{}", message);
        let sink = self.sink.read().unwrap().clone();
        if let Some(sink) = sink {
            sink.log(level, message);
        }
    }

    /// Captures a `std::error::Error` together with its source chain and the
    /// current stack trace.
    pub fn capture_error<E: Error + ?Sized>(&self, err: &E) -> DeliveryResult {
        self.capture_event(event_from_error(err))
    }

    /// Captures an arbitrary message.
    pub fn capture_message(&self, msg: &str, level: Level) -> DeliveryResult {
        self.capture_event(Event {
            message: Some(msg.to_owned()),
            level,
            ..Default::default()
        })
    }

    /// Captures an event after applying the client defaults to it.
    pub fn capture_event(&self, event: Event) -> DeliveryResult {
        let event = self.prepare_event(event);
        client_log!(
            self,
            log::Level::Debug,
            "[Client] Sending event {}",
            event.event_id
        );
        self.send_envelope(event.into())
    }

    /// Prepares an event for transmission.
    pub fn prepare_event(&self, mut event: Event) -> Event {
        if event.event_id.is_nil() {
            event.event_id = uuid::Uuid::new_v4();
        }
        if event.sdk.is_none() {
            event.sdk = Some(SDK_INFO.clone());
        }
        if event.release.is_none() {
            event.release.clone_from(&self.options.release);
        }
        if event.environment.is_none() {
            event.environment.clone_from(&self.options.environment);
        }
        event.contexts.entry("os".into()).or_insert_with(|| {
            OsContext {
                name: Some(PLATFORM.into()),
            }
            .into()
        });
        event.contexts.entry("device".into()).or_insert_with(|| {
            DeviceContext {
                arch: Some(ARCH.into()),
            }
            .into()
        });
        event
    }

    /// Starts a new transaction.
    ///
    /// Unless the context forces a decision, the transaction is sampled with
    /// the configured `traces_sample_rate`.
    pub fn start_transaction(&self, ctx: TransactionContext) -> Transaction {
        let sampled = ctx
            .sampled()
            .unwrap_or_else(|| self.sample_should_send(self.options.traces_sample_rate));
        client_log!(
            self,
            log::Level::Debug,
            "[Client] Starting transaction {:?} (sampled: {})",
            ctx.name(),
            sampled
        );
        Transaction::new(ctx, sampled)
    }

    /// Finishes a transaction and sends it with all of its finished spans.
    ///
    /// Nothing is sent if a child span is still open. An unsampled transaction
    /// yields [`TransmissionError::Unsampled`].
    pub fn finish_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<DeliveryResult, PrematureFinishError> {
        let mut payload = match transaction.close() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                client_log!(
                    self,
                    log::Level::Info,
                    "[Client] Transaction was not sampled, nothing sent"
                );
                return Ok(Err(TransmissionError::Unsampled));
            }
            Err(err) => {
                client_log!(self, log::Level::Error, "[Client] {}", err);
                return Err(err);
            }
        };
        payload.release.clone_from(&self.options.release);
        payload.environment.clone_from(&self.options.environment);
        payload.sdk = Some(SDK_INFO.clone());
        client_log!(
            self,
            log::Level::Debug,
            "[Client] Sending transaction {} with {} span(s)",
            payload.event_id,
            payload.spans.len()
        );
        Ok(self.send_envelope(payload.into()))
    }

    fn send_envelope(&self, envelope: Envelope) -> DeliveryResult {
        match self.transport.send_envelope(&envelope) {
            Ok(id) => {
                client_log!(self, log::Level::Info, "[Client] Envelope {} accepted", id);
                Ok(id)
            }
            Err(err) => {
                client_log!(
                    self,
                    log::Level::Error,
                    "[Client] Failed to send envelope: {}",
                    err
                );
                Err(err)
            }
        }
    }

    fn sample_should_send(&self, rate: f32) -> bool {
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            random::<f32>() < rate
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test::TestTransport;

    fn client() -> (Client, Arc<TestTransport>) {
        let transport = TestTransport::new();
        let config = ReportingConfig {
            release: Some("billing@1.0.0".into()),
            environment: Some("test".into()),
            ..ReportingConfig::new("https://public@sentry.invalid/1")
        };
        let client = Client::with_transport(config, transport.clone()).unwrap();
        (client, transport)
    }

    #[test]
    fn test_capture_error_applies_defaults() {
        let (client, transport) = client();
        let err = "x".parse::<u32>().unwrap_err();
        let id = client.capture_error(&err).unwrap();

        let events = transport.fetch_and_clear_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_id, id);
        assert_eq!(event.exception_type(), Some("ParseIntError"));
        assert_eq!(event.release.as_deref(), Some("billing@1.0.0"));
        assert_eq!(event.environment.as_deref(), Some("test"));
        assert_eq!(event.sdk.as_ref().map(|s| s.name.as_str()), Some("tnet-sentry"));
        assert!(event.contexts.contains_key("os"));
    }

    #[test]
    fn test_failure_is_logged() {
        let (client, transport) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        client.attach_logger(move |level: log::Level, message: &str| {
            sink_seen.lock().unwrap().push((level, message.to_owned()));
        });

        transport.fail_with("connection refused");
        let err = client.capture_message("hello", Level::Info).unwrap_err();
        assert_eq!(err.to_string(), "connection refused");

        let seen = seen.lock().unwrap();
        let errors: Vec<_> = seen
            .iter()
            .filter(|(level, _)| *level == log::Level::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("connection refused"));
    }

    #[test]
    fn test_transaction_flow() {
        let (client, transport) = client();
        let mut ctx = TransactionContext::new("nightly import", "task");
        ctx.set_sampled(true);
        let tx = client.start_transaction(ctx);
        let span = tx.start_child("db.query", "load rows");

        let err = client.finish_transaction(tx).unwrap_err();
        assert_eq!(err.open_spans(), 1);
        assert!(transport.fetch_and_clear_envelopes().is_empty());

        span.finish();
        let id = client
            .finish_transaction(err.into_transaction())
            .unwrap()
            .unwrap();

        let envelopes = transport.fetch_and_clear_envelopes();
        let sent = envelopes[0].transaction().unwrap();
        assert_eq!(sent.event_id, id);
        assert_eq!(sent.spans.len(), 1);
        assert_eq!(sent.release.as_deref(), Some("billing@1.0.0"));
    }

    #[test]
    fn test_unsampled_transaction() {
        let transport = TestTransport::new();
        let config = ReportingConfig {
            traces_sample_rate: 0.0,
            ..ReportingConfig::new("https://public@sentry.invalid/1")
        };
        let client = Client::with_transport(config, transport.clone()).unwrap();
        let tx = client.start_transaction(TransactionContext::new("idle", "task"));
        assert!(!tx.is_sampled());
        assert!(matches!(
            client.finish_transaction(tx),
            Ok(Err(TransmissionError::Unsampled))
        ));
        assert!(transport.fetch_and_clear_envelopes().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let transport = TestTransport::new();
        assert!(matches!(
            Client::with_transport(ReportingConfig::new("https://sentry.invalid/1"), transport),
            Err(ConfigError::InvalidDsn(_))
        ));
    }
}
