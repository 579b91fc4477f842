use std::error::Error;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::Envelope;

/// The outcome of one delivery: the collector-assigned event id, or the reason it failed.
pub type DeliveryResult = Result<Uuid, TransmissionError>;

/// Why an envelope did not reach the collector.
#[derive(Debug, Error)]
pub enum TransmissionError {
    /// The envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] std::io::Error),
    /// The request failed before a response was received.
    #[error("{0}")]
    Network(String),
    /// The collector answered with a non-success status.
    #[error("collector responded with HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },
    /// The transaction was not selected by sampling and was not sent.
    #[error("transaction was not sampled")]
    Unsampled,
}

/// The trait for transports.
///
/// A transport delivers one envelope synchronously and reports the outcome.
pub trait Transport: Send + Sync + 'static {
    /// Sends an [`Envelope`] to the collector.
    fn send_envelope(&self, envelope: &Envelope) -> DeliveryResult;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send_envelope(&self, envelope: &Envelope) -> DeliveryResult {
        (**self).send_envelope(envelope)
    }
}

/// Renders an error and all of its sources as `outer: inner: root`.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut rv = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        let text = err.to_string();
        // some errors repeat their source in their own message
        if !rv.ends_with(&text) {
            rv.push_str(": ");
            rv.push_str(&text);
        }
        source = err.source();
    }
    rv
}

/// Extracts the event id from a collector response body.
#[cfg_attr(not(feature = "transport"), allow(dead_code))]
pub(crate) fn parse_response_id(body: &str) -> Option<Uuid> {
    #[derive(serde::Deserialize)]
    struct Response {
        id: Uuid,
    }
    serde_json::from_str::<Response>(body).ok().map(|r| r.id)
}

#[cfg(feature = "transport")]
mod reqwest_impl {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use reqwest::blocking::Client as ReqwestClient;
    use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use reqwest::Proxy;

    use super::*;
    use crate::constants::USER_AGENT;
    use crate::options::{ConfigError, HttpOptions};
    use crate::Dsn;

    /// A [`Transport`] that posts envelopes with a blocking [`reqwest`] client.
    ///
    /// [`reqwest`]: https://crates.io/crates/reqwest
    pub struct ReqwestHttpTransport {
        client: ReqwestClient,
        url: String,
        auth: String,
        compression: bool,
    }

    impl ReqwestHttpTransport {
        /// Creates a new transport for the given DSN.
        pub fn new(dsn: &Dsn, options: &HttpOptions) -> Result<Self, ConfigError> {
            let mut builder = ReqwestClient::builder().user_agent(USER_AGENT.as_str());
            if let Some(ref url) = options.proxy {
                let proxy = Proxy::all(url).map_err(|_| ConfigError::InvalidProxy(url.clone()))?;
                builder = builder.proxy(proxy);
            }
            if let Some(timeout) = options.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(timeout) = options.connect_timeout {
                builder = builder.connect_timeout(timeout);
            }
            #[cfg(any(feature = "native-tls", feature = "rustls"))]
            if !options.ssl_verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
            let client = builder
                .build()
                .map_err(|err| ConfigError::HttpClient(error_chain(&err)))?;
            Ok(Self::with_client(dsn, options, client))
        }

        /// Creates a new transport that uses the specified client.
        pub fn with_client(dsn: &Dsn, options: &HttpOptions, client: ReqwestClient) -> Self {
            ReqwestHttpTransport {
                client,
                url: dsn.envelope_api_url().to_string(),
                auth: dsn.to_auth(Some(USER_AGENT.as_str())).to_string(),
                compression: options.compression,
            }
        }

        fn encode(&self, envelope: &Envelope) -> std::io::Result<Vec<u8>> {
            if !self.compression {
                return envelope.to_vec();
            }
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            envelope.to_writer(&mut encoder)?;
            encoder.flush()?;
            encoder.finish()
        }
    }

    impl Transport for ReqwestHttpTransport {
        fn send_envelope(&self, envelope: &Envelope) -> DeliveryResult {
            let body = self.encode(envelope)?;
            let mut request = self
                .client
                .post(&self.url)
                .header("X-Sentry-Auth", &self.auth)
                .header(CONTENT_TYPE, "application/x-sentry-envelope");
            if self.compression {
                request = request.header(CONTENT_ENCODING, "gzip");
            }

            let response = request
                .body(body)
                .send()
                .map_err(|err| TransmissionError::Network(error_chain(&err)))?;
            let status = response.status();
            let text = response
                .text()
                .map_err(|err| TransmissionError::Network(error_chain(&err)))?;

            if !status.is_success() {
                return Err(TransmissionError::HttpStatus {
                    status: status.as_u16(),
                    body: text,
                });
            }

            parse_response_id(&text)
                .or_else(|| envelope.uuid().copied())
                .ok_or_else(|| {
                    TransmissionError::Network(format!("unexpected collector response: {}", text))
                })
        }
    }
}

#[cfg(feature = "transport")]
pub use self::reqwest_impl::ReqwestHttpTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("request failed")]
    struct Outer(#[source] Middle);

    #[derive(Debug, Error)]
    #[error("tls handshake")]
    struct Middle(#[source] std::io::Error);

    #[test]
    fn test_error_chain() {
        let err = Outer(Middle(std::io::Error::new(
            std::io::ErrorKind::Other,
            "SSL certificate problem: unable to get local issuer certificate",
        )));
        assert_eq!(
            error_chain(&err),
            "request failed: tls handshake: SSL certificate problem: unable to get local issuer certificate"
        );
    }

    #[test]
    fn test_parse_response_id() {
        assert_eq!(
            parse_response_id(r#"{"id":"fc6d8c0c43fc4630ad850ee518f1b9d0"}"#),
            Some("fc6d8c0c-43fc-4630-ad85-0ee518f1b9d0".parse().unwrap())
        );
        assert_eq!(parse_response_id("{}"), None);
        assert_eq!(parse_response_id("ok"), None);
    }
}
