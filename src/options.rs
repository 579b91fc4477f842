use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::dsn::{Dsn, ParseDsnError};

/// Errors raised while turning configuration into a working client.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No DSN was configured.
    #[error("no DSN configured (set SENTRY_DSN)")]
    MissingDsn,
    /// The DSN could not be parsed.
    #[error("invalid DSN: {0}")]
    InvalidDsn(#[from] ParseDsnError),
    /// A sample rate is outside of `[0, 1]`.
    #[error("{key} must be between 0 and 1, got {value}")]
    InvalidSampleRate {
        /// The name of the offending setting.
        key: &'static str,
        /// The configured rate.
        value: f32,
    },
    /// A configuration value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The raw value.
        value: String,
    },
    /// The proxy URL is not usable.
    #[error("invalid proxy URL {0:?}")]
    InvalidProxy(String),
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
    /// The crate was built without an HTTP transport.
    #[error("no HTTP transport available (build with the `transport` feature)")]
    TransportUnavailable,
}

/// Settings for the HTTP transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpOptions {
    /// Proxy used for all requests to the collector.
    pub proxy: Option<String>,
    /// Total request timeout.
    pub timeout: Option<Duration>,
    /// Timeout for establishing the connection.
    pub connect_timeout: Option<Duration>,
    /// Whether TLS certificates are verified.
    pub ssl_verify: bool,
    /// Whether request bodies are gzip compressed.
    pub compression: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        HttpOptions {
            proxy: None,
            timeout: None,
            connect_timeout: None,
            ssl_verify: true,
            compression: false,
        }
    }
}

/// Configuration of a reporting client.
///
/// ```
/// use tnet_sentry::ReportingConfig;
///
/// let config = ReportingConfig {
///     release: Some("api@1.4.2".into()),
///     ..ReportingConfig::new("https://public@o1.ingest.example.com/42")
/// };
/// assert_eq!(config.traces_sample_rate, 0.1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfig {
    /// The DSN identifying the collector and project.
    pub dsn: String,
    /// Probability in `[0, 1]` that a transaction is transmitted.
    pub traces_sample_rate: f32,
    /// Probability in `[0, 1]` that a transaction is profiled.
    pub profiles_sample_rate: f32,
    /// The release to attach to events.
    pub release: Option<String>,
    /// The environment to attach to events.
    pub environment: Option<String>,
    /// HTTP transport settings.
    pub http: HttpOptions,
}

const DEFAULT_SAMPLE_RATE: f32 = 0.1;

impl Default for ReportingConfig {
    fn default() -> Self {
        ReportingConfig {
            dsn: String::new(),
            traces_sample_rate: DEFAULT_SAMPLE_RATE,
            profiles_sample_rate: DEFAULT_SAMPLE_RATE,
            release: None,
            environment: None,
            http: HttpOptions::default(),
        }
    }
}

impl ReportingConfig {
    /// Creates a configuration with the given DSN and default settings.
    pub fn new<S: Into<String>>(dsn: S) -> Self {
        ReportingConfig {
            dsn: dsn.into(),
            ..Default::default()
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let dsn = get("SENTRY_DSN").ok_or(ConfigError::MissingDsn)?;
        let mut config = ReportingConfig::new(dsn.trim());

        if let Some(rate) = get("SENTRY_TRACES_SAMPLE_RATE") {
            config.traces_sample_rate = parse_value("SENTRY_TRACES_SAMPLE_RATE", &rate)?;
        }
        if let Some(rate) = get("SENTRY_PROFILES_SAMPLE_RATE") {
            config.profiles_sample_rate = parse_value("SENTRY_PROFILES_SAMPLE_RATE", &rate)?;
        }
        config.release = get("SENTRY_RELEASE");
        config.environment = get("SENTRY_ENVIRONMENT");

        config.http.proxy = [
            "SENTRY_HTTP_PROXY",
            "HTTPS_PROXY",
            "https_proxy",
            "HTTP_PROXY",
            "http_proxy",
        ]
        .iter()
        .find_map(|key| get(*key));
        if let Some(timeout) = get("SENTRY_HTTP_TIMEOUT") {
            config.http.timeout = Some(parse_seconds("SENTRY_HTTP_TIMEOUT", &timeout)?);
        }
        if let Some(timeout) = get("SENTRY_HTTP_CONNECT_TIMEOUT") {
            config.http.connect_timeout =
                Some(parse_seconds("SENTRY_HTTP_CONNECT_TIMEOUT", &timeout)?);
        }
        if let Some(verify) = get("SENTRY_HTTP_SSL_VERIFY") {
            config.http.ssl_verify = parse_bool("SENTRY_HTTP_SSL_VERIFY", &verify)?;
        }
        if let Some(compression) = get("SENTRY_HTTP_COMPRESSION") {
            config.http.compression = parse_bool("SENTRY_HTTP_COMPRESSION", &compression)?;
        }

        Ok(config)
    }

    /// Checks the configuration and returns the parsed DSN.
    pub fn validate(&self) -> Result<Dsn, ConfigError> {
        if self.dsn.trim().is_empty() {
            return Err(ConfigError::MissingDsn);
        }
        let dsn = self.dsn.parse()?;
        check_rate("traces_sample_rate", self.traces_sample_rate)?;
        check_rate("profiles_sample_rate", self.profiles_sample_rate)?;
        if let Some(ref proxy) = self.http.proxy {
            url::Url::parse(proxy).map_err(|_| ConfigError::InvalidProxy(proxy.clone()))?;
        }
        Ok(dsn)
    }
}

fn check_rate(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate { key, value })
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_value(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_lookup() {
        let config =
            ReportingConfig::from_lookup(lookup(&[("SENTRY_DSN", "https://key@host/1")])).unwrap();
        assert_eq!(config.dsn, "https://key@host/1");
        assert_eq!(config.traces_sample_rate, 0.1);
        assert_eq!(config.profiles_sample_rate, 0.1);
        assert_eq!(config.http, HttpOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_lookup() {
        let config = ReportingConfig::from_lookup(lookup(&[
            ("SENTRY_DSN", "https://key@host/1"),
            ("SENTRY_TRACES_SAMPLE_RATE", "1.0"),
            ("SENTRY_PROFILES_SAMPLE_RATE", "0"),
            ("SENTRY_RELEASE", "api@2.0.0"),
            ("SENTRY_ENVIRONMENT", "staging"),
            ("https_proxy", "http://proxy.local:3128"),
            ("SENTRY_HTTP_TIMEOUT", "2.5"),
            ("SENTRY_HTTP_CONNECT_TIMEOUT", "1"),
            ("SENTRY_HTTP_SSL_VERIFY", "false"),
            ("SENTRY_HTTP_COMPRESSION", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.traces_sample_rate, 1.0);
        assert_eq!(config.profiles_sample_rate, 0.0);
        assert_eq!(config.release.as_deref(), Some("api@2.0.0"));
        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert_eq!(config.http.proxy.as_deref(), Some("http://proxy.local:3128"));
        assert_eq!(config.http.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.http.connect_timeout, Some(Duration::from_secs(1)));
        assert!(!config.http.ssl_verify);
        assert!(config.http.compression);
    }

    #[test]
    fn test_sentry_proxy_wins() {
        let config = ReportingConfig::from_lookup(lookup(&[
            ("SENTRY_DSN", "https://key@host/1"),
            ("HTTP_PROXY", "http://generic:8080"),
            ("SENTRY_HTTP_PROXY", "http://dedicated:8080"),
        ]))
        .unwrap();
        assert_eq!(config.http.proxy.as_deref(), Some("http://dedicated:8080"));
    }

    #[test]
    fn test_missing_dsn() {
        assert!(matches!(
            ReportingConfig::from_lookup(lookup(&[("SENTRY_DSN", "  ")])),
            Err(ConfigError::MissingDsn)
        ));
        assert!(matches!(
            ReportingConfig::default().validate(),
            Err(ConfigError::MissingDsn)
        ));
    }

    #[test]
    fn test_malformed_values() {
        let err = ReportingConfig::from_lookup(lookup(&[
            ("SENTRY_DSN", "https://key@host/1"),
            ("SENTRY_TRACES_SAMPLE_RATE", "often"),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for SENTRY_TRACES_SAMPLE_RATE: \"often\""
        );

        assert!(matches!(
            ReportingConfig::from_lookup(lookup(&[
                ("SENTRY_DSN", "https://key@host/1"),
                ("SENTRY_HTTP_TIMEOUT", "-3"),
            ])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = ReportingConfig {
            traces_sample_rate: 1.5,
            ..ReportingConfig::new("https://key@host/1")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSampleRate {
                key: "traces_sample_rate",
                ..
            })
        ));

        let mut config = ReportingConfig::new("https://key@host/1");
        config.http.proxy = Some("not a url".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProxy(_))
        ));

        assert!(matches!(
            ReportingConfig::new("host/1").validate(),
            Err(ConfigError::InvalidDsn(ParseDsnError::InvalidUrl))
        ));
    }
}
