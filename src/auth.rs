use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The envelope protocol version spoken by this client.
pub const PROTOCOL_VERSION: u16 = 7;

/// Represents an auth header parsing error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseAuthError {
    /// Raised if the auth header is not indicating sentry auth
    #[error("non sentry auth")]
    NonSentryAuth,
    /// Raised if the version value is invalid
    #[error("invalid value for version")]
    InvalidVersion,
    /// Raised if the version is missing entirely
    #[error("no valid version defined")]
    MissingVersion,
    /// Raised if the public key is missing entirely
    #[error("missing public key in auth header")]
    MissingPublicKey,
}

/// The `X-Sentry-Auth` header value sent with every envelope.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    key: String,
    version: u16,
    client: Option<String>,
}

impl Auth {
    pub(crate) fn new(key: String, version: u16, client: Option<String>) -> Auth {
        Auth {
            key,
            version,
            client,
        }
    }

    /// Returns the protocol version the client speaks
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Returns the public key
    pub fn public_key(&self) -> &str {
        &self.key
    }

    /// Returns the client agent, if one was set.
    pub fn client_agent(&self) -> Option<&str> {
        self.client.as_deref()
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Sentry sentry_key={}, sentry_version={}",
            self.key, self.version
        )?;
        if let Some(ref client) = self.client {
            write!(f, ", sentry_client={}", client)?;
        }
        Ok(())
    }
}

impl FromStr for Auth {
    type Err = ParseAuthError;

    fn from_str(s: &str) -> Result<Auth, ParseAuthError> {
        let mut rv = Auth::default();
        let mut base_iter = s.splitn(2, ' ');
        if !base_iter
            .next()
            .unwrap_or("")
            .eq_ignore_ascii_case("sentry")
        {
            return Err(ParseAuthError::NonSentryAuth);
        }
        let items = base_iter.next().unwrap_or("");
        for item in items.split(',') {
            let mut kviter = item.trim().splitn(2, '=');
            match (kviter.next(), kviter.next()) {
                (Some("sentry_client"), Some(client)) => {
                    rv.client = Some(client.into());
                }
                (Some("sentry_version"), Some(version)) => {
                    rv.version = version
                        .parse()
                        .map_err(|_| ParseAuthError::InvalidVersion)?;
                }
                (Some("sentry_key"), Some(key)) => {
                    rv.key = key.into();
                }
                _ => {}
            }
        }

        if rv.key.is_empty() {
            return Err(ParseAuthError::MissingPublicKey);
        }
        if rv.version == 0 {
            return Err(ParseAuthError::MissingVersion);
        }

        Ok(rv)
    }
}

#[test]
fn test_auth_parsing() {
    let auth: Auth = "Sentry sentry_client=tnet-sentry/0.1.0, \
                      sentry_version=7, \
                      sentry_key=public"
        .parse()
        .unwrap();
    assert_eq!(auth.client_agent(), Some("tnet-sentry/0.1.0"));
    assert_eq!(auth.version(), 7);
    assert_eq!(auth.public_key(), "public");

    assert_eq!(
        auth.to_string(),
        "Sentry sentry_key=public, sentry_version=7, sentry_client=tnet-sentry/0.1.0"
    );

    assert_eq!(
        "Basic abc".parse::<Auth>(),
        Err(ParseAuthError::NonSentryAuth)
    );
    assert_eq!(
        "Sentry sentry_version=7".parse::<Auth>(),
        Err(ParseAuthError::MissingPublicKey)
    );
}
