use std::ops::Deref;
use std::sync::Arc;

use crate::hook::{self, Fallback, HookHandle};
use crate::logger::LOG_TARGET;
use crate::options::{ConfigError, ReportingConfig};
use crate::Client;

/// Helper struct that is returned from `init`.
///
/// Dereferences to the [`Client`]. When dropped the capture hook is
/// deactivated again.
#[must_use = "when the init guard is dropped the capture hook is deactivated and panics \
              are no longer reported.  If you do want to ignore this use mem::forget on it."]
#[derive(Debug)]
pub struct InitGuard(HookHandle);

impl InitGuard {
    /// The handle of the installed capture hook.
    pub fn hook(&self) -> &HookHandle {
        &self.0
    }
}

impl Deref for InitGuard {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.0.client()
    }
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        log::debug!(target: LOG_TARGET, "dropping init guard -> deactivating capture hook");
        self.0.uninstall();
    }
}

/// Creates a client for the given configuration and installs the capture
/// hook for it.
///
/// Panics are reported and then forwarded to the panic hook that was active
/// before.
///
/// # Examples
///
/// ```no_run
/// let _sentry = tnet_sentry::init(tnet_sentry::ReportingConfig {
///     release: Some("billing@1.4.2".into()),
///     ..tnet_sentry::ReportingConfig::new("https://key@sentry.io/1234")
/// })
/// .unwrap();
/// ```
pub fn init(config: ReportingConfig) -> Result<InitGuard, ConfigError> {
    let client = Arc::new(Client::new(config)?);
    log::debug!(
        target: LOG_TARGET,
        "enabled sentry client for DSN {}",
        client.dsn()
    );
    Ok(InitGuard(hook::install(client, Fallback::Previous)))
}
