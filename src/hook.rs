//! The process-wide capture hook.
//!
//! [`install`] registers a panic hook that reports panics through a
//! [`Client`] and then runs a [`Fallback`]. Every install puts the std panic
//! hook back in place and swaps the state it dispatches to. A hook registered
//! by someone else in the meantime becomes the previous hook.
//!
//! The returned [`HookHandle`] also serves request handlers: it reports an
//! error and renders the generic JSON 500 response.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tnet_sentry::hook::{self, Fallback};
//! use tnet_sentry::{Client, ReportingConfig};
//!
//! let client = Client::new(ReportingConfig::from_env().unwrap()).unwrap();
//! let handle = hook::install(Arc::new(client), Fallback::default());
//!
//! let err = std::io::Error::new(std::io::ErrorKind::Other, "upstream timed out");
//! let response = handle.handle_error(&err);
//! assert_eq!(response.status().as_u16(), 500);
//! ```

use std::error::Error;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use once_cell::sync::Lazy;

use crate::error::event_from_panic;
use crate::logger::LOG_TARGET;
use crate::transport::DeliveryResult;
use crate::Client;

/// An error that reached the top of the program.
#[derive(Debug)]
pub enum UncaughtError<'a> {
    /// A panic, with its message and source location.
    Panic {
        /// The panic message.
        message: &'a str,
        /// `file:line:column` of the panic, if known.
        location: Option<String>,
    },
    /// An error surfaced to a request handler.
    Error(&'a (dyn Error + 'static)),
}

impl fmt::Display for UncaughtError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncaughtError::Panic { message, .. } => f.write_str(message),
            UncaughtError::Error(err) => fmt::Display::fmt(err, f),
        }
    }
}

type PanicFn = dyn Fn(&PanicHookInfo<'_>) + Send + Sync;
type Predicate = dyn Fn(&UncaughtError<'_>) -> bool + Send + Sync;

/// What happens with a panic after it was reported.
#[derive(Default)]
pub enum Fallback {
    /// Forward to the panic hook that was active before the first install.
    #[default]
    Previous,
    /// Run a custom handler.
    Custom(Box<PanicFn>),
    /// Do nothing else.
    Silent,
}

impl Fallback {
    /// Creates a custom fallback.
    pub fn custom<F>(f: F) -> Fallback
    where
        F: Fn(&PanicHookInfo<'_>) + Send + Sync + 'static,
    {
        Fallback::Custom(Box::new(f))
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Previous => f.write_str("Previous"),
            Fallback::Custom(_) => f.write_str("Custom(..)"),
            Fallback::Silent => f.write_str("Silent"),
        }
    }
}

struct HookState {
    client: Arc<Client>,
    fallback: Fallback,
    should_report: Box<Predicate>,
}

impl HookState {
    fn report(&self, uncaught: &UncaughtError<'_>) -> Option<DeliveryResult> {
        if !(self.should_report)(uncaught) {
            log::debug!(target: LOG_TARGET, "[Hook] Not reporting {}", uncaught);
            return None;
        }
        Some(match *uncaught {
            UncaughtError::Panic { message, ref location } => self
                .client
                .capture_event(event_from_panic(message, location.as_deref())),
            UncaughtError::Error(err) => self.client.capture_error(err),
        })
    }
}

static REGISTER: Mutex<()> = Mutex::new(());
static PREVIOUS: RwLock<Option<Arc<PanicFn>>> = RwLock::new(None);
static ACTIVE: Lazy<RwLock<Option<(u64, Arc<HookState>)>>> = Lazy::new(|| RwLock::new(None));
static GENERATION: AtomicU64 = AtomicU64::new(0);
/// Address of the std hook registered last by [`install`].
static REGISTERED: AtomicUsize = AtomicUsize::new(0);

fn hook_addr(hook: &PanicFn) -> usize {
    hook as *const _ as *const () as usize
}

/// Puts `panic_handler` in place as the std panic hook.
///
/// Whatever hook is currently registered becomes the previous hook, unless
/// it is one of ours.
fn register_std_hook(generation: u64) {
    let _guard = REGISTER.lock().unwrap();
    let current = panic::take_hook();
    if hook_addr(&*current) != REGISTERED.load(Ordering::SeqCst) {
        log::debug!(target: LOG_TARGET, "[Hook] Keeping the current panic hook as fallback");
        *PREVIOUS.write().unwrap() = Some(Arc::from(current));
    }

    // the captured generation makes every registration a distinct allocation
    let hook: Box<PanicFn> =
        Box::new(move |info: &PanicHookInfo<'_>| panic_handler(generation, info));
    REGISTERED.store(hook_addr(&*hook), Ordering::SeqCst);
    panic::set_hook(hook);
}

/// Installs the capture hook, reporting every panic.
pub fn install(client: Arc<Client>, fallback: Fallback) -> HookHandle {
    install_with_filter(client, fallback, |_| true)
}

/// Installs the capture hook, reporting only what `should_report` accepts.
///
/// The latest install wins: earlier handles stop receiving panics.
pub fn install_with_filter<P>(
    client: Arc<Client>,
    fallback: Fallback,
    should_report: P,
) -> HookHandle
where
    P: Fn(&UncaughtError<'_>) -> bool + Send + Sync + 'static,
{
    let state = Arc::new(HookState {
        client,
        fallback,
        should_report: Box::new(should_report),
    });
    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    register_std_hook(generation);
    *ACTIVE.write().unwrap() = Some((generation, state.clone()));
    log::debug!(target: LOG_TARGET, "[Hook] Activated capture hook #{}", generation);

    HookHandle { generation, state }
}

fn forward_to_previous(info: &PanicHookInfo<'_>) {
    let previous = PREVIOUS.read().ok().and_then(|previous| previous.clone());
    if let Some(previous) = previous {
        previous(info);
    }
}

fn panic_handler(registered: u64, info: &PanicHookInfo<'_>) {
    log::trace!(target: LOG_TARGET, "[Hook] Panic detected by hook #{}", registered);
    let state = ACTIVE
        .read()
        .ok()
        .and_then(|active| active.as_ref().map(|(_, state)| state.clone()));
    match state {
        Some(state) => {
            let uncaught = UncaughtError::Panic {
                message: message_from_panic_info(info),
                location: info.location().map(|l| l.to_string()),
            };
            if let Some(Err(err)) = state.report(&uncaught) {
                log::debug!(target: LOG_TARGET, "[Hook] Panic was not delivered: {}", err);
            }
            match state.fallback {
                Fallback::Previous => forward_to_previous(info),
                Fallback::Custom(ref f) => f(info),
                Fallback::Silent => {}
            }
        }
        None => forward_to_previous(info),
    }
}

/// Extract the message of a panic.
pub fn message_from_panic_info<'a>(info: &'a PanicHookInfo<'_>) -> &'a str {
    match info.payload().downcast_ref::<&'static str>() {
        Some(s) => s,
        None => match info.payload().downcast_ref::<String>() {
            Some(s) => &s[..],
            None => "Box<Any>",
        },
    }
}

/// The generic response for an error that escaped a request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    status: StatusCode,
    body: String,
}

impl ErrorResponse {
    /// Builds the 500 response for an error.
    pub fn from_error<E: Error + ?Sized>(err: &E) -> ErrorResponse {
        let body = serde_json::json!({
            "success": false,
            "message": err.to_string(),
        });
        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: body.to_string(),
        }
    }

    /// The HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The JSON body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Converts into an `http::Response`.
    pub fn into_response(self) -> Response<String> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
        response
    }
}

/// A handle to an installed capture hook.
pub struct HookHandle {
    generation: u64,
    state: Arc<HookState>,
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookHandle")
            .field("generation", &self.generation)
            .field("fallback", &self.state.fallback)
            .field("active", &self.is_active())
            .finish()
    }
}

impl HookHandle {
    /// The client errors are reported through.
    pub fn client(&self) -> &Arc<Client> {
        &self.state.client
    }

    /// Whether this handle's state still receives panics.
    pub fn is_active(&self) -> bool {
        matches!(*ACTIVE.read().unwrap(), Some((generation, _)) if generation == self.generation)
    }

    /// Reports an error without producing a response.
    ///
    /// Returns `None` if the filter rejected the error.
    pub fn report(&self, err: &(dyn Error + 'static)) -> Option<DeliveryResult> {
        self.state.report(&UncaughtError::Error(err))
    }

    /// Reports an error and returns the generic 500 response for it.
    pub fn handle_error(&self, err: &(dyn Error + 'static)) -> ErrorResponse {
        if let Some(Err(failure)) = self.report(err) {
            log::debug!(target: LOG_TARGET, "[Hook] Error was not delivered: {}", failure);
        }
        ErrorResponse::from_error(err)
    }

    /// Deactivates the hook if this handle is still the current one.
    ///
    /// Panics are then forwarded to the previous hook unchanged.
    pub fn uninstall(&self) {
        let mut active = ACTIVE.write().unwrap();
        if matches!(*active, Some((generation, _)) if generation == self.generation) {
            *active = None;
            log::debug!(
                target: LOG_TARGET,
                "[Hook] Deactivated capture hook #{}",
                self.generation
            );
        }
    }
}
