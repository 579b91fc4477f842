use once_cell::sync::Lazy;

use crate::protocol::ClientSdkInfo;

/// The version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The SDK name reported to the collector.
pub const SDK_NAME: &str = "tnet-sentry";

include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

pub static USER_AGENT: Lazy<String> = Lazy::new(|| format!("{}/{}", SDK_NAME, VERSION));

pub static SDK_INFO: Lazy<ClientSdkInfo> = Lazy::new(|| ClientSdkInfo {
    name: SDK_NAME.into(),
    version: VERSION.into(),
});
