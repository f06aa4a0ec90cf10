//! # Storage daemon client
//!
//! A [`storage_driver::Driver`] backed by a storage daemon running on the same
//! host. The daemon is driven with JSON RPC calls and works on local files:
//! objects are pushed by handing it the path of a file, and pulled by asking
//! it to open an object, which yields the path of a local copy.

mod client;
mod config;
mod errors;
#[cfg(test)]
mod mock;
mod rpc;

/// The name of the storage driver.
const DAEMON_STORAGE_NAME: &str = "daemon";

/// Default timeout for RPC calls. Adding a large layer can take a while.
const DAEMON_DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Default connect timeout
const DAEMON_DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub use crate::client::DaemonClient;
pub use crate::config::{ConfigError, DaemonConfig, DEFAULT_ENDPOINT};
pub use crate::errors::{DaemonError, DaemonRequestError};
