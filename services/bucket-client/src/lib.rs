//! # Bucket service client
//!
//! A [`storage_driver::Driver`] backed by a remote bucket service, reached over
//! HTTP. Objects are addressed by a bucket key (resolved once per bucket name)
//! and a path inside the bucket.

mod client;
mod config;
mod errors;
#[cfg(test)]
mod mock;
mod namespace;

/// The name of the storage driver.
const BUCKET_STORAGE_NAME: &str = "bucket";

/// Default timeout for regular requests
const BUCKET_DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Default connect timeout
const BUCKET_DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Chunks buffered between an upload source and the request body.
const BUCKET_UPLOAD_QUEUE: usize = 4;

pub use crate::client::BucketClient;
pub use crate::config::{BucketServiceConfig, ConfigError};
pub use crate::errors::{BucketError, BucketRequestError};
pub use crate::namespace::BucketKey;
