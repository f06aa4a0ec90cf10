//! # Container Registry
//!
//! A Docker Registry v2 server which keeps its objects in a bucket storage
//! backend. Uploads are staged on local disk, verified against their declared
//! SHA-256 digest, and only then pushed to the backend.
//!
//! ## Example
//!
//! ```no_run
//! use bucket_registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new(MemoryStorage::new().into())
//!     .bucket("ddocker")
//!     .staging_dir("/tmp/registry")
//!     .build();
//!
//! // Serve `registry` with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod config;
mod digest;
mod error;
mod manifest;
mod session;
mod staging;
mod storage;

pub use api::{RegistryBuilder, router};
pub use config::{DEFAULT_BUCKET, DEFAULT_PORT, RegistryConfig, default_staging_dir};
pub use digest::{Digest, DigestError, DigestWriter, SHA256_PREFIX, digest_file, digest_reader};
pub use error::{RegistryError, RegistryResult};
pub use manifest::MANIFEST_V2_MEDIA_TYPE;
pub use session::{UnknownUploadSession, UploadRange, UploadSessions};
pub use staging::{StagedFile, StagingArea, StagingError};
pub use self::storage::{Fetched, RegistryStorage};
