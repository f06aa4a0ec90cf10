//! # Storage drivers
//!
//! The interface between the registry and a key-addressed object store.
//! A [`Driver`] only needs to support whole-object push and pull, plus
//! get-or-create of the bucket which holds the objects.

mod credential;
mod driver;
mod error;

pub use credential::Credential;
pub use driver::Driver;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
