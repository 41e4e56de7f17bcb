//! Blob storage adapters for avatars.
//!
//! The adapter is chosen by name at startup through [`build_blob_store`];
//! there is no global registry.

mod filesystem;
mod memory;

use std::path::PathBuf;
use std::sync::Arc;

pub use filesystem::FilesystemBlobStore;
pub use memory::InMemoryBlobStore;

use crate::domain::ports::{BlobStore, BlobStoreError};

/// Handler name selecting [`FilesystemBlobStore`].
pub const LOCAL_HANDLER: &str = "local";
/// Handler name selecting [`InMemoryBlobStore`].
pub const MEMORY_HANDLER: &str = "memory";

/// Startup failures while building a blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobConfigError {
    #[error("unknown blob handler `{handler}` (expected `local` or `memory`)")]
    UnknownHandler { handler: String },
    #[error("failed to open upload directory {path}: {message}")]
    UploadDir { path: PathBuf, message: String },
}

/// Build the blob store named by `handler`.
///
/// # Examples
/// ```
/// use ledger::outbound::blob::build_blob_store;
///
/// assert!(build_blob_store("memory", "unused".as_ref()).is_ok());
/// assert!(build_blob_store("s3", "unused".as_ref()).is_err());
/// ```
pub fn build_blob_store(
    handler: &str,
    upload_dir: &std::path::Path,
) -> Result<Arc<dyn BlobStore>, BlobConfigError> {
    match handler {
        LOCAL_HANDLER => Ok(Arc::new(FilesystemBlobStore::open(upload_dir)?)),
        MEMORY_HANDLER => Ok(Arc::new(InMemoryBlobStore::default())),
        other => Err(BlobConfigError::UnknownHandler {
            handler: other.to_owned(),
        }),
    }
}

/// Accept only plain, single-component file names.
fn validate_name(name: &str) -> Result<(), BlobStoreError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(BlobStoreError::invalid_name(name))
    }
}
