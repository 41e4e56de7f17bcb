//! Port abstraction for avatar blob storage.
use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by blob storage adapters.
    pub enum BlobStoreError {
        /// Reading or writing the backing storage failed.
        Io { message: String } => "blob storage i/o failed: {message}",
        /// The requested blob name is not a plain file name.
        InvalidName { name: String } => "invalid blob name: {name}",
        /// The location was not issued by this store.
        ForeignLocation { location: String } => "location does not belong to this store: {location}",
    }
}

/// Where an uploaded blob landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Opaque location to persist and later pass to [`BlobStore::delete`].
    pub location: String,
    /// Bytes written.
    pub size: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` under `name`, replacing any blob of the same name.
    async fn upload(&self, name: &str, content: &[u8]) -> Result<StoredBlob, BlobStoreError>;

    /// Remove every listed blob. Locations that no longer exist are ignored.
    async fn delete(&self, locations: &[String]) -> Result<(), BlobStoreError>;
}
