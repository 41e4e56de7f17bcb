//! Process-local blob store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::validate_name;
use crate::domain::ports::{BlobStore, BlobStoreError, StoredBlob};

const LOCATION_PREFIX: &str = "memory://";

/// Keeps blobs in a map keyed by name.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Contents stored at `location`, if any.
    pub fn get(&self, location: &str) -> Option<Vec<u8>> {
        let name = location.strip_prefix(LOCATION_PREFIX)?;
        self.blobs.lock().ok()?.get(name).cloned()
    }

    fn blobs(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, BlobStoreError> {
        self.blobs
            .lock()
            .map_err(|_| BlobStoreError::io("blob map mutex poisoned"))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, name: &str, content: &[u8]) -> Result<StoredBlob, BlobStoreError> {
        validate_name(name)?;
        self.blobs()?.insert(name.to_owned(), content.to_vec());
        Ok(StoredBlob {
            location: format!("{LOCATION_PREFIX}{name}"),
            size: u64::try_from(content.len()).unwrap_or(u64::MAX),
        })
    }

    async fn delete(&self, locations: &[String]) -> Result<(), BlobStoreError> {
        let names = locations
            .iter()
            .map(|location| {
                location
                    .strip_prefix(LOCATION_PREFIX)
                    .ok_or_else(|| BlobStoreError::foreign_location(location.as_str()))
                    .and_then(|name| validate_name(name).map(|()| name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut blobs = self.blobs()?;
        for name in names {
            blobs.remove(name);
        }
        Ok(())
    }
}
