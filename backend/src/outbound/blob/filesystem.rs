//! Local directory blob store built on `cap_std`.
//!
//! Uploads are written to a hidden staging file and renamed into place, so
//! a reader never observes a partially written avatar. All paths are
//! resolved relative to a directory capability opened once at startup.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use tracing::debug;
use uuid::Uuid;

use super::{BlobConfigError, validate_name};
use crate::domain::ports::{BlobStore, BlobStoreError, StoredBlob};

/// Stores blobs as files in one directory.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    dir: Arc<Dir>,
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Open (creating if needed) `root` as the upload directory.
    pub fn open(root: &Path) -> Result<Self, BlobConfigError> {
        let to_config_error = |error: io::Error| BlobConfigError::UploadDir {
            path: root.to_path_buf(),
            message: error.to_string(),
        };
        Dir::create_ambient_dir_all(root, ambient_authority()).map_err(to_config_error)?;
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(to_config_error)?;
        Ok(Self {
            dir: Arc::new(dir),
            root: root.to_path_buf(),
        })
    }

    fn location_of(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }

    fn name_of<'a>(&self, location: &'a str) -> Result<&'a str, BlobStoreError> {
        let prefix = self.root.display().to_string();
        let name = location
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix(std::path::MAIN_SEPARATOR))
            .ok_or_else(|| BlobStoreError::foreign_location(location))?;
        validate_name(name)?;
        Ok(name)
    }
}

fn io_error(path: &Path, error: &io::Error) -> BlobStoreError {
    BlobStoreError::io(format!("{}: {error}", path.display()))
}

fn write_atomically(dir: &Dir, root: &Path, name: &str, content: &[u8]) -> Result<(), BlobStoreError> {
    let staging = format!(".tmp-{}-{name}", Uuid::new_v4().simple());
    dir.write(&staging, content)
        .map_err(|error| io_error(&root.join(&staging), &error))?;
    dir.rename(&staging, dir, name).map_err(|error| {
        let _cleanup = dir.remove_file(&staging);
        io_error(&root.join(name), &error)
    })
}

fn remove_if_exists(dir: &Dir, root: &Path, name: &str) -> Result<(), BlobStoreError> {
    match dir.remove_file(name) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(io_error(&root.join(name), &error)),
    }
}

async fn blocking<T, F>(work: F) -> Result<T, BlobStoreError>
where
    F: FnOnce() -> Result<T, BlobStoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| BlobStoreError::io(format!("blob task failed: {error}")))?
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn upload(&self, name: &str, content: &[u8]) -> Result<StoredBlob, BlobStoreError> {
        validate_name(name)?;
        let dir = Arc::clone(&self.dir);
        let root = self.root.clone();
        let owned_name = name.to_owned();
        let bytes = content.to_vec();
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        blocking(move || write_atomically(&dir, &root, &owned_name, &bytes)).await?;
        let location = self.location_of(name);
        debug!(location = %location, size, "blob written");
        Ok(StoredBlob { location, size })
    }

    async fn delete(&self, locations: &[String]) -> Result<(), BlobStoreError> {
        let names = locations
            .iter()
            .map(|location| self.name_of(location).map(str::to_owned))
            .collect::<Result<Vec<_>, _>>()?;
        let dir = Arc::clone(&self.dir);
        let root = self.root.clone();
        blocking(move || {
            names
                .iter()
                .try_for_each(|name| remove_if_exists(&dir, &root, name))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn uploads() -> (TempDir, FilesystemBlobStore) {
        let temp = TempDir::new().expect("temp dir");
        let store = FilesystemBlobStore::open(&temp.path().join("uploads")).expect("open");
        (temp, store)
    }

    #[rstest]
    #[tokio::test]
    async fn uploads_land_under_the_root(uploads: (TempDir, FilesystemBlobStore)) {
        let (temp, store) = uploads;

        let stored = store.upload("face.png", b"\x89PNG").await.expect("upload");

        let expected = temp.path().join("uploads").join("face.png");
        assert_eq!(stored.location, expected.display().to_string());
        assert_eq!(stored.size, 4);
        assert_eq!(store.dir.read("face.png").expect("read"), b"\x89PNG");
    }

    #[rstest]
    #[tokio::test]
    async fn deleting_twice_is_not_an_error(uploads: (TempDir, FilesystemBlobStore)) {
        let (_temp, store) = uploads;
        let stored = store.upload("face.png", b"png").await.expect("upload");
        let locations = vec![stored.location];

        store.delete(&locations).await.expect("delete");
        store.delete(&locations).await.expect("delete again");

        assert!(!store.dir.exists("face.png"));
    }

    #[rstest]
    #[case("/elsewhere/face.png")]
    #[case("memory://face.png")]
    #[tokio::test]
    async fn locations_outside_the_root_are_refused(
        uploads: (TempDir, FilesystemBlobStore),
        #[case] location: &str,
    ) {
        let (_temp, store) = uploads;

        let err = store
            .delete(&[location.to_owned()])
            .await
            .expect_err("foreign");

        assert!(err.is_foreign_location());
    }

    #[rstest]
    #[tokio::test]
    async fn path_traversal_is_rejected(uploads: (TempDir, FilesystemBlobStore)) {
        let (_temp, store) = uploads;

        let err = store.upload("../escape.png", b"x").await.expect_err("invalid");

        assert!(err.is_invalid_name());
    }
}
