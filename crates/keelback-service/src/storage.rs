// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! External storage backends for backup artifacts.
//!
//! Storage nodes write their sorted-string tables straight to the
//! destination; this module only handles the small control-plane objects,
//! most importantly the manifest. Destinations are named by URL:
//! `local:///backups/nightly` (or a bare path) for a mounted filesystem,
//! `s3://bucket/prefix` for object storage.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

mod s3;
pub use s3::S3Storage;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported storage scheme `{0}`")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("s3 request failed: {0}")]
    S3(String),
}

/// A destination for backup artifacts.
#[async_trait]
pub trait ExternalStorage: Send + Sync {
    /// True if an object with this name already exists at the destination.
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Writes an object, replacing any previous content.
    async fn write(&self, name: &str, contents: &[u8]) -> Result<(), StorageError>;

    /// Reads an object back.
    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Creates the backend named by a storage URL.
pub async fn make_storage(url: &str) -> Result<Box<dyn ExternalStorage>, StorageError> {
    match url.split_once("://") {
        None => Ok(Box::new(LocalStorage::new(PathBuf::from(url)).await?)),
        Some(("local" | "file", path)) => {
            if path.is_empty() {
                return Err(StorageError::InvalidUrl {
                    url: url.to_owned(),
                    reason: "empty path".to_owned(),
                });
            }
            Ok(Box::new(LocalStorage::new(PathBuf::from(path)).await?))
        }
        Some(("s3", rest)) => {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(StorageError::InvalidUrl {
                    url: url.to_owned(),
                    reason: "missing bucket".to_owned(),
                });
            }
            Ok(Box::new(S3Storage::new(bucket, prefix).await))
        }
        Some((scheme, _)) => Err(StorageError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// A directory on a locally mounted filesystem.
#[derive(Debug)]
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    /// Opens (and creates, if needed) the base directory.
    pub async fn new(base: PathBuf) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&base).await?;
        Ok(Self { base })
    }
}

#[async_trait]
impl ExternalStorage for LocalStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.base.join(name)).await?)
    }

    async fn write(&self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        Ok(tokio::fs::write(self.base.join(name), contents).await?)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.base.join(name)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_storage_round_trip() -> keelback_test_utils::Result {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path().join("nightly")).await?;
        assert!(!storage.exists("backupmeta").await?);
        storage.write("backupmeta", b"contents").await?;
        assert!(storage.exists("backupmeta").await?);
        assert_eq!(storage.read("backupmeta").await?, b"contents");
        Ok(())
    }

    #[tokio::test]
    async fn make_storage_accepts_local_urls_and_bare_paths() -> keelback_test_utils::Result {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("by-url");
        let url = format!("local://{}", base.display());
        make_storage(&url).await?.write("probe", b"x").await?;
        make_storage(base.to_str().expect("utf-8 path"))
            .await?
            .write("probe2", b"y")
            .await?;
        assert!(base.join("probe").exists());
        assert!(base.join("probe2").exists());
        Ok(())
    }

    #[tokio::test]
    async fn make_storage_rejects_unknown_schemes() {
        match make_storage("ftp://elsewhere/backups").await {
            Err(StorageError::UnsupportedScheme(scheme)) => assert_eq!(scheme, "ftp"),
            Err(other) => panic!("expected an unsupported-scheme error, got {other:?}"),
            Ok(_) => panic!("expected an unsupported-scheme error"),
        }
    }

    #[tokio::test]
    async fn make_storage_rejects_empty_paths() {
        assert!(matches!(
            make_storage("local://").await,
            Err(StorageError::InvalidUrl { .. })
        ));
        assert!(matches!(
            make_storage("s3://").await,
            Err(StorageError::InvalidUrl { .. })
        ));
    }
}
