// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! S3-compatible object storage backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    error::SdkError,
    operation::head_object::HeadObjectError,
    primitives::ByteStream,
};

use super::{ExternalStorage, StorageError};

/// A bucket (and key prefix) on an S3-compatible object store.
///
/// Credentials and the region come from the ambient AWS configuration.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Opens the bucket with credentials from the environment.
    pub async fn new(bucket: &str, prefix: &str) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
            bucket: bucket.to_owned(),
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }
}

#[async_trait]
impl ExternalStorage for S3Storage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if matches!(err.err(), HeadObjectError::NotFound(_)) => {
                Ok(false)
            }
            Err(err) => Err(StorageError::S3(err.to_string())),
        }
    }

    async fn write(&self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .body(ByteStream::from(contents.to_vec()))
            .send()
            .await
            .map_err(|err| StorageError::S3(err.to_string()))?;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(name))
            .send()
            .await
            .map_err(|err| StorageError::S3(err.to_string()))?;
        let bytes = object
            .body
            .collect()
            .await
            .map_err(|err| StorageError::S3(err.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keys_are_rooted_at_the_prefix() {
        let storage = S3Storage::new("backups", "cluster-7/nightly/").await;
        assert_eq!(storage.key("backupmeta"), "cluster-7/nightly/backupmeta");
        let unprefixed = S3Storage::new("backups", "").await;
        assert_eq!(unprefixed.key("backupmeta"), "backupmeta");
    }
}
