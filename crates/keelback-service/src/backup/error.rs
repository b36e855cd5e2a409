// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by the backup pipeline.

use keelback_cluster_client::{NodeError, catalog::CatalogError, pd::PdError};
use keelback_core::messages::ResponseError;
use keelback_utils::backoff::BudgetExhausted;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors a backup can fail with.
///
/// Retryable region and lock errors never surface here; they are absorbed by
/// the fine-grained retry loop until its budget drains.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Rejected before any work happened.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The requested snapshot cannot be read.
    #[error("snapshot unavailable: {0}")]
    Snapshot(String),
    /// The catalog could not be turned into a backup plan.
    #[error("backup planning failed: {0}")]
    Plan(String),
    /// The retry budget drained with sub-ranges still uncovered.
    #[error("backup could not cover all ranges: {0}")]
    Exhausted(#[from] BudgetExhausted),
    /// The snapshot fell behind the GC safepoint while the backup ran.
    #[error(
        "snapshot fell behind the GC safepoint: backup_ts {backup_ts}, safe_point {safe_point}"
    )]
    GcSafepointExceeded { backup_ts: u64, safe_point: u64 },
    /// A storage node reported an error the classifier deems fatal.
    #[error("storage node reported a fatal error: {0}")]
    Response(ResponseError),
    /// Communication with a storage node failed outright.
    #[error(transparent)]
    Transport(#[from] NodeError),
    #[error(transparent)]
    Pd(#[from] PdError),
    /// The destination already holds a manifest.
    #[error("backup manifest already exists at the destination")]
    ManifestExists,
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Two stores claimed the same content-addressed file name.
    #[error("duplicate file names in the manifest: {}", .0.join(", "))]
    DuplicateFiles(Vec<String>),
    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] bcs::Error),
    /// No leader could be located for a sub-range's start key.
    #[error("no region leader found for key {0}")]
    NoRegionLeader(String),
    /// A pipeline task panicked or was aborted.
    #[error("backup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// The job was cancelled before it could finish.
    #[error("backup cancelled")]
    Cancelled,
}

impl From<CatalogError> for BackupError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::SchemaNotFound(_) | CatalogError::TableNotFound { .. } => {
                Self::Snapshot(error.to_string())
            }
            other => Self::Plan(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(error: serde_json::Error) -> Self {
        Self::Plan(format!("catalog payload serialization failed: {error}"))
    }
}
