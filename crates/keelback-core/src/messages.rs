// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire messages exchanged with storage nodes during a backup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ClusterId, RegionId, manifest::File};

/// A request instructing a storage node to back up a key range.
///
/// `start_version == end_version` expresses a point-in-time snapshot; both
/// are set to the backup timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupRequest {
    pub cluster_id: ClusterId,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub start_version: u64,
    pub end_version: u64,
    /// Destination the node writes its files to.
    pub path: String,
    /// Bytes per second, per node; zero disables the limit.
    pub rate_limit: u64,
    /// Worker threads the node dedicates to this backup.
    pub concurrency: u32,
}

/// One frame streamed back by a storage node.
///
/// A frame with no error is authoritative: every key of
/// `[start_key, end_key)` at the snapshot version is contained in `files`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupResponse {
    pub error: Option<ResponseError>,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub files: Vec<File>,
}

/// A transaction lock a storage node ran into while reading the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Key of the lock's primary; lock state is resolved through it.
    pub primary_lock: Vec<u8>,
    /// Start timestamp of the locking transaction.
    pub lock_version: u64,
    /// The locked key the read stumbled over.
    pub key: Vec<u8>,
    /// Remaining lifetime of the lock, in milliseconds.
    pub lock_ttl: u64,
}

/// Key-value layer errors reported in a [`BackupResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum KvError {
    /// The snapshot read hit an uncommitted transaction's lock.
    #[error("key is locked")]
    Locked(LockInfo),
    /// Any other key-value error; a backup read should never produce one.
    #[error("kv error: {0}")]
    Other(String),
}

/// Region layer errors reported in a [`BackupResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RegionError {
    #[error("peer is not the leader of region {region_id}")]
    NotLeader { region_id: RegionId },
    #[error("region epoch does not match")]
    EpochNotMatch,
    #[error("region {region_id} not found")]
    RegionNotFound { region_id: RegionId },
    #[error("store is busy: {reason}")]
    ServerIsBusy { reason: String },
    #[error("command is stale")]
    StaleCommand,
    #[error("store does not match the request")]
    StoreNotMatch,
    #[error("region error: {0}")]
    Other(String),
}

impl RegionError {
    /// Region errors that resolve themselves as routing information catches
    /// up; the request can be retried after a short pause.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, RegionError::Other(_))
    }
}

/// The error variants a storage node may attach to a response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ResponseError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("cluster id mismatch: request {request}, node {node}")]
    ClusterIdMismatch { request: ClusterId, node: ClusterId },
    /// Fail closed on error variants this client does not know.
    #[error("unknown backup error: {0}")]
    Unknown(String),
}
