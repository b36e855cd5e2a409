// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cluster topology types reported by the placement driver.

use keelback_core::{RegionId, StoreId, messages::LockInfo};
use serde::{Deserialize, Serialize};

/// A storage node registered with the placement driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    /// Network address of the node's backup API.
    pub address: String,
}

/// One replica of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: StoreId,
}

/// Version pair the cluster uses to detect stale routing information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

/// A contiguous replicated key interval.
///
/// Boundary keys are in the memcomparable encoding, the same form region
/// lookups take. An empty `end_key` means the region runs to the end of the
/// key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
}

/// A transaction lock suspected to block a snapshot read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// The locked key.
    pub key: Vec<u8>,
    /// Key of the lock's primary, through which lock state is resolved.
    pub primary: Vec<u8>,
    /// Start timestamp of the locking transaction.
    pub ts: u64,
    /// Remaining lifetime, in milliseconds.
    pub ttl: u64,
}

impl From<LockInfo> for Lock {
    fn from(info: LockInfo) -> Self {
        Self {
            key: info.key,
            primary: info.primary_lock,
            ts: info.lock_version,
            ttl: info.lock_ttl,
        }
    }
}
