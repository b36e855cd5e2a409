// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The placement-driver client trait.

use async_trait::async_trait;
use keelback_core::{ClusterId, Timestamp};
use thiserror::Error;

use crate::{
    NodeError,
    types::{Peer, Region, Store},
};

/// Errors raised by placement-driver requests.
#[derive(Debug, Error)]
pub enum PdError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("placement driver unavailable: {0}")]
    Unavailable(String),
}

impl PdError {
    /// A transient availability failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

/// The cluster metadata service: timestamps, topology, and region routing.
#[async_trait]
pub trait PlacementDriver: Send + Sync {
    /// A fresh cluster timestamp.
    async fn get_ts(&self) -> Result<Timestamp, PdError>;

    /// Every storage node currently registered.
    async fn get_all_stores(&self) -> Result<Vec<Store>, PdError>;

    /// The region containing `key` and its current leader, if one is known.
    ///
    /// `key` must be in the memcomparable encoding
    /// ([`keelback_core::keys::encode_bytes`]); region boundaries are stored
    /// encoded.
    async fn get_region(&self, key: &[u8]) -> Result<(Region, Option<Peer>), PdError>;

    /// The oldest timestamp the cluster still retains data for.
    async fn get_gc_safe_point(&self) -> Result<Timestamp, PdError>;

    /// The id of the cluster the driver serves.
    async fn get_cluster_id(&self) -> Result<ClusterId, PdError>;

    /// Approximate number of regions intersecting `[start, end)`.
    ///
    /// Advisory, used only for progress estimation; implementations may
    /// ignore the keys and return the cluster-wide count.
    async fn get_region_count(&self, start: &[u8], end: &[u8]) -> Result<usize, PdError>;
}
