// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The storage-node backup API.

use async_trait::async_trait;
use futures::stream::BoxStream;
use keelback_core::{
    StoreId,
    messages::{BackupRequest, BackupResponse},
};

use crate::NodeError;

/// The frames one storage node streams for a backup request.
pub type BackupResponseStream = BoxStream<'static, Result<BackupResponse, NodeError>>;

/// Client for the backup API of the cluster's storage nodes, addressed by
/// store id.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Starts a backup on the addressed store.
    ///
    /// The store streams one response per region it leads within the
    /// requested range; the stream ends once the store has visited them
    /// all. Dropping the stream cancels the request.
    async fn backup(
        &self,
        store_id: StoreId,
        request: BackupRequest,
    ) -> Result<BackupResponseStream, NodeError>;
}
