// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Push-down of one backup request to every storage node.
//!
//! Each store receives the same request for the whole range and streams
//! back one response per region it leads. Clean responses are authoritative
//! and land in the coverage tree; transient errors are dropped here (the
//! fine-grained pass closes the resulting gaps); fatal response errors and
//! any transport failure abort the job.

use std::sync::Arc;

use futures::StreamExt;
use keelback_cluster_client::{store::StoreClient, types::Store};
use keelback_core::{RangeTree, keys::hex_key, messages::BackupRequest};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::{BackupError, BackupMetrics, response};
use crate::progress::ProgressTick;

pub(crate) async fn push_backup(
    store_client: Arc<dyn StoreClient>,
    stores: &[Store],
    request: BackupRequest,
    progress: &ProgressTick,
    metrics: &BackupMetrics,
    cancel: &CancellationToken,
) -> Result<RangeTree, BackupError> {
    let mut tree = RangeTree::new();
    let (response_tx, mut response_rx) = mpsc::channel(stores.len().max(1));
    let mut streams = JoinSet::new();
    for store in stores {
        let client = store_client.clone();
        let request = request.clone();
        let sender = response_tx.clone();
        let cancel = cancel.clone();
        let store_id = store.id;
        streams.spawn(async move {
            let mut frames = client.backup(store_id, request).await?;
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    frame = frames.next() => frame,
                };
                let Some(frame) = frame else {
                    return Ok::<(), BackupError>(());
                };
                if sender.send((store_id, frame?)).await.is_err() {
                    return Ok(());
                }
            }
        });
    }
    drop(response_tx);

    loop {
        tokio::select! {
            received = response_rx.recv() => {
                let Some((store_id, response)) = received else {
                    break;
                };
                match &response.error {
                    None => {
                        tracing::debug!(
                            store_id,
                            start_key = %hex_key(&response.start_key),
                            end_key = %hex_key(&response.end_key),
                            files = response.files.len(),
                            "push down response",
                        );
                        metrics.responses_accepted.inc();
                        metrics.files_collected.inc_by(response.files.len() as u64);
                        tree.put_ok(&response.start_key, &response.end_key, response.files);
                        progress.tick();
                    }
                    Some(error) if response::is_fatal(error) => {
                        tracing::error!(store_id, %error, "fatal error during push down");
                        return Err(BackupError::Response(error.clone()));
                    }
                    Some(error) => {
                        // Leaves a gap for the fine-grained pass.
                        tracing::warn!(store_id, %error, "dropping retryable push down error");
                    }
                }
            }
            joined = streams.join_next(), if !streams.is_empty() => {
                if let Some(joined) = joined {
                    joined.map_err(BackupError::Join)??;
                }
            }
        }
    }
    while let Some(joined) = streams.join_next().await {
        joined.map_err(BackupError::Join)??;
    }
    Ok(tree)
}
