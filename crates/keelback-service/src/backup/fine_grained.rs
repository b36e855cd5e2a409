// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fine-grained gap closing after the push-down round.
//!
//! Whatever the push down left uncovered is re-driven sub-range by
//! sub-range against the region leader owning each gap. A sub-range that
//! spans several regions is not split eagerly: the leader's response covers
//! its own region, and the next round re-derives the remaining tail from
//! the tree and looks up a fresh leader for it. Every round charges its
//! sleep to one shared budget, so a range that cannot converge fails
//! instead of stalling forever.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::StreamExt;
use keelback_cluster_client::{
    pd::PlacementDriver, resolver::LockResolver, store::StoreClient, types::Peer,
};
use keelback_core::{
    Range, RangeTree,
    keys::{encode_bytes, hex_key},
    messages::{BackupRequest, BackupResponse},
};
use keelback_utils::backoff::Backoffer;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::{
    BackupError, BackupMetrics,
    response::{ResponseAction, classify_response},
};
use crate::{config::BackupConfig, progress::ProgressTick};

/// Delay between region-leader lookup attempts grows by this much per
/// attempt.
const LEADER_LOOKUP_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Everything a fine-grained worker needs; cheap to clone into tasks.
#[derive(Clone)]
pub(crate) struct FineGrainedContext {
    pub pd: Arc<dyn PlacementDriver>,
    pub stores: Arc<dyn StoreClient>,
    pub lock_resolver: Arc<dyn LockResolver>,
    pub metrics: BackupMetrics,
    /// Request template carrying the full range; workers narrow it to their
    /// sub-range.
    pub request: BackupRequest,
    pub leader_lookup_attempts: usize,
    pub cancel: CancellationToken,
}

/// Closes the gaps of `[request.start_key, request.end_key)` until the tree
/// covers the range or the retry budget drains.
pub(crate) async fn fine_grained_backup(
    context: &FineGrainedContext,
    config: &BackupConfig,
    tree: &mut RangeTree,
    progress: &ProgressTick,
) -> Result<(), BackupError> {
    let mut budget = Backoffer::new(config.fine_grained_max_backoff);
    loop {
        let incomplete =
            tree.incomplete_ranges(&context.request.start_key, &context.request.end_key);
        if incomplete.is_empty() {
            return Ok(());
        }
        if context.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        context.metrics.fine_grained_rounds.inc();
        tracing::info!(incomplete = incomplete.len(), "starting fine grained round");

        let (sub_range_tx, sub_range_rx) =
            async_channel::bounded::<Range>(config.response_channel_capacity);
        let (response_tx, mut response_rx) =
            mpsc::channel::<BackupResponse>(config.response_channel_capacity);
        // Workers report the largest backoff hint of the round; kept in a
        // short critical section.
        let round_backoff = Arc::new(Mutex::new(Duration::ZERO));

        let mut workers = JoinSet::new();
        for _ in 0..config.fine_grained_workers.max(1) {
            let context = context.clone();
            let sub_ranges = sub_range_rx.clone();
            let responses = response_tx.clone();
            let mut fork = budget.fork();
            let round_backoff = round_backoff.clone();
            workers.spawn(async move {
                while let Ok(sub_range) = sub_ranges.recv().await {
                    let hint =
                        handle_fine_grained(&context, &mut fork, sub_range, &responses).await?;
                    if hint > Duration::ZERO {
                        let mut max = round_backoff.lock().expect("mutex is not poisoned");
                        if *max < hint {
                            *max = hint;
                        }
                    }
                }
                Ok::<(), BackupError>(())
            });
        }
        drop(response_tx);
        drop(sub_range_rx);

        let feeder = tokio::spawn(async move {
            for sub_range in incomplete {
                if sub_range_tx.send(sub_range).await.is_err() {
                    break;
                }
            }
        });

        while let Some(response) = response_rx.recv().await {
            tracing::info!(
                start_key = %hex_key(&response.start_key),
                end_key = %hex_key(&response.end_key),
                "put fine grained range",
            );
            context.metrics.responses_accepted.inc();
            context
                .metrics
                .files_collected
                .inc_by(response.files.len() as u64);
            tree.put_ok(&response.start_key, &response.end_key, response.files);
            progress.tick();
        }
        feeder.await.map_err(BackupError::Join)?;
        while let Some(joined) = workers.join_next().await {
            joined.map_err(BackupError::Join)??;
        }

        let backoff = *round_backoff.lock().expect("mutex is not poisoned");
        if backoff > Duration::ZERO {
            tracing::info!(?backoff, "backing off before the next fine grained round");
            context
                .metrics
                .retry_sleep_ms
                .inc_by(backoff.as_millis() as u64);
            budget.backoff(backoff).await?;
        }
    }
}

/// Re-drives one uncovered sub-range against its region leader.
///
/// Returns the largest backoff hint seen among this sub-range's retryable
/// responses, or zero if none were.
async fn handle_fine_grained(
    context: &FineGrainedContext,
    budget: &mut Backoffer,
    sub_range: Range,
    responses: &mpsc::Sender<BackupResponse>,
) -> Result<Duration, BackupError> {
    let leader = find_region_leader(
        context.pd.as_ref(),
        &sub_range.start,
        context.leader_lookup_attempts,
        budget,
    )
    .await?;
    let request = BackupRequest {
        start_key: sub_range.start,
        end_key: sub_range.end,
        ..context.request.clone()
    };
    let mut frames = context.stores.backup(leader.store_id, request).await?;
    let mut max_backoff = Duration::ZERO;
    loop {
        let frame = tokio::select! {
            _ = context.cancel.cancelled() => break,
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else { break };
        match classify_response(frame?, context.lock_resolver.as_ref(), &context.metrics).await? {
            ResponseAction::Commit(response) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            ResponseAction::Retry { backoff } => max_backoff = max_backoff.max(backoff),
        }
    }
    Ok(max_backoff)
}

/// Finds the leader of the region containing `key`.
///
/// Region metadata is kept under encoded keys, so the raw key is encoded
/// before the lookup. Lookup failures retry a bounded number of times with
/// linearly growing, budget-charged sleeps.
pub(crate) async fn find_region_leader(
    pd: &dyn PlacementDriver,
    key: &[u8],
    attempts: usize,
    budget: &mut Backoffer,
) -> Result<Peer, BackupError> {
    let key = encode_bytes(key);
    for attempt in 0..attempts {
        if attempt > 0 {
            budget
                .backoff(LEADER_LOOKUP_BACKOFF_STEP * attempt as u32)
                .await?;
        }
        match pd.get_region(&key).await {
            Ok((region, Some(leader))) => {
                tracing::debug!(
                    region_id = region.id,
                    leader_store = leader.store_id,
                    key = %hex_key(&key),
                    "found region leader",
                );
                return Ok(leader);
            }
            Ok((region, None)) => {
                tracing::warn!(region_id = region.id, key = %hex_key(&key), "region has no leader");
            }
            Err(error) => {
                tracing::error!(%error, key = %hex_key(&key), "region lookup failed");
            }
        }
    }
    Err(BackupError::NoRegionLeader(hex_key(&key)))
}
