// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Classification of streamed backup responses.

use std::time::Duration;

use keelback_cluster_client::{resolver::LockResolver, types::Lock};
use keelback_core::{
    keys::hex_key,
    messages::{BackupResponse, KvError, ResponseError},
};

use super::{BackupError, BackupMetrics};

/// How long to wait before retrying after a region error; routing
/// information has usually caught up by then.
const REGION_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

/// What to do with one streamed response.
#[derive(Debug)]
pub(crate) enum ResponseAction {
    /// The response is authoritative for its sub-range; record it.
    Commit(BackupResponse),
    /// Transient failure; retry the sub-range after the hinted sleep.
    Retry { backoff: Duration },
}

/// Classifies a response into commit, retry-with-backoff, or a fatal error.
///
/// Locks are handed to the resolver: a cleaned lock retries immediately,
/// a surviving one retries once its time-to-expiry has passed. Anything the
/// classifier does not recognize fails closed.
pub(crate) async fn classify_response(
    mut response: BackupResponse,
    lock_resolver: &dyn LockResolver,
    metrics: &BackupMetrics,
) -> Result<ResponseAction, BackupError> {
    let Some(error) = response.error.take() else {
        return Ok(ResponseAction::Commit(response));
    };
    match error {
        ResponseError::Kv(KvError::Locked(lock)) => {
            tracing::warn!(key = %hex_key(&lock.key), "backup read blocked by a lock");
            metrics.lock_conflicts.inc();
            let ms_before_expired = lock_resolver.resolve_locks(&[Lock::from(lock)]).await?;
            Ok(ResponseAction::Retry {
                backoff: Duration::from_millis(ms_before_expired),
            })
        }
        ResponseError::Kv(other) => {
            tracing::error!(error = %other, "unexpected kv error");
            Err(BackupError::Response(other.into()))
        }
        ResponseError::Region(region) if region.is_retriable() => {
            tracing::warn!(error = %region, "backup hit a region error");
            Ok(ResponseAction::Retry {
                backoff: REGION_RETRY_BACKOFF,
            })
        }
        ResponseError::Region(region) => {
            tracing::error!(error = %region, "unexpected region error");
            Err(BackupError::Response(region.into()))
        }
        error @ (ResponseError::ClusterIdMismatch { .. } | ResponseError::Unknown(_)) => {
            tracing::error!(%error, "fatal backup error");
            Err(BackupError::Response(error))
        }
    }
}

/// Whether a response error must abort the job even during push down, where
/// transient errors are merely dropped.
pub(crate) fn is_fatal(error: &ResponseError) -> bool {
    match error {
        ResponseError::Kv(KvError::Locked(_)) => false,
        ResponseError::Kv(KvError::Other(_)) => true,
        ResponseError::Region(region) => !region.is_retriable(),
        ResponseError::ClusterIdMismatch { .. } | ResponseError::Unknown(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use keelback_core::messages::{LockInfo, RegionError};
    use keelback_test_utils::async_param_test;
    use prometheus::Registry;

    use super::*;
    use crate::test_utils::MockLockResolver;

    fn locked_response(ttl: u64) -> BackupResponse {
        BackupResponse {
            error: Some(
                KvError::Locked(LockInfo {
                    primary_lock: b"pk".to_vec(),
                    lock_version: 9,
                    key: b"k".to_vec(),
                    lock_ttl: ttl,
                })
                .into(),
            ),
            ..BackupResponse::default()
        }
    }

    fn response_with(error: ResponseError) -> BackupResponse {
        BackupResponse {
            error: Some(error),
            ..BackupResponse::default()
        }
    }

    #[tokio::test]
    async fn clean_response_commits() {
        let metrics = BackupMetrics::new(&Registry::new());
        let resolver = MockLockResolver::default();
        let response = BackupResponse {
            start_key: b"a".to_vec(),
            end_key: b"b".to_vec(),
            ..BackupResponse::default()
        };
        match classify_response(response, &resolver, &metrics).await {
            Ok(ResponseAction::Commit(committed)) => assert_eq!(committed.start_key, b"a"),
            other => panic!("expected a commit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn locked_response_resolves_and_backs_off() {
        let metrics = BackupMetrics::new(&Registry::new());
        let resolver = MockLockResolver::with_expirations([500]);
        match classify_response(locked_response(9_000), &resolver, &metrics).await {
            Ok(ResponseAction::Retry { backoff }) => {
                assert_eq!(backoff, Duration::from_millis(500));
            }
            other => panic!("expected a retry, got {other:?}"),
        }
        assert_eq!(resolver.resolved()[0].primary, b"pk");
        assert_eq!(metrics.lock_conflicts.get(), 1);
    }

    #[tokio::test]
    async fn cleaned_lock_retries_immediately() {
        let metrics = BackupMetrics::new(&Registry::new());
        let resolver = MockLockResolver::default();
        match classify_response(locked_response(9_000), &resolver, &metrics).await {
            Ok(ResponseAction::Retry { backoff }) => assert_eq!(backoff, Duration::ZERO),
            other => panic!("expected a retry, got {other:?}"),
        }
    }

    async_param_test! {
        retriable_region_errors_back_off_one_second: [
            not_leader: (RegionError::NotLeader { region_id: 1 }),
            epoch_not_match: (RegionError::EpochNotMatch),
            region_not_found: (RegionError::RegionNotFound { region_id: 1 }),
            server_is_busy: (RegionError::ServerIsBusy { reason: "busy".to_owned() }),
            stale_command: (RegionError::StaleCommand),
            store_not_match: (RegionError::StoreNotMatch),
        ]
    }
    async fn retriable_region_errors_back_off_one_second(error: RegionError) {
        let metrics = BackupMetrics::new(&Registry::new());
        let resolver = MockLockResolver::default();
        match classify_response(response_with(error.into()), &resolver, &metrics).await {
            Ok(ResponseAction::Retry { backoff }) => {
                assert_eq!(backoff, Duration::from_millis(1000));
            }
            other => panic!("expected a retry, got {other:?}"),
        }
    }

    async_param_test! {
        fatal_errors_abort: [
            kv_other: (KvError::Other("corruption".to_owned()).into()),
            region_other: (RegionError::Other("read index timeout".to_owned()).into()),
            cluster_id: (ResponseError::ClusterIdMismatch { request: 1, node: 2 }),
            unknown: (ResponseError::Unknown("???".to_owned())),
        ]
    }
    async fn fatal_errors_abort(error: ResponseError) {
        let metrics = BackupMetrics::new(&Registry::new());
        let resolver = MockLockResolver::default();
        assert!(is_fatal(&error));
        let result = classify_response(response_with(error), &resolver, &metrics).await;
        assert!(matches!(result, Err(BackupError::Response(_))));
    }

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!is_fatal(&locked_response(1).error.expect("has an error")));
        assert!(!is_fatal(&RegionError::EpochNotMatch.into()));
    }
}
