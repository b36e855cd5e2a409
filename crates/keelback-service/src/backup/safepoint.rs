// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The snapshot-safety supervisor.
//!
//! Reading below the GC safepoint is undefined, so the snapshot must stay
//! above it for the whole life of the job. The watch re-checks on an
//! interval; a violation cancels the job, while transient lookup failures
//! are only logged. One final check runs when the job finishes, so a
//! backup never reports success for a snapshot that fell behind.

use std::{sync::Arc, time::Duration};

use keelback_cluster_client::pd::PlacementDriver;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::BackupError;

/// Asserts that the composed snapshot timestamp is still above the GC
/// safepoint.
pub(crate) async fn check_safepoint(
    pd: &dyn PlacementDriver,
    backup_ts: u64,
) -> Result<(), BackupError> {
    let safe_point = pd.get_gc_safe_point().await?.compose();
    if backup_ts <= safe_point {
        return Err(BackupError::GcSafepointExceeded {
            backup_ts,
            safe_point,
        });
    }
    Ok(())
}

/// A periodic safepoint check covering the lifetime of a range pipeline.
pub(crate) struct SafepointWatch {
    pd: Arc<dyn PlacementDriver>,
    backup_ts: u64,
    stop: CancellationToken,
    task: JoinHandle<Result<(), BackupError>>,
}

impl SafepointWatch {
    /// Spawns the periodic check; `job_cancel` is cancelled on a violation
    /// so in-flight work stops promptly.
    pub fn spawn(
        pd: Arc<dyn PlacementDriver>,
        backup_ts: u64,
        interval: Duration,
        job_cancel: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let pd = pd.clone();
            let stop = stop.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    // The first tick fires immediately, checking the
                    // snapshot before any work is pushed down.
                    tokio::select! {
                        _ = stop.cancelled() => return Ok(()),
                        _ = ticker.tick() => {}
                    }
                    match check_safepoint(pd.as_ref(), backup_ts).await {
                        Ok(()) => {}
                        Err(error @ BackupError::GcSafepointExceeded { .. }) => {
                            tracing::error!(%error, "snapshot no longer safe, cancelling backup");
                            job_cancel.cancel();
                            return Err(error);
                        }
                        // Lookup failures are tolerated; the next tick retries.
                        Err(error) => {
                            tracing::warn!(%error, "gc safepoint lookup failed")
                        }
                    }
                }
            }
        });
        Self {
            pd,
            backup_ts,
            stop,
            task,
        }
    }

    /// Stops the periodic check and surfaces the final verdict.
    pub async fn finish(self) -> Result<(), BackupError> {
        self.stop.cancel();
        self.task.await.map_err(BackupError::Join)??;
        check_safepoint(self.pd.as_ref(), self.backup_ts).await
    }
}

#[cfg(test)]
mod tests {
    use keelback_core::Timestamp;

    use super::*;
    use crate::test_utils::MockPlacementDriver;

    #[tokio::test(start_paused = true)]
    async fn violation_cancels_the_job() {
        let pd = Arc::new(MockPlacementDriver::default());
        pd.set_safe_point(Timestamp::new(500, 0));
        let job_cancel = CancellationToken::new();
        let watch = SafepointWatch::spawn(
            pd.clone(),
            Timestamp::new(100, 0).compose(),
            Duration::from_secs(30),
            job_cancel.clone(),
        );
        job_cancel.cancelled().await;
        assert!(matches!(
            watch.finish().await,
            Err(BackupError::GcSafepointExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_failures_are_tolerated() {
        let pd = Arc::new(MockPlacementDriver::default());
        pd.set_safe_point(Timestamp::new(1, 0));
        pd.fail_safepoint_lookups(true);
        let job_cancel = CancellationToken::new();
        let watch = SafepointWatch::spawn(
            pd.clone(),
            Timestamp::new(100, 0).compose(),
            Duration::from_secs(30),
            job_cancel.clone(),
        );
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(!job_cancel.is_cancelled());
        // The final check still needs a working lookup.
        pd.fail_safepoint_lookups(false);
        watch.finish().await.expect("snapshot is safe");
    }

    #[tokio::test(start_paused = true)]
    async fn final_check_catches_a_late_violation() {
        let pd = Arc::new(MockPlacementDriver::default());
        pd.set_safe_point(Timestamp::new(1, 0));
        let watch = SafepointWatch::spawn(
            pd.clone(),
            Timestamp::new(100, 0).compose(),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );
        // The safepoint passes the snapshot after the last periodic check.
        pd.set_safe_point(Timestamp::new(500, 0));
        assert!(matches!(
            watch.finish().await,
            Err(BackupError::GcSafepointExceeded { .. })
        ));
    }
}
