// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus counters published by the backup pipeline.

use prometheus::{IntCounter, Opts, Registry};

const NAMESPACE: &str = "keelback";

/// Counters tracking one backup client's work.
#[derive(Debug, Clone)]
pub struct BackupMetrics {
    /// Key ranges driven to full coverage.
    pub ranges_completed: IntCounter,
    /// Streamed responses accepted into the coverage tree.
    pub responses_accepted: IntCounter,
    /// Files recorded for the manifest.
    pub files_collected: IntCounter,
    /// Iterations of the fine-grained retry loop.
    pub fine_grained_rounds: IntCounter,
    /// Snapshot reads blocked by a transaction lock.
    pub lock_conflicts: IntCounter,
    /// Milliseconds spent sleeping between retries.
    pub retry_sleep_ms: IntCounter,
}

impl BackupMetrics {
    /// Creates the counters and registers them with `registry`.
    pub fn new(registry: &Registry) -> Self {
        let counter = |name: &str, help: &str| {
            let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
                .expect("metrics defined at compile time must be valid");
            registry
                .register(Box::new(counter.clone()))
                .expect("metrics are registered exactly once per registry");
            counter
        };
        Self {
            ranges_completed: counter(
                "ranges_completed",
                "Key ranges driven to full coverage",
            ),
            responses_accepted: counter(
                "responses_accepted",
                "Streamed responses accepted into the coverage tree",
            ),
            files_collected: counter("files_collected", "Files recorded for the manifest"),
            fine_grained_rounds: counter(
                "fine_grained_rounds",
                "Iterations of the fine-grained retry loop",
            ),
            lock_conflicts: counter(
                "lock_conflicts",
                "Snapshot reads blocked by a transaction lock",
            ),
            retry_sleep_ms: counter(
                "retry_sleep_ms",
                "Milliseconds spent sleeping between retries",
            ),
        }
    }
}
