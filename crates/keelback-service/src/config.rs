// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the backup engine.

use std::time::Duration;

use keelback_utils::config::LoadConfig;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};

/// Tunables for the backup pipeline.
///
/// The defaults are what the engine is tested with; most deployments never
/// need a config file.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Width of the fine-grained retry fan-out.
    #[serde(default = "default::fine_grained_workers")]
    pub fine_grained_workers: usize,
    /// Global retry-sleep budget for closing the gaps of one range.
    #[serde_as(as = "DurationMilliSeconds")]
    #[serde(default = "default::fine_grained_max_backoff")]
    pub fine_grained_max_backoff: Duration,
    /// How often the snapshot is re-checked against the GC safepoint.
    #[serde_as(as = "DurationSeconds")]
    #[serde(default = "default::safepoint_check_interval")]
    pub safepoint_check_interval: Duration,
    /// Attempts to locate a region leader before giving up on a sub-range.
    #[serde(default = "default::leader_lookup_attempts")]
    pub leader_lookup_attempts: usize,
    /// Capacity of the bounded hand-off channels in the fine-grained path.
    #[serde(default = "default::response_channel_capacity")]
    pub response_channel_capacity: usize,
    /// Hard cap on concurrent admin-checksum tasks.
    #[serde(default = "default::checksum_pool_limit")]
    pub checksum_pool_limit: usize,
    /// Checksum tasks allowed per storage node, below the hard cap.
    #[serde(default = "default::checksum_tasks_per_store")]
    pub checksum_tasks_per_store: usize,
}

impl BackupConfig {
    /// The admin-checksum pool size for a cluster of `store_count` nodes.
    pub fn checksum_pool_size(&self, store_count: usize) -> usize {
        self.checksum_pool_limit
            .min(self.checksum_tasks_per_store * store_count)
            .max(1)
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            fine_grained_workers: default::fine_grained_workers(),
            fine_grained_max_backoff: default::fine_grained_max_backoff(),
            safepoint_check_interval: default::safepoint_check_interval(),
            leader_lookup_attempts: default::leader_lookup_attempts(),
            response_channel_capacity: default::response_channel_capacity(),
            checksum_pool_limit: default::checksum_pool_limit(),
            checksum_tasks_per_store: default::checksum_tasks_per_store(),
        }
    }
}

impl LoadConfig for BackupConfig {}

mod default {
    use std::time::Duration;

    pub(crate) fn fine_grained_workers() -> usize {
        4
    }

    pub(crate) fn fine_grained_max_backoff() -> Duration {
        Duration::from_millis(80_000)
    }

    pub(crate) fn safepoint_check_interval() -> Duration {
        Duration::from_secs(30)
    }

    pub(crate) fn leader_lookup_attempts() -> usize {
        5
    }

    pub(crate) fn response_channel_capacity() -> usize {
        4
    }

    pub(crate) fn checksum_pool_limit() -> usize {
        100
    }

    pub(crate) fn checksum_tasks_per_store() -> usize {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_an_empty_document() {
        let config: BackupConfig = serde_yaml::from_str("{}").expect("defaults apply");
        assert_eq!(config, BackupConfig::default());
        assert_eq!(config.fine_grained_workers, 4);
        assert_eq!(config.fine_grained_max_backoff, Duration::from_secs(80));
        assert_eq!(config.safepoint_check_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_apply() {
        let config: BackupConfig = serde_yaml::from_str(
            "fine_grained_workers: 8\nfine_grained_max_backoff: 5000\n",
        )
        .expect("partial overrides parse");
        assert_eq!(config.fine_grained_workers, 8);
        assert_eq!(config.fine_grained_max_backoff, Duration::from_secs(5));
        assert_eq!(config.leader_lookup_attempts, 5);
    }

    #[test]
    fn checksum_pool_scales_with_the_cluster() {
        let config = BackupConfig::default();
        assert_eq!(config.checksum_pool_size(0), 1);
        assert_eq!(config.checksum_pool_size(3), 24);
        assert_eq!(config.checksum_pool_size(50), 100);
    }
}
