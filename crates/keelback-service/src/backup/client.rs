// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The client driving one backup end to end.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use keelback_cluster_client::{
    catalog::{Catalog, TableInfo},
    pd::PlacementDriver,
    resolver::LockResolver,
    store::StoreClient,
};
use keelback_core::{
    ClusterId, TableId,
    keys::{self, hex_key},
    manifest::{BackupMeta, META_FILE, Schema},
    messages::BackupRequest,
};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;

use super::{
    BackupError, BackupMetrics,
    fine_grained::{FineGrainedContext, fine_grained_backup},
    push::push_backup,
    safepoint::SafepointWatch,
    schema::SchemaChecksums,
};
use crate::{config::BackupConfig, progress::ProgressTick, storage::ExternalStorage};

/// A client instructing the cluster's storage nodes how to back themselves
/// up, and assembling the manifest from what they report.
pub struct BackupClient {
    pd: Arc<dyn PlacementDriver>,
    stores: Arc<dyn StoreClient>,
    catalog: Arc<dyn Catalog>,
    lock_resolver: Arc<dyn LockResolver>,
    cluster_id: ClusterId,
    config: BackupConfig,
    metrics: BackupMetrics,
    cancel: CancellationToken,
    storage: Option<Box<dyn ExternalStorage>>,
    meta: BackupMeta,
    schemas: SchemaChecksums,
}

impl BackupClient {
    /// Creates a client for the cluster behind `pd`.
    ///
    /// The admin-checksum pool is sized from the current store count, and
    /// the cluster id is captured so every request can be validated against
    /// it.
    pub async fn new(
        pd: Arc<dyn PlacementDriver>,
        stores: Arc<dyn StoreClient>,
        catalog: Arc<dyn Catalog>,
        lock_resolver: Arc<dyn LockResolver>,
        config: BackupConfig,
        registry: &Registry,
    ) -> Result<Self, BackupError> {
        tracing::info!("new backup client");
        let cluster_id = pd.get_cluster_id().await?;
        let all_stores = pd.get_all_stores().await?;
        let pool_size = config.checksum_pool_size(all_stores.len());
        tracing::info!(
            cluster_id,
            stores = all_stores.len(),
            checksum_pool = pool_size,
            "cluster topology loaded",
        );
        Ok(Self {
            pd,
            stores,
            catalog,
            lock_resolver,
            cluster_id,
            config,
            metrics: BackupMetrics::new(registry),
            cancel: CancellationToken::new(),
            storage: None,
            meta: BackupMeta {
                cluster_id,
                ..BackupMeta::default()
            },
            schemas: SchemaChecksums::new(pool_size),
        })
    }

    /// Cancels all in-flight work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The manifest as assembled so far.
    pub fn meta(&self) -> &BackupMeta {
        &self.meta
    }

    pub(crate) fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    pub(crate) fn start_table_checksum(
        &mut self,
        backup_ts: u64,
        db: &str,
        table: &str,
        schema: Schema,
    ) {
        self.schemas
            .start(self.catalog.clone(), backup_ts, db, table, schema);
    }

    /// Selects the snapshot timestamp for this backup.
    ///
    /// With `time_ago`, the current timestamp is rewound by that much; a
    /// snapshot at or below the GC safepoint is rejected before any work
    /// starts.
    pub async fn backup_ts(&self, time_ago: Option<Duration>) -> Result<u64, BackupError> {
        let mut now = self.pd.get_ts().await?;
        if let Some(ago) = time_ago {
            let rewound = now.rewound(ago);
            let safe_point = self.pd.get_gc_safe_point().await?;
            if rewound.physical <= safe_point.physical {
                return Err(BackupError::Snapshot(format!(
                    "snapshot {}ms ago is not above the GC safepoint",
                    ago.as_millis(),
                )));
            }
            now = rewound;
        }
        let backup_ts = now.compose();
        tracing::info!(backup_ts, "selected snapshot timestamp");
        Ok(backup_ts)
    }

    /// Attaches the backup destination.
    ///
    /// Refuses a destination that already holds a manifest; starting over
    /// an old backup would corrupt it.
    pub async fn set_storage(
        &mut self,
        storage: Box<dyn ExternalStorage>,
    ) -> Result<(), BackupError> {
        if storage.exists(META_FILE).await? {
            return Err(BackupError::ManifestExists);
        }
        self.storage = Some(storage);
        Ok(())
    }

    /// Approximate number of regions in `[start, end)`, for sizing progress
    /// reports.
    pub async fn range_region_count(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<usize, BackupError> {
        Ok(self.pd.get_region_count(start, end).await?)
    }

    /// Backs up the planned ranges sequentially while the safepoint watch
    /// holds the snapshot.
    pub async fn backup_ranges(
        &mut self,
        ranges: Vec<keelback_core::Range>,
        path: &str,
        backup_ts: u64,
        rate_limit: u64,
        concurrency: u32,
        progress: &ProgressTick,
    ) -> Result<(), BackupError> {
        let started = Instant::now();
        let watch = SafepointWatch::spawn(
            self.pd.clone(),
            backup_ts,
            self.config.safepoint_check_interval,
            self.cancel.clone(),
        );
        let mut result = Ok(());
        for range in &ranges {
            if self.cancel.is_cancelled() {
                result = Err(BackupError::Cancelled);
                break;
            }
            if let Err(error) = self
                .backup_range(
                    &range.start,
                    &range.end,
                    path,
                    backup_ts,
                    rate_limit,
                    concurrency,
                    progress,
                )
                .await
            {
                result = Err(error);
                break;
            }
        }
        let verdict = watch.finish().await;
        tracing::info!(elapsed = ?started.elapsed(), "backup ranges finished");
        // A safepoint violation explains any pipeline failure; report it
        // first.
        verdict?;
        result
    }

    /// Backs up one key range: push down to every store, then close the
    /// remaining gaps, then drain the coverage tree into the manifest.
    pub(crate) async fn backup_range(
        &mut self,
        start: &[u8],
        end: &[u8],
        path: &str,
        backup_ts: u64,
        rate_limit: u64,
        concurrency: u32,
        progress: &ProgressTick,
    ) -> Result<(), BackupError> {
        tracing::info!(
            start_key = %hex_key(start),
            end_key = %hex_key(end),
            rate_limit,
            concurrency,
            "backup range started",
        );
        let started = Instant::now();
        let all_stores = self.pd.get_all_stores().await?;
        let request = BackupRequest {
            cluster_id: self.cluster_id,
            start_key: start.to_vec(),
            end_key: end.to_vec(),
            start_version: backup_ts,
            end_version: backup_ts,
            path: path.to_owned(),
            rate_limit,
            concurrency,
        };
        let mut tree = push_backup(
            self.stores.clone(),
            &all_stores,
            request.clone(),
            progress,
            &self.metrics,
            &self.cancel,
        )
        .await?;
        tracing::info!(completed = tree.len(), "push down finished");

        let context = FineGrainedContext {
            pd: self.pd.clone(),
            stores: self.stores.clone(),
            lock_resolver: self.lock_resolver.clone(),
            metrics: self.metrics.clone(),
            request,
            leader_lookup_attempts: self.config.leader_lookup_attempts,
            cancel: self.cancel.clone(),
        };
        fine_grained_backup(&context, &self.config, &mut tree, progress).await?;

        self.meta.start_version = backup_ts;
        self.meta.end_version = backup_ts;
        let duplicates = tree.duplicate_files();
        if !duplicates.is_empty() {
            return Err(BackupError::DuplicateFiles(duplicates));
        }
        self.meta.files.extend(tree.into_files());
        self.metrics.ranges_completed.inc();
        tracing::info!(elapsed = ?started.elapsed(), "backup range finished");
        Ok(())
    }

    /// Waits for the admin-checksum pipeline and completes the manifest's
    /// schema entries.
    pub async fn complete_meta(&mut self) -> Result<(), BackupError> {
        self.meta.schemas = self.schemas.finish().await?;
        Ok(())
    }

    /// Writes the manifest to the destination under its well-known name.
    pub async fn save_backup_meta(&mut self, path: &str) -> Result<(), BackupError> {
        self.meta.path = path.to_owned();
        let bytes = self.meta.to_bytes()?;
        tracing::info!(
            path,
            schemas = self.meta.schemas.len(),
            files = self.meta.files.len(),
            size = bytes.len(),
            "saving backup meta",
        );
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| BackupError::Config("no storage attached".to_owned()))?;
        storage.write(META_FILE, &bytes).await?;
        Ok(())
    }

    /// Verifies, per table, that the xor/sum over the backed-up files
    /// matches the catalog's admin checksum.
    ///
    /// Logs each table's verdict and returns the overall validity; a
    /// mismatch does not fail the backup.
    pub fn fast_checksum(&self) -> Result<bool, BackupError> {
        let started = Instant::now();
        let mut by_table: HashMap<TableId, (u64, u64, u64)> = HashMap::new();
        for file in &self.meta.files {
            let Some(id) = keys::decode_table_id(&file.start_key) else {
                tracing::warn!(
                    file = %file.name,
                    start_key = %hex_key(&file.start_key),
                    "file outside any table prefix",
                );
                continue;
            };
            let entry = by_table.entry(id).or_default();
            entry.0 ^= file.crc64_xor;
            entry.1 += file.total_kvs;
            entry.2 += file.total_bytes;
        }

        let mut valid = true;
        for schema in &self.meta.schemas {
            let db: keelback_cluster_client::catalog::DbInfo =
                serde_json::from_slice(&schema.db)?;
            let table: TableInfo = serde_json::from_slice(&schema.table)?;
            let (mut crc64_xor, mut total_kvs, mut total_bytes) = (0u64, 0u64, 0u64);
            for id in table_ids(&table) {
                if let Some((crc, kvs, bytes)) = by_table.get(&id) {
                    crc64_xor ^= crc;
                    total_kvs += kvs;
                    total_bytes += bytes;
                }
            }
            if schema.crc64_xor == crc64_xor
                && schema.total_kvs == total_kvs
                && schema.total_bytes == total_bytes
            {
                tracing::info!(db = %db.name, table = %table.name, "fast checksum success");
            } else {
                tracing::error!(
                    db = %db.name,
                    table = %table.name,
                    catalog_crc64 = schema.crc64_xor,
                    backup_crc64 = crc64_xor,
                    catalog_kvs = schema.total_kvs,
                    backup_kvs = total_kvs,
                    catalog_bytes = schema.total_bytes,
                    backup_bytes = total_bytes,
                    "fast checksum failed",
                );
                valid = false;
            }
        }
        tracing::info!(elapsed = ?started.elapsed(), valid, "backup checksum finished");
        Ok(valid)
    }
}

/// The table or partition ids whose row keys belong to this table.
fn table_ids(table: &TableInfo) -> Vec<TableId> {
    match &table.partitions {
        None => vec![table.id],
        Some(partitions) => partitions.iter().map(|partition| partition.id).collect(),
    }
}
