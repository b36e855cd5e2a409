// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The catalog side channel.
//!
//! A backup reads the catalog twice: at plan time, to enumerate the schemas
//! visible at the snapshot and pin their auto-increment positions, and
//! during the checksum pipeline, to run an admin checksum per table under
//! the same snapshot. Both go through the [`Catalog`] trait.

use async_trait::async_trait;
use keelback_core::TableId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeError;

/// A database as recorded in the catalog.
///
/// Serialized to JSON and pinned into the manifest, so restores see the
/// database exactly as it was at the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    pub id: i64,
    pub name: String,
}

/// A table as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    /// The next unallocated auto-increment id, pinned at plan time.
    pub auto_inc_id: i64,
    /// Partition definitions, for partitioned tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<PartitionDef>>,
}

/// One partition of a partitioned table; each partition owns its own
/// row-key interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDef {
    pub id: TableId,
    pub name: String,
}

/// The result of an admin checksum over one table's snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChecksum {
    pub crc64_xor: u64,
    pub total_kvs: u64,
    pub total_bytes: u64,
}

/// Options applied when a catalog session is constructed.
///
/// Background catalog workers must stay off for the lifetime of a backup so
/// nothing writes around the pinned snapshot. These are per-session options,
/// never process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogOptions {
    pub run_ddl_worker: bool,
    pub run_stats_worker: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            run_ddl_worker: false,
            run_stats_worker: false,
        }
    }
}

/// Errors raised by catalog requests.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("schema {0} not found")]
    SchemaNotFound(String),
    #[error("table {db}.{table} not found")]
    TableNotFound { db: String, table: String },
    #[error("catalog returned malformed data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// The transactional catalog, read under a pinned snapshot timestamp.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Every database visible at the snapshot, with its tables. Includes
    /// system catalogs; planners are expected to filter them.
    async fn snapshot_databases(
        &self,
        snapshot_ts: u64,
    ) -> Result<Vec<(DbInfo, Vec<TableInfo>)>, CatalogError>;

    /// A single table at the snapshot.
    async fn snapshot_table(
        &self,
        snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<(DbInfo, TableInfo), CatalogError>;

    /// The next unallocated auto-increment id of a table.
    ///
    /// Read once at plan time; later catalog writes must not move the value
    /// a backup has already pinned.
    async fn next_global_auto_id(
        &self,
        db_id: i64,
        table_id: TableId,
    ) -> Result<i64, CatalogError>;

    /// Runs `ADMIN CHECKSUM TABLE db.table` under the snapshot timestamp.
    async fn admin_checksum(
        &self,
        snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<TableChecksum, CatalogError>;
}
