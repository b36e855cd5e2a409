// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Range planning from the catalog snapshot.
//!
//! Planning pins everything a restore will need: the JSON-encoded db and
//! table payloads (with the auto-increment position read exactly once) go
//! into the manifest via the checksum pipeline, and each table or partition
//! id becomes one half-open row-key range for the backup to cover.

use keelback_cluster_client::catalog::{DbInfo, TableInfo};
use keelback_core::{Range, keys, manifest::Schema};

use super::{BackupError, client::BackupClient};

/// System catalogs are never part of a backup.
const SYSTEM_DATABASES: [&str; 3] = ["information_schema", "performance_schema", "mysql"];

impl BackupClient {
    /// Plans ranges for every user table visible at the snapshot and starts
    /// their admin checksums.
    pub async fn plan_all_tables(&mut self, backup_ts: u64) -> Result<Vec<Range>, BackupError> {
        let databases = self.catalog().snapshot_databases(backup_ts).await?;
        let mut ranges = Vec::new();
        for (db, tables) in databases {
            if SYSTEM_DATABASES.contains(&db.name.as_str()) {
                continue;
            }
            let db_data = serde_json::to_vec(&db)?;
            for mut table in tables {
                self.register_table(&db, &mut table, &db_data, backup_ts)
                    .await?;
                append_table_ranges(&table, &mut ranges);
            }
        }
        Ok(ranges)
    }

    /// Plans ranges for a single table and starts its admin checksum.
    pub async fn plan_table(
        &mut self,
        db_name: &str,
        table_name: &str,
        backup_ts: u64,
    ) -> Result<Vec<Range>, BackupError> {
        let (db, mut table) = self
            .catalog()
            .snapshot_table(backup_ts, db_name, table_name)
            .await?;
        let db_data = serde_json::to_vec(&db)?;
        self.register_table(&db, &mut table, &db_data, backup_ts)
            .await?;
        let mut ranges = Vec::new();
        append_table_ranges(&table, &mut ranges);
        Ok(ranges)
    }

    async fn register_table(
        &mut self,
        db: &DbInfo,
        table: &mut TableInfo,
        db_data: &[u8],
        backup_ts: u64,
    ) -> Result<(), BackupError> {
        // Pinned once here; later catalog writes must not move it.
        let auto_inc_id = self.catalog().next_global_auto_id(db.id, table.id).await?;
        table.auto_inc_id = auto_inc_id;
        let table_data = serde_json::to_vec(&table)?;
        tracing::info!(
            db = %db.name,
            table = %table.name,
            auto_inc_id,
            "saving table schema",
        );
        let schema = Schema {
            db: db_data.to_vec(),
            table: table_data,
            ..Schema::default()
        };
        self.start_table_checksum(backup_ts, &db.name, &table.name, schema);
        Ok(())
    }
}

fn append_table_ranges(table: &TableInfo, ranges: &mut Vec<Range>) {
    match &table.partitions {
        None => ranges.push(range_of(table.id)),
        Some(partitions) => {
            for partition in partitions {
                ranges.push(range_of(partition.id));
            }
        }
    }
}

fn range_of(id: i64) -> Range {
    let (start, end) = keys::table_range(id);
    Range::new(start, end)
}

#[cfg(test)]
mod tests {
    use keelback_cluster_client::catalog::{PartitionDef, TableChecksum};
    use prometheus::Registry;

    use super::*;
    use crate::{
        config::BackupConfig,
        test_utils::{MockCatalog, MockCluster, table},
    };

    async fn client_with_catalog(catalog: MockCatalog) -> BackupClient {
        let cluster = MockCluster::default().with_catalog(catalog);
        BackupClient::new(
            cluster.pd(),
            cluster.stores(),
            cluster.catalog(),
            cluster.lock_resolver(),
            BackupConfig::default(),
            &Registry::new(),
        )
        .await
        .expect("client construction succeeds")
    }

    #[tokio::test]
    async fn plans_skip_system_databases() {
        let catalog = MockCatalog::default()
            .with_database("mysql", 1, vec![table(10, "gc_config")])
            .with_database("shop", 2, vec![table(100, "orders")]);
        let mut client = client_with_catalog(catalog).await;
        let ranges = client.plan_all_tables(4 << 18).await.expect("plan succeeds");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, keys::table_prefix(100));
        assert_eq!(ranges[0].end, keys::table_prefix(101));
    }

    #[tokio::test]
    async fn partitioned_tables_plan_one_range_per_partition() {
        let mut partitioned = table(20, "events");
        partitioned.partitions = Some(vec![
            PartitionDef {
                id: 200,
                name: "p1".to_owned(),
            },
            PartitionDef {
                id: 201,
                name: "p2".to_owned(),
            },
        ]);
        let catalog = MockCatalog::default().with_database("shop", 2, vec![partitioned]);
        let mut client = client_with_catalog(catalog).await;
        let ranges = client.plan_all_tables(4 << 18).await.expect("plan succeeds");
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start, keys::table_prefix(200));
        assert_eq!(ranges[0].end, keys::table_prefix(201));
        assert_eq!(ranges[1].start, keys::table_prefix(201));
        assert_eq!(ranges[1].end, keys::table_prefix(202));
    }

    #[tokio::test]
    async fn auto_increment_position_is_pinned_into_the_payload() {
        let catalog = MockCatalog::default()
            .with_database("shop", 2, vec![table(100, "orders")])
            .with_auto_id(100, 55)
            .with_checksum("shop", "orders", TableChecksum::default());
        let mut client = client_with_catalog(catalog).await;
        client.plan_all_tables(4 << 18).await.expect("plan succeeds");
        client.complete_meta().await.expect("checksums join");
        let schema = &client.meta().schemas[0];
        let pinned: TableInfo =
            serde_json::from_slice(&schema.table).expect("payload is valid JSON");
        assert_eq!(pinned.auto_inc_id, 55);
    }

    #[tokio::test]
    async fn missing_table_is_a_snapshot_error() {
        let catalog = MockCatalog::default().with_database("shop", 2, vec![table(100, "orders")]);
        let mut client = client_with_catalog(catalog).await;
        let missing = client.plan_table("shop", "absent", 4 << 18).await;
        assert!(matches!(missing, Err(BackupError::Snapshot(_))));
        let missing_db = client.plan_table("absent", "orders", 4 << 18).await;
        assert!(matches!(missing_db, Err(BackupError::Snapshot(_))));
    }

    #[tokio::test]
    async fn single_table_plan_registers_its_checksum() {
        let catalog = MockCatalog::default()
            .with_database("shop", 2, vec![table(100, "orders")])
            .with_checksum("shop", "orders", TableChecksum {
                crc64_xor: 0x11,
                total_kvs: 10,
                total_bytes: 100,
            });
        let mut client = client_with_catalog(catalog).await;
        let ranges = client
            .plan_table("shop", "orders", 4 << 18)
            .await
            .expect("plan succeeds");
        assert_eq!(ranges.len(), 1);
        client.complete_meta().await.expect("checksums join");
        assert_eq!(client.meta().schemas[0].crc64_xor, 0x11);
    }
}
