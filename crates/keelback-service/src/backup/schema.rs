// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Schema registration and the admin-checksum pipeline.
//!
//! Schemas enter the manifest in two steps: the planner registers each
//! table eagerly (with zeroed checksum fields) and starts a checksum task
//! for it; [`SchemaChecksums::finish`] joins all tasks and fills the fields
//! in. Tasks run concurrently under a pool bounded by the cluster size;
//! completion order is irrelevant, and the first failure aborts the join.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use keelback_cluster_client::catalog::{Catalog, CatalogError, TableChecksum};
use keelback_core::manifest::Schema;
use tokio::{sync::Semaphore, task::JoinSet};

use super::BackupError;

pub(crate) struct SchemaChecksums {
    schemas: BTreeMap<String, Schema>,
    pool: Arc<Semaphore>,
    tasks: JoinSet<Result<(String, TableChecksum), CatalogError>>,
}

impl SchemaChecksums {
    /// A pipeline running at most `pool_size` checksum tasks at once.
    pub fn new(pool_size: usize) -> Self {
        Self {
            schemas: BTreeMap::new(),
            pool: Arc::new(Semaphore::new(pool_size)),
            tasks: JoinSet::new(),
        }
    }

    /// Registers a schema and starts its admin checksum under the snapshot.
    pub fn start(
        &mut self,
        catalog: Arc<dyn Catalog>,
        snapshot_ts: u64,
        db: &str,
        table: &str,
        schema: Schema,
    ) {
        let name = format!("{db}.{table}");
        tracing::info!(table = %name, "admin checksum started");
        self.schemas.insert(name.clone(), schema);
        let pool = self.pool.clone();
        let db = db.to_owned();
        let table = table.to_owned();
        self.tasks.spawn(async move {
            let _permit = pool.acquire_owned().await.expect("semaphore never closed");
            let started = Instant::now();
            let checksum = catalog.admin_checksum(snapshot_ts, &db, &table).await?;
            tracing::info!(
                table = %name,
                crc64_xor = checksum.crc64_xor,
                total_kvs = checksum.total_kvs,
                total_bytes = checksum.total_bytes,
                elapsed = ?started.elapsed(),
                "admin checksum finished"
            );
            Ok((name, checksum))
        });
    }

    /// Waits for every pending checksum and returns the finalized schemas,
    /// ordered by table name. The first checksum failure aborts the join.
    pub async fn finish(&mut self) -> Result<Vec<Schema>, BackupError> {
        while let Some(joined) = self.tasks.join_next().await {
            let (name, checksum) = joined.map_err(BackupError::Join)??;
            let schema = self
                .schemas
                .get_mut(&name)
                .expect("every checksum task was registered");
            schema.crc64_xor = checksum.crc64_xor;
            schema.total_kvs = checksum.total_kvs;
            schema.total_bytes = checksum.total_bytes;
        }
        Ok(std::mem::take(&mut self.schemas).into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use keelback_cluster_client::catalog::DbInfo;

    use super::*;
    use crate::test_utils::MockCatalog;

    fn schema_for(db: &str, table: &str) -> Schema {
        Schema {
            db: serde_json::to_vec(&DbInfo {
                id: 1,
                name: db.to_owned(),
            })
            .expect("db info serializes"),
            table: format!(r#"{{"name":"{table}"}}"#).into_bytes(),
            ..Schema::default()
        }
    }

    #[tokio::test]
    async fn checksums_join_into_the_schemas() {
        let catalog = Arc::new(
            MockCatalog::default()
                .with_checksum("shop", "orders", TableChecksum {
                    crc64_xor: 0x11,
                    total_kvs: 10,
                    total_bytes: 100,
                })
                .with_checksum("shop", "users", TableChecksum {
                    crc64_xor: 0x22,
                    total_kvs: 4,
                    total_bytes: 40,
                }),
        );
        let mut pipeline = SchemaChecksums::new(8);
        pipeline.start(
            catalog.clone(),
            77,
            "shop",
            "orders",
            schema_for("shop", "orders"),
        );
        pipeline.start(
            catalog.clone(),
            77,
            "shop",
            "users",
            schema_for("shop", "users"),
        );
        let schemas = pipeline.finish().await.expect("all checksums succeed");
        assert_eq!(schemas.len(), 2);
        // Ordered by table name: shop.orders before shop.users.
        assert_eq!(schemas[0].crc64_xor, 0x11);
        assert_eq!(schemas[1].total_bytes, 40);
    }

    #[tokio::test]
    async fn first_checksum_failure_aborts_the_join() {
        let catalog = Arc::new(MockCatalog::default().with_failing_checksums());
        let mut pipeline = SchemaChecksums::new(8);
        pipeline.start(catalog, 77, "shop", "orders", schema_for("shop", "orders"));
        assert!(matches!(
            pipeline.finish().await,
            Err(BackupError::Plan(_))
        ));
    }

    #[tokio::test]
    async fn empty_pipeline_finishes_with_no_schemas() {
        let mut pipeline = SchemaChecksums::new(1);
        assert!(pipeline.finish().await.expect("nothing to join").is_empty());
    }
}
