// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scripted cluster collaborators for exercising the backup pipeline in
//! tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use keelback_cluster_client::{
    NodeError,
    catalog::{Catalog, CatalogError, CatalogOptions, DbInfo, TableChecksum, TableInfo},
    pd::{PdError, PlacementDriver},
    resolver::LockResolver,
    store::{BackupResponseStream, StoreClient},
    types::{Lock, Peer, Region, RegionEpoch, Store},
};
use keelback_core::{
    ClusterId, StoreId, TableId, Timestamp,
    keys::encode_bytes,
    manifest::File,
    messages::{BackupRequest, BackupResponse},
};

use crate::storage::{ExternalStorage, StorageError};

/// A store listening on a test address.
pub fn test_store(id: StoreId) -> Store {
    Store {
        id,
        address: format!("store-{id}.test:20160"),
    }
}

/// A region over raw boundary keys (encoded internally, the way the
/// placement driver stores them); `leader_store` picks the leader replica.
pub fn test_region(
    id: u64,
    start: &[u8],
    end: &[u8],
    leader_store: Option<StoreId>,
) -> (Region, Option<Peer>) {
    let leader = leader_store.map(|store_id| Peer {
        id: id * 100 + store_id,
        store_id,
    });
    let region = Region {
        id,
        start_key: if start.is_empty() {
            Vec::new()
        } else {
            encode_bytes(start)
        },
        end_key: if end.is_empty() {
            Vec::new()
        } else {
            encode_bytes(end)
        },
        epoch: RegionEpoch::default(),
        peers: leader.into_iter().collect(),
    };
    (region, leader)
}

/// A clean response covering `[start, end)` with one zeroed file per name.
pub fn clean_response(start: &[u8], end: &[u8], file_names: &[&str]) -> BackupResponse {
    BackupResponse {
        error: None,
        start_key: start.to_vec(),
        end_key: end.to_vec(),
        files: file_names
            .iter()
            .map(|name| File {
                name: (*name).to_owned(),
                start_key: start.to_vec(),
                end_key: end.to_vec(),
                ..File::default()
            })
            .collect(),
    }
}

/// A plain table definition for catalog fixtures.
pub fn table(id: TableId, name: &str) -> TableInfo {
    TableInfo {
        id,
        name: name.to_owned(),
        auto_inc_id: 0,
        partitions: None,
    }
}

/// A placement driver over a fixed, scriptable topology.
#[derive(Debug)]
pub struct MockPlacementDriver {
    cluster_id: ClusterId,
    stores: Mutex<Vec<Store>>,
    regions: Mutex<Vec<(Region, Option<Peer>)>>,
    now: Mutex<Timestamp>,
    safe_point: Mutex<Timestamp>,
    fail_safepoint_lookups: AtomicBool,
}

impl Default for MockPlacementDriver {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            stores: Mutex::new(vec![test_store(1)]),
            regions: Mutex::new(Vec::new()),
            now: Mutex::new(Timestamp::new(100_000, 0)),
            safe_point: Mutex::new(Timestamp::default()),
            fail_safepoint_lookups: AtomicBool::new(false),
        }
    }
}

impl MockPlacementDriver {
    /// Replaces the registered stores.
    pub fn set_stores(&self, stores: Vec<Store>) {
        *self.stores.lock().expect("mutex is not poisoned") = stores;
    }

    /// Registers a region (and its leader) for routing.
    pub fn add_region(&self, region: (Region, Option<Peer>)) {
        self.regions.lock().expect("mutex is not poisoned").push(region);
    }

    /// Sets the timestamp returned by `get_ts`.
    pub fn set_now(&self, now: Timestamp) {
        *self.now.lock().expect("mutex is not poisoned") = now;
    }

    /// Moves the GC safepoint.
    pub fn set_safe_point(&self, safe_point: Timestamp) {
        *self.safe_point.lock().expect("mutex is not poisoned") = safe_point;
    }

    /// Makes safepoint lookups fail until called again with `false`.
    pub fn fail_safepoint_lookups(&self, fail: bool) {
        self.fail_safepoint_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlacementDriver for MockPlacementDriver {
    async fn get_ts(&self) -> Result<Timestamp, PdError> {
        Ok(*self.now.lock().expect("mutex is not poisoned"))
    }

    async fn get_all_stores(&self) -> Result<Vec<Store>, PdError> {
        Ok(self.stores.lock().expect("mutex is not poisoned").clone())
    }

    async fn get_region(&self, key: &[u8]) -> Result<(Region, Option<Peer>), PdError> {
        let regions = self.regions.lock().expect("mutex is not poisoned");
        regions
            .iter()
            .find(|(region, _)| {
                (region.start_key.is_empty() || region.start_key.as_slice() <= key)
                    && (region.end_key.is_empty() || key < region.end_key.as_slice())
            })
            .cloned()
            .ok_or_else(|| PdError::unavailable("no region for key"))
    }

    async fn get_gc_safe_point(&self) -> Result<Timestamp, PdError> {
        if self.fail_safepoint_lookups.load(Ordering::SeqCst) {
            return Err(PdError::unavailable("safepoint lookup failed"));
        }
        Ok(*self.safe_point.lock().expect("mutex is not poisoned"))
    }

    async fn get_cluster_id(&self) -> Result<ClusterId, PdError> {
        Ok(self.cluster_id)
    }

    async fn get_region_count(&self, _start: &[u8], _end: &[u8]) -> Result<usize, PdError> {
        Ok(self
            .regions
            .lock()
            .expect("mutex is not poisoned")
            .len()
            .max(1))
    }
}

type ResponseScript = Vec<Result<BackupResponse, NodeError>>;

/// A store client answering each request from per-store scripts.
///
/// Every call pops the next script for the addressed store; a store with no
/// remaining script streams nothing. All requests are recorded for
/// assertions.
#[derive(Debug, Default)]
pub struct MockStoreClient {
    scripts: Mutex<HashMap<StoreId, VecDeque<ResponseScript>>>,
    requests: Mutex<Vec<(StoreId, BackupRequest)>>,
}

impl MockStoreClient {
    /// Queues the frames the store answers its next request with.
    pub fn script(&self, store_id: StoreId, frames: ResponseScript) {
        self.scripts
            .lock()
            .expect("mutex is not poisoned")
            .entry(store_id)
            .or_default()
            .push_back(frames);
    }

    /// Every request observed so far, in arrival order.
    pub fn requests(&self) -> Vec<(StoreId, BackupRequest)> {
        self.requests.lock().expect("mutex is not poisoned").clone()
    }
}

#[async_trait]
impl StoreClient for MockStoreClient {
    async fn backup(
        &self,
        store_id: StoreId,
        request: BackupRequest,
    ) -> Result<BackupResponseStream, NodeError> {
        self.requests
            .lock()
            .expect("mutex is not poisoned")
            .push((store_id, request));
        let frames = self
            .scripts
            .lock()
            .expect("mutex is not poisoned")
            .get_mut(&store_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(futures::stream::iter(frames).boxed())
    }
}

/// A catalog over fixed snapshot contents.
#[derive(Debug, Default)]
pub struct MockCatalog {
    options: CatalogOptions,
    databases: Vec<(DbInfo, Vec<TableInfo>)>,
    checksums: HashMap<(String, String), TableChecksum>,
    auto_ids: HashMap<TableId, i64>,
    failing_checksums: bool,
}

impl MockCatalog {
    /// The session options this catalog was constructed with.
    pub fn options(&self) -> CatalogOptions {
        self.options
    }

    /// Adds a database and its tables to the snapshot.
    pub fn with_database(mut self, name: &str, id: i64, tables: Vec<TableInfo>) -> Self {
        self.databases.push((
            DbInfo {
                id,
                name: name.to_owned(),
            },
            tables,
        ));
        self
    }

    /// Sets the admin checksum reported for a table.
    pub fn with_checksum(mut self, db: &str, table: &str, checksum: TableChecksum) -> Self {
        self.checksums
            .insert((db.to_owned(), table.to_owned()), checksum);
        self
    }

    /// Sets the next auto-increment id reported for a table.
    pub fn with_auto_id(mut self, table_id: TableId, next: i64) -> Self {
        self.auto_ids.insert(table_id, next);
        self
    }

    /// Makes every admin checksum fail.
    pub fn with_failing_checksums(mut self) -> Self {
        self.failing_checksums = true;
        self
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn snapshot_databases(
        &self,
        _snapshot_ts: u64,
    ) -> Result<Vec<(DbInfo, Vec<TableInfo>)>, CatalogError> {
        Ok(self.databases.clone())
    }

    async fn snapshot_table(
        &self,
        _snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<(DbInfo, TableInfo), CatalogError> {
        let (db_info, tables) = self
            .databases
            .iter()
            .find(|(db_info, _)| db_info.name == db)
            .ok_or_else(|| CatalogError::SchemaNotFound(db.to_owned()))?;
        let table_info = tables
            .iter()
            .find(|table_info| table_info.name == table)
            .ok_or_else(|| CatalogError::TableNotFound {
                db: db.to_owned(),
                table: table.to_owned(),
            })?;
        Ok((db_info.clone(), table_info.clone()))
    }

    async fn next_global_auto_id(
        &self,
        _db_id: i64,
        table_id: TableId,
    ) -> Result<i64, CatalogError> {
        Ok(self.auto_ids.get(&table_id).copied().unwrap_or(1))
    }

    async fn admin_checksum(
        &self,
        _snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<TableChecksum, CatalogError> {
        if self.failing_checksums {
            return Err(CatalogError::Malformed(
                "checksum rows unavailable".to_owned(),
            ));
        }
        Ok(self
            .checksums
            .get(&(db.to_owned(), table.to_owned()))
            .copied()
            .unwrap_or_default())
    }
}

/// A lock resolver answering from a queue of expiry hints.
///
/// An empty queue means every lock resolves cleanly (`0`). Resolved locks
/// are recorded for assertions.
#[derive(Debug, Default)]
pub struct MockLockResolver {
    expirations: Mutex<VecDeque<u64>>,
    resolved: Mutex<Vec<Lock>>,
}

impl MockLockResolver {
    /// A resolver whose calls report the given expiry hints in order.
    pub fn with_expirations(expirations: impl IntoIterator<Item = u64>) -> Self {
        Self {
            expirations: Mutex::new(expirations.into_iter().collect()),
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Every lock this resolver was asked to clean.
    pub fn resolved(&self) -> Vec<Lock> {
        self.resolved.lock().expect("mutex is not poisoned").clone()
    }
}

#[async_trait]
impl LockResolver for MockLockResolver {
    async fn resolve_locks(&self, locks: &[Lock]) -> Result<u64, NodeError> {
        self.resolved
            .lock()
            .expect("mutex is not poisoned")
            .extend(locks.iter().cloned());
        Ok(self
            .expirations
            .lock()
            .expect("mutex is not poisoned")
            .pop_front()
            .unwrap_or(0))
    }
}

/// In-memory external storage; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    /// Seeds an object, bypassing the storage trait.
    pub fn insert(&self, name: &str, contents: &[u8]) {
        self.objects
            .lock()
            .expect("mutex is not poisoned")
            .insert(name.to_owned(), contents.to_vec());
    }

    /// Reads an object back, if present.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("mutex is not poisoned")
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ExternalStorage for MemStorage {
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self
            .objects
            .lock()
            .expect("mutex is not poisoned")
            .contains_key(name))
    }

    async fn write(&self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        self.insert(name, contents);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.get(name).ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no object named {name}"),
            ))
        })
    }
}

/// A full set of mock collaborators wired together.
#[derive(Debug, Default)]
pub struct MockCluster {
    pub pd: Arc<MockPlacementDriver>,
    pub stores: Arc<MockStoreClient>,
    pub catalog: Arc<MockCatalog>,
    pub lock_resolver: Arc<MockLockResolver>,
}

impl MockCluster {
    /// Replaces the catalog fixture.
    pub fn with_catalog(mut self, catalog: MockCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Replaces the lock resolver.
    pub fn with_lock_resolver(mut self, lock_resolver: MockLockResolver) -> Self {
        self.lock_resolver = Arc::new(lock_resolver);
        self
    }

    /// The placement driver as the engine sees it.
    pub fn pd(&self) -> Arc<dyn PlacementDriver> {
        self.pd.clone()
    }

    /// The store client as the engine sees it.
    pub fn stores(&self) -> Arc<dyn StoreClient> {
        self.stores.clone()
    }

    /// The catalog as the engine sees it.
    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    /// The lock resolver as the engine sees it.
    pub fn lock_resolver(&self) -> Arc<dyn LockResolver> {
        self.lock_resolver.clone()
    }
}
