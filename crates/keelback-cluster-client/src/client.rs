// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST implementations of the collaborator traits.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use keelback_core::{
    ClusterId, StoreId, Timestamp, keys,
    messages::{BackupRequest, BackupResponse},
};
use reqwest::{Client as ReqwestClient, Url, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_util::{
    codec::{FramedRead, LengthDelimitedCodec},
    io::StreamReader,
};

use crate::{
    ClientBuildError, NodeError,
    catalog::{Catalog, CatalogError, CatalogOptions, DbInfo, TableChecksum, TableInfo},
    pd::{PdError, PlacementDriver},
    resolver::LockResolver,
    store::{BackupResponseStream, StoreClient},
    types::{Lock, Peer, Region, Store},
};

const OCTET_STREAM: &str = "application/octet-stream";

/// Total timeout for unary requests. Streaming requests only bound the
/// connection setup, never the stream itself.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn parse_base_url(base: &str) -> Result<Url, ClientBuildError> {
    let with_scheme = if base.contains("://") {
        base.to_owned()
    } else {
        format!("http://{base}")
    };
    Url::parse(&with_scheme).map_err(|error| ClientBuildError::invalid_url(base, error))
}

async fn get_json<T: DeserializeOwned>(
    client: &ReqwestClient,
    url: Url,
) -> Result<T, NodeError> {
    let response = client.get(url).send().await.map_err(NodeError::reqwest)?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(NodeError::status(status.as_u16(), message));
    }
    response.json().await.map_err(NodeError::reqwest)
}

#[derive(Debug, Clone)]
struct PdEndpoints(Url);

impl PdEndpoints {
    fn join(&self, path: &str) -> Url {
        self.0.join(path).expect("paths are valid relative urls")
    }

    fn timestamp(&self) -> Url {
        self.join("pd/v1/timestamp")
    }

    fn stores(&self) -> Url {
        self.join("pd/v1/stores")
    }

    fn region(&self, key: &[u8]) -> Url {
        let mut url = self.join("pd/v1/region");
        url.query_pairs_mut().append_pair("key", &hex::encode(key));
        url
    }

    fn gc_safe_point(&self) -> Url {
        self.join("pd/v1/gc/safepoint")
    }

    fn cluster(&self) -> Url {
        self.join("pd/v1/cluster")
    }

    fn region_count(&self, start: &[u8], end: &[u8]) -> Url {
        let mut url = self.join("pd/v1/regions/count");
        url.query_pairs_mut()
            .append_pair("start_key", &hex::encode(start))
            .append_pair("end_key", &hex::encode(end));
        url
    }
}

#[derive(Debug, Deserialize)]
struct RegionInfo {
    region: Region,
    leader: Option<Peer>,
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    id: ClusterId,
}

#[derive(Debug, Deserialize)]
struct RegionCount {
    count: usize,
}

/// Placement-driver client over its REST API.
#[derive(Debug, Clone)]
pub struct HttpPlacementDriver {
    inner: ReqwestClient,
    endpoints: PdEndpoints,
}

impl HttpPlacementDriver {
    /// Creates a client for the placement driver at `base`.
    pub fn new(base: &str) -> Result<Self, ClientBuildError> {
        let inner = ReqwestClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            inner,
            endpoints: PdEndpoints(parse_base_url(base)?),
        })
    }
}

#[async_trait]
impl PlacementDriver for HttpPlacementDriver {
    async fn get_ts(&self) -> Result<Timestamp, PdError> {
        Ok(get_json(&self.inner, self.endpoints.timestamp()).await?)
    }

    async fn get_all_stores(&self) -> Result<Vec<Store>, PdError> {
        Ok(get_json(&self.inner, self.endpoints.stores()).await?)
    }

    async fn get_region(&self, key: &[u8]) -> Result<(Region, Option<Peer>), PdError> {
        let info: RegionInfo = get_json(&self.inner, self.endpoints.region(key)).await?;
        Ok((info.region, info.leader))
    }

    async fn get_gc_safe_point(&self) -> Result<Timestamp, PdError> {
        Ok(get_json(&self.inner, self.endpoints.gc_safe_point()).await?)
    }

    async fn get_cluster_id(&self) -> Result<ClusterId, PdError> {
        let info: ClusterInfo = get_json(&self.inner, self.endpoints.cluster()).await?;
        Ok(info.id)
    }

    async fn get_region_count(&self, start: &[u8], end: &[u8]) -> Result<usize, PdError> {
        let counted: RegionCount =
            get_json(&self.inner, self.endpoints.region_count(start, end)).await?;
        Ok(counted.count)
    }
}

#[derive(Debug, Clone)]
struct StoreEndpoints(Url);

impl StoreEndpoints {
    fn backup(&self) -> Url {
        self.0.join("v1/backup").expect("path is a valid relative url")
    }

    fn resolve_locks(&self) -> Url {
        self.0
            .join("v1/locks/resolve")
            .expect("path is a valid relative url")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ResolveLocksRequest {
    locks: Vec<Lock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResolveLocksResponse {
    ms_before_expired: u64,
}

/// Storage-node backup client, addressing nodes by store id.
#[derive(Debug, Clone)]
pub struct HttpStoreClient {
    inner: ReqwestClient,
    endpoints: HashMap<StoreId, StoreEndpoints>,
}

impl HttpStoreClient {
    /// Creates a client for the given stores.
    ///
    /// Backup streams are long-lived, so only the connection setup is
    /// bounded by a timeout.
    pub fn new(stores: &[Store]) -> Result<Self, ClientBuildError> {
        let inner = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let endpoints = stores
            .iter()
            .map(|store| {
                Ok((store.id, StoreEndpoints(parse_base_url(&store.address)?)))
            })
            .collect::<Result<_, ClientBuildError>>()?;
        Ok(Self { inner, endpoints })
    }

    fn endpoints(&self, store_id: StoreId) -> Result<&StoreEndpoints, NodeError> {
        self.endpoints
            .get(&store_id)
            .ok_or_else(|| NodeError::unknown_store(store_id))
    }

    /// Asks one store to resolve the given locks.
    pub async fn resolve_locks_on(
        &self,
        store_id: StoreId,
        locks: &[Lock],
    ) -> Result<u64, NodeError> {
        let url = self.endpoints(store_id)?.resolve_locks();
        let body = bcs::to_bytes(&ResolveLocksRequest {
            locks: locks.to_vec(),
        })
        .map_err(NodeError::bcs)?;
        let response = self
            .inner
            .post(url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(NodeError::reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NodeError::status(status.as_u16(), message));
        }
        let bytes = response.bytes().await.map_err(NodeError::reqwest)?;
        let decoded: ResolveLocksResponse = bcs::from_bytes(&bytes).map_err(NodeError::bcs)?;
        Ok(decoded.ms_before_expired)
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn backup(
        &self,
        store_id: StoreId,
        request: BackupRequest,
    ) -> Result<BackupResponseStream, NodeError> {
        let url = self.endpoints(store_id)?.backup();
        let body = bcs::to_bytes(&request).map_err(NodeError::bcs)?;
        let response = self
            .inner
            .post(url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await
            .map_err(NodeError::reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NodeError::status(status.as_u16(), message));
        }
        tracing::debug!(store_id, "backup stream established");

        // The node streams length-delimited bcs frames, one per response.
        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        let frames = FramedRead::new(StreamReader::new(bytes), LengthDelimitedCodec::new());
        let responses = frames.map(|frame| {
            let frame = frame.map_err(NodeError::io)?;
            bcs::from_bytes::<BackupResponse>(&frame).map_err(NodeError::bcs)
        });
        Ok(responses.boxed())
    }
}

#[derive(Debug, Clone)]
struct CatalogEndpoints(Url);

impl CatalogEndpoints {
    fn join(&self, path: &str) -> Url {
        self.0.join(path).expect("paths are valid relative urls")
    }

    fn databases(&self, snapshot_ts: u64, options: &CatalogOptions) -> Url {
        let mut url = self.join("v1/catalog/databases");
        Self::session_query(&mut url, snapshot_ts, options);
        url
    }

    fn table(&self, snapshot_ts: u64, db: &str, table: &str, options: &CatalogOptions) -> Url {
        let mut url = self.join(&format!("v1/catalog/databases/{db}/tables/{table}"));
        Self::session_query(&mut url, snapshot_ts, options);
        url
    }

    fn auto_id(&self, db_id: i64, table_id: i64) -> Url {
        let mut url = self.join("v1/catalog/auto-id");
        url.query_pairs_mut()
            .append_pair("db", &db_id.to_string())
            .append_pair("table", &table_id.to_string());
        url
    }

    fn checksum(&self, snapshot_ts: u64, db: &str, table: &str) -> Url {
        let mut url = self.join("v1/catalog/checksum");
        url.query_pairs_mut()
            .append_pair("snapshot", &snapshot_ts.to_string())
            .append_pair("db", db)
            .append_pair("table", table);
        url
    }

    fn session_query(url: &mut Url, snapshot_ts: u64, options: &CatalogOptions) {
        url.query_pairs_mut()
            .append_pair("snapshot", &snapshot_ts.to_string())
            .append_pair("ddl_worker", &options.run_ddl_worker.to_string())
            .append_pair("stats_worker", &options.run_stats_worker.to_string());
    }
}

#[derive(Debug, Deserialize)]
struct DatabaseSnapshot {
    db: DbInfo,
    tables: Vec<TableInfo>,
}

#[derive(Debug, Deserialize)]
struct TableSnapshot {
    db: DbInfo,
    table: TableInfo,
}

#[derive(Debug, Deserialize)]
struct AutoId {
    next: i64,
}

/// Catalog client over the SQL gateway's REST facade.
///
/// Every request carries the session options, so the gateway constructs its
/// catalog sessions with the backup's background workers disabled.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    inner: ReqwestClient,
    endpoints: CatalogEndpoints,
    options: CatalogOptions,
}

impl HttpCatalog {
    /// Creates a catalog client for the SQL gateway at `base`.
    pub fn new(base: &str, options: CatalogOptions) -> Result<Self, ClientBuildError> {
        let inner = ReqwestClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            inner,
            endpoints: CatalogEndpoints(parse_base_url(base)?),
            options,
        })
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn snapshot_databases(
        &self,
        snapshot_ts: u64,
    ) -> Result<Vec<(DbInfo, Vec<TableInfo>)>, CatalogError> {
        let url = self.endpoints.databases(snapshot_ts, &self.options);
        let databases: Vec<DatabaseSnapshot> = get_json(&self.inner, url).await?;
        Ok(databases
            .into_iter()
            .map(|snapshot| (snapshot.db, snapshot.tables))
            .collect())
    }

    async fn snapshot_table(
        &self,
        snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<(DbInfo, TableInfo), CatalogError> {
        let url = self.endpoints.table(snapshot_ts, db, table, &self.options);
        let snapshot: TableSnapshot = get_json(&self.inner, url).await.map_err(|error| {
            if error.http_status_code() == Some(reqwest::StatusCode::NOT_FOUND) {
                CatalogError::TableNotFound {
                    db: db.to_owned(),
                    table: table.to_owned(),
                }
            } else {
                error.into()
            }
        })?;
        Ok((snapshot.db, snapshot.table))
    }

    async fn next_global_auto_id(
        &self,
        db_id: i64,
        table_id: i64,
    ) -> Result<i64, CatalogError> {
        let url = self.endpoints.auto_id(db_id, table_id);
        let allocated: AutoId = get_json(&self.inner, url).await?;
        Ok(allocated.next)
    }

    async fn admin_checksum(
        &self,
        snapshot_ts: u64,
        db: &str,
        table: &str,
    ) -> Result<TableChecksum, CatalogError> {
        let url = self.endpoints.checksum(snapshot_ts, db, table);
        Ok(get_json(&self.inner, url).await?)
    }
}

/// Resolves locks by routing each lock's primary key to its region leader
/// and asking that store to clean it.
pub struct ClusterLockResolver {
    pd: Arc<dyn PlacementDriver>,
    stores: Arc<HttpStoreClient>,
}

impl ClusterLockResolver {
    /// Creates a resolver over the given placement driver and store client.
    pub fn new(pd: Arc<dyn PlacementDriver>, stores: Arc<HttpStoreClient>) -> Self {
        Self { pd, stores }
    }
}

#[async_trait]
impl LockResolver for ClusterLockResolver {
    async fn resolve_locks(&self, locks: &[Lock]) -> Result<u64, NodeError> {
        let mut earliest_expiry = 0u64;
        for lock in locks {
            let encoded = keys::encode_bytes(&lock.primary);
            let leader = match self.pd.get_region(&encoded).await {
                Ok((_, leader)) => leader,
                Err(error) => return Err(NodeError::other(error)),
            };
            let ms_before_expired = match leader {
                Some(leader) => {
                    self.stores
                        .resolve_locks_on(leader.store_id, std::slice::from_ref(lock))
                        .await?
                }
                // Without a leader the lock cannot be cleaned now; it will
                // expire on its own.
                None => lock.ttl,
            };
            if ms_before_expired > 0
                && (earliest_expiry == 0 || ms_before_expired < earliest_expiry)
            {
                earliest_expiry = ms_before_expired;
            }
        }
        Ok(earliest_expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pd_endpoints() -> keelback_test_utils::Result {
        let endpoints = PdEndpoints(parse_base_url("127.0.0.1:2379")?);
        assert_eq!(
            endpoints.timestamp().as_str(),
            "http://127.0.0.1:2379/pd/v1/timestamp"
        );
        assert_eq!(
            endpoints.region(b"\x01\x02").as_str(),
            "http://127.0.0.1:2379/pd/v1/region?key=0102"
        );
        assert_eq!(
            endpoints.region_count(b"", b"\xff").as_str(),
            "http://127.0.0.1:2379/pd/v1/regions/count?start_key=&end_key=ff"
        );
        Ok(())
    }

    #[test]
    fn store_endpoints() -> keelback_test_utils::Result {
        let endpoints = StoreEndpoints(parse_base_url("https://node-1:20160")?);
        assert_eq!(
            endpoints.backup().as_str(),
            "https://node-1:20160/v1/backup"
        );
        assert_eq!(
            endpoints.resolve_locks().as_str(),
            "https://node-1:20160/v1/locks/resolve"
        );
        Ok(())
    }

    #[test]
    fn catalog_endpoints_carry_the_session_options() -> keelback_test_utils::Result {
        let endpoints = CatalogEndpoints(parse_base_url("gateway:4000")?);
        assert_eq!(
            endpoints.databases(99, &CatalogOptions::default()).as_str(),
            "http://gateway:4000/v1/catalog/databases\
             ?snapshot=99&ddl_worker=false&stats_worker=false"
        );
        assert_eq!(
            endpoints.checksum(99, "shop", "orders").as_str(),
            "http://gateway:4000/v1/catalog/checksum?snapshot=99&db=shop&table=orders"
        );
        Ok(())
    }

    #[test]
    fn base_url_requires_a_parsable_address() {
        assert!(parse_base_url("127.0.0.1:2379").is_ok());
        assert!(parse_base_url("http://pd.internal:2379").is_ok());
        assert!(parse_base_url("not a url").is_err());
    }
}
