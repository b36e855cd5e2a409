// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core types for Keelback: key ranges and the coverage tree, the key
//! encodings understood by the cluster, composite timestamps, the backup
//! wire messages, and the manifest written at the end of a backup.

pub mod keys;
pub mod manifest;
pub mod messages;
pub mod range;
pub mod timestamp;

/// The id of a storage node in the cluster.
pub type StoreId = u64;
/// The id of a region, the cluster's unit of replication and routing.
pub type RegionId = u64;
/// The id of the cluster itself.
pub type ClusterId = u64;
/// The id of a table (or table partition) in the catalog.
pub type TableId = i64;

pub use range::{Range, RangeTree};
pub use timestamp::Timestamp;
