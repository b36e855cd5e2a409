// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Clients for the cluster collaborators a backup talks to.
//!
//! The backup engine depends on four seams, each expressed as a trait so
//! tests can substitute scripted implementations: the placement driver
//! ([`pd::PlacementDriver`]), the storage-node backup API
//! ([`store::StoreClient`]), the catalog ([`catalog::Catalog`]), and the
//! lock resolver ([`resolver::LockResolver`]). The [`client`] module holds
//! the REST implementations used by the CLI.

pub mod catalog;
pub mod pd;
pub mod resolver;
pub mod store;
pub mod types;

mod client;
mod error;

pub use client::{ClusterLockResolver, HttpCatalog, HttpPlacementDriver, HttpStoreClient};
pub use error::{ClientBuildError, NodeError};
