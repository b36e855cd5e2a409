// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The backup coordination engine.
//!
//! One backup runs through the per-range state machine: plan the key
//! ranges, push the request to every store in parallel ([`push`]), and
//! close whatever gaps remain region by region ([`fine_grained`]) while the
//! [`safepoint`] watch holds the snapshot against garbage collection. The
//! catalog checksums ([`schema`]) run concurrently and join into the
//! manifest at the end.

mod client;
mod error;
mod fine_grained;
mod metrics;
mod planner;
mod push;
mod response;
mod safepoint;
mod schema;

pub use client::BackupClient;
pub use error::BackupError;
pub use metrics::BackupMetrics;
