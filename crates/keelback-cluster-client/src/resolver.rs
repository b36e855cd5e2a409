// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lock resolution.

use async_trait::async_trait;

use crate::{NodeError, types::Lock};

/// Cleans up transaction locks left behind by crashed or slow clients.
///
/// A snapshot read blocked by a lock cannot make progress until the lock is
/// committed, rolled back, or expires.
#[async_trait]
pub trait LockResolver: Send + Sync {
    /// Attempts to clean the given locks.
    ///
    /// Returns `0` when every lock was cleaned and the read can be retried
    /// immediately; otherwise returns the number of milliseconds until the
    /// earliest surviving lock expires.
    async fn resolve_locks(&self, locks: &[Lock]) -> Result<u64, NodeError>;
}
