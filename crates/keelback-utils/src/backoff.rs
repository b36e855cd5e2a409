// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Retry-sleep budgeting.
//!
//! A [`Backoffer`] tracks the cumulative time spent sleeping between retries
//! against a global ceiling. Workers retrying in parallel call
//! [`Backoffer::fork`] to obtain children that sleep independently but charge
//! the one shared budget, so the total stall of a retry loop stays bounded no
//! matter how its work is fanned out.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

/// The budget of a [`Backoffer`] has been consumed.
#[derive(Debug, Clone, Copy, Error)]
#[error("retry budget exhausted: slept {spent_ms} ms of at most {limit_ms} ms")]
pub struct BudgetExhausted {
    /// Milliseconds charged to the budget so far.
    pub spent_ms: u64,
    /// The budget ceiling, in milliseconds.
    pub limit_ms: u64,
}

/// A forkable retry-sleep budget.
#[derive(Debug)]
pub struct Backoffer {
    limit_ms: u64,
    spent_ms: Arc<AtomicU64>,
    rng: StdRng,
}

impl Backoffer {
    /// A budget allowing `limit` of cumulative retry sleep.
    pub fn new(limit: Duration) -> Self {
        Self::new_with_seed(limit, rand::thread_rng().r#gen())
    }

    /// A budget with a deterministic jitter sequence, for tests.
    pub fn new_with_seed(limit: Duration, seed: u64) -> Self {
        Self {
            limit_ms: limit.as_millis() as u64,
            spent_ms: Arc::new(AtomicU64::new(0)),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A child charging the same budget.
    pub fn fork(&mut self) -> Self {
        Self {
            limit_ms: self.limit_ms,
            spent_ms: self.spent_ms.clone(),
            rng: StdRng::seed_from_u64(self.rng.r#gen()),
        }
    }

    /// Milliseconds already charged to the shared budget.
    pub fn spent(&self) -> Duration {
        Duration::from_millis(self.spent_ms.load(Ordering::Acquire))
    }

    /// Sleeps approximately `delay` (jittered downwards to desynchronize
    /// parallel retries), charging the shared budget first.
    ///
    /// Fails without sleeping when the charge would take the budget past its
    /// ceiling; the caller is expected to give up at that point.
    pub async fn backoff(&mut self, delay: Duration) -> Result<(), BudgetExhausted> {
        let delay_ms = delay.as_millis() as u64;
        let jittered_ms = if delay_ms > 1 {
            self.rng.gen_range(delay_ms / 2..=delay_ms)
        } else {
            delay_ms
        };
        let spent_ms = self.spent_ms.fetch_add(jittered_ms, Ordering::AcqRel) + jittered_ms;
        if spent_ms > self.limit_ms {
            return Err(BudgetExhausted {
                spent_ms,
                limit_ms: self.limit_ms,
            });
        }
        tracing::debug!(delay_ms = jittered_ms, spent_ms, "retry backoff");
        tokio::time::sleep(Duration::from_millis(jittered_ms)).await;
        Ok(())
    }
}
