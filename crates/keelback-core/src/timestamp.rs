// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Composite cluster timestamps.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of bits reserved for the logical component of a composed timestamp.
const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A timestamp issued by the placement driver: wall-clock milliseconds plus a
/// logical counter disambiguating timestamps within one millisecond.
///
/// The composed 64-bit form is `(physical_ms << 18) | logical` and is what
/// appears in requests, manifests, and the GC safepoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub physical: i64,
    /// Logical counter within the millisecond.
    pub logical: i64,
}

impl Timestamp {
    /// Creates a timestamp from its components.
    pub fn new(physical: i64, logical: i64) -> Self {
        Self { physical, logical }
    }

    /// Packs the timestamp into its 64-bit composite form.
    pub fn compose(self) -> u64 {
        ((self.physical as u64) << LOGICAL_BITS) | (self.logical as u64 & LOGICAL_MASK)
    }

    /// Splits a composite timestamp back into its components.
    pub fn decompose(ts: u64) -> Self {
        Self {
            physical: (ts >> LOGICAL_BITS) as i64,
            logical: (ts & LOGICAL_MASK) as i64,
        }
    }

    /// The physical component of a composite timestamp, in milliseconds.
    pub fn physical_of(ts: u64) -> i64 {
        (ts >> LOGICAL_BITS) as i64
    }

    /// The timestamp rewound by a wall-clock duration; the logical component
    /// is kept as-is.
    pub fn rewound(self, by: Duration) -> Self {
        Self {
            physical: self.physical - by.as_millis() as i64,
            logical: self.logical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_round_trip() {
        let ts = Timestamp::new(1_234_567, 42);
        assert_eq!(Timestamp::decompose(ts.compose()), ts);
        assert_eq!(Timestamp::physical_of(ts.compose()), 1_234_567);
    }

    #[test]
    fn compose_is_bit_exact() {
        let ts = Timestamp::new(1, 1);
        assert_eq!(ts.compose(), (1 << 18) | 1);
        assert_eq!(Timestamp::new(0, LOGICAL_MASK as i64).compose(), LOGICAL_MASK);
    }

    #[test]
    fn composed_order_follows_physical_then_logical() {
        let a = Timestamp::new(10, 5).compose();
        let b = Timestamp::new(10, 6).compose();
        let c = Timestamp::new(11, 0).compose();
        assert!(a < b && b < c);
    }

    #[test]
    fn rewound_subtracts_wall_clock_time() {
        let ts = Timestamp::new(3_600_000, 7);
        let earlier = ts.rewound(Duration::from_secs(3600));
        assert_eq!(earlier, Timestamp::new(0, 7));
    }
}
