// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Utility functionality shared between the Keelback crates.

pub mod backoff;
pub mod config;
