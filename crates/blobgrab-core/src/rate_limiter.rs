// Copyright (c) 2026 blobgrab contributors
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Throughput policy consulted before each envelope read/write.
///
/// The throttling algorithm is the implementor's concern; the default
/// policy performs none.
pub trait RateLimiter: Send + Sync {
    /// True when an I/O of `byte_count` bytes should be held back.
    fn should_throttle(&self, direction: Direction, byte_count: usize) -> bool;

    /// Account for an I/O that was actually performed.
    fn record(&self, direction: Direction, byte_count: usize);
}

/// Never throttles, but still keeps byte totals for reporting.
#[derive(Debug, Default)]
pub struct NoopRateLimiter {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl NoopRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn total_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl RateLimiter for NoopRateLimiter {
    fn should_throttle(&self, _direction: Direction, _byte_count: usize) -> bool {
        false
    }

    fn record(&self, direction: Direction, byte_count: usize) {
        let counter = match direction {
            Direction::Read => &self.bytes_read,
            Direction::Write => &self.bytes_written,
        };
        counter.fetch_add(byte_count as u64, Ordering::Relaxed);
    }
}
