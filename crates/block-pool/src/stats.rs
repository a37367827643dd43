// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool statistics for diagnostics.
//!
//! [`PoolStats`] tracks cumulative counters for the pool: how many handles
//! were given out and returned, how often callers found the pool empty, how
//! provisioning went, and how many bytes moved through blocks.

use crate::BLOCK_SIZE;

/// Cumulative statistics about block pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Successful `allocate` calls.
    pub total_allocations: u64,
    /// `allocate` calls that found the free list empty.
    pub exhausted_allocations: u64,
    /// Handles whose last reference was dropped.
    pub total_releases: u64,
    /// High-water mark of blocks handed out at once.
    pub peak_blocks_in_use: usize,
    /// Blocks created on the device over the pool's lifetime.
    pub blocks_provisioned: usize,
    /// `increase_pool` calls that added fewer blocks than requested.
    pub provisioning_shortfalls: u64,
    /// Writes that blocked until completion.
    pub blocking_writes: u64,
    /// Writes that returned once enqueued.
    pub async_writes: u64,
    /// Bytes written through block handles.
    pub bytes_written: u64,
    /// Bytes read through block handles.
    pub bytes_read: u64,
}

impl PoolStats {
    /// Fraction of allocation attempts that found the pool empty, in `[0.0, 1.0]`.
    pub fn exhaustion_rate(&self) -> f64 {
        let attempts = self.total_allocations + self.exhausted_allocations;
        if attempts == 0 {
            return 0.0;
        }
        self.exhausted_allocations as f64 / attempts as f64
    }

    pub(crate) fn record_allocation(&mut self, in_use: usize) {
        self.total_allocations += 1;
        if in_use > self.peak_blocks_in_use {
            self.peak_blocks_in_use = in_use;
        }
    }

    pub(crate) fn record_exhausted(&mut self) {
        self.exhausted_allocations += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.total_releases += 1;
    }

    pub(crate) fn record_provisioning(&mut self, requested_blocks: usize, added_blocks: usize) {
        self.blocks_provisioned += added_blocks;
        if added_blocks < requested_blocks {
            self.provisioning_shortfalls += 1;
        }
    }

    pub(crate) fn record_write(&mut self, bytes: usize, blocking: bool) {
        if blocking {
            self.blocking_writes += 1;
        } else {
            self.async_writes += 1;
        }
        self.bytes_written += bytes as u64;
    }

    pub(crate) fn record_read(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = (self.peak_blocks_in_use * BLOCK_SIZE) as f64 / (1024.0 * 1024.0);
        format!(
            "Allocations: {} ok, {} exhausted ({:.0}% exhausted), {} releases, \
             peak {} blocks ({:.2} MiB), {} provisioned, {} shortfalls, \
             writes {} blocking / {} async",
            self.total_allocations,
            self.exhausted_allocations,
            self.exhaustion_rate() * 100.0,
            self.total_releases,
            self.peak_blocks_in_use,
            peak_mb,
            self.blocks_provisioned,
            self.provisioning_shortfalls,
            self.blocking_writes,
            self.async_writes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = PoolStats::default();
        assert_eq!(s.total_allocations, 0);
        assert_eq!(s.exhaustion_rate(), 0.0);
    }

    #[test]
    fn test_exhaustion_rate() {
        let mut s = PoolStats::default();
        s.record_allocation(1);
        s.record_allocation(2);
        s.record_exhausted();
        s.record_exhausted();
        assert!((s.exhaustion_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_peak_tracking() {
        let mut s = PoolStats::default();
        s.record_allocation(3);
        s.record_allocation(1);
        assert_eq!(s.peak_blocks_in_use, 3);
    }

    #[test]
    fn test_provisioning_shortfall() {
        let mut s = PoolStats::default();
        s.record_provisioning(4, 4);
        assert_eq!(s.provisioning_shortfalls, 0);
        s.record_provisioning(4, 1);
        assert_eq!(s.provisioning_shortfalls, 1);
        assert_eq!(s.blocks_provisioned, 5);
    }

    #[test]
    fn test_transfer_counters() {
        let mut s = PoolStats::default();
        s.record_write(100, true);
        s.record_write(50, false);
        s.record_read(25);
        assert_eq!(s.blocking_writes, 1);
        assert_eq!(s.async_writes, 1);
        assert_eq!(s.bytes_written, 150);
        assert_eq!(s.bytes_read, 25);
    }

    #[test]
    fn test_summary() {
        let mut s = PoolStats::default();
        s.record_allocation(8);
        s.record_release();
        let summary = s.summary();
        assert!(summary.contains("1 ok"));
        assert!(summary.contains("1 releases"));
        assert!(summary.contains("peak 8 blocks (1.00 MiB)"));
    }

    #[test]
    fn test_serialize_json() {
        let mut s = PoolStats::default();
        s.record_provisioning(2, 2);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["blocks_provisioned"], 2);
        assert_eq!(json["total_allocations"], 0);
    }
}
