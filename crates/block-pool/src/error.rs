// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the block pool.

use compute_backend::BackendError;

/// Errors that can occur while provisioning, allocating or transferring
/// blocks.
///
/// Pool exhaustion is not an error: [`BlockPool::allocate`](crate::BlockPool::allocate)
/// returns `None`, and a short [`increase_pool`](crate::BlockPool::increase_pool)
/// reports the bytes it managed to add.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The requested device index is outside the enumerated range.
    #[error("invalid device index {index}: only {available} device(s) enumerated")]
    InvalidDevice { index: usize, available: usize },

    /// The selected device already backs provisioned blocks.
    #[error(
        "device {current} already backs {blocks} provisioned block(s); \
         select the device before the first increase_pool"
    )]
    DeviceInUse { current: usize, blocks: usize },

    /// The backend failed.
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    /// An earlier backend failure left the pool unusable.
    #[error("pool unusable after device failure: {0}")]
    DeviceFailed(String),

    /// The pool was shut down.
    #[error("pool has been shut down")]
    ShutDown,

    /// Provisioning added less than a caller required.
    #[error("insufficient capacity: requested {requested} bytes, provisioned {provisioned}")]
    InsufficientCapacity { requested: usize, provisioned: usize },

    /// An extent write ran out of free blocks.
    #[error("pool exhausted after writing {written} of {requested} bytes")]
    Exhausted { written: usize, requested: usize },

    /// An extent offset plus length does not fit in `usize`.
    #[error("extent offset {offset} + {len} bytes overflows usize")]
    OffsetOverflow { offset: usize, len: usize },

    /// A human-readable size string could not be parsed.
    #[error("invalid size '{input}': {detail}")]
    InvalidSize { input: String, detail: String },

    /// A process-wide pool was already installed.
    #[error("global block pool already installed")]
    GlobalAlreadyInstalled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
