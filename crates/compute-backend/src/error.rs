// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for compute backends.

use crate::BufferId;

/// Errors reported by a [`ComputeBackend`](crate::ComputeBackend) or one of
/// its command queues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend enumerates no usable device.
    #[error("no compute device available")]
    NoDevice,

    /// A device index outside the enumerated range was requested.
    #[error("invalid device index {index}: {available} device(s) enumerated")]
    InvalidDevice { index: usize, available: usize },

    /// The device cannot hold another buffer of the requested size.
    #[error("device memory exhausted: cannot create a {size}-byte buffer ({free} bytes free)")]
    OutOfDeviceMemory { size: usize, free: usize },

    /// A transfer addressed bytes outside the target buffer.
    #[error("transfer out of bounds: offset {offset} + {len} bytes exceeds {capacity}-byte buffer")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The buffer does not belong to this queue or was already released.
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// The device stopped responding; every pending and future operation fails.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The queue's worker has shut down.
    #[error("command queue closed")]
    QueueClosed,
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
