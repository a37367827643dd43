// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # compute-backend
//!
//! The device-facing half of the block allocator: discovering compute
//! devices and driving an in-order command queue on one of them.
//!
//! # Capability Set
//! The allocator depends on exactly four queue operations:
//!
//! - **create-buffer**: [`CommandQueue::create_buffer`]
//! - **enqueue-read**: [`CommandQueue::enqueue_read`] (blocking)
//! - **enqueue-write**: [`CommandQueue::enqueue_write`] (returns a [`TransferEvent`])
//! - **wait-event**: [`CommandQueue::wait`]
//!
//! plus [`CommandQueue::release_buffer`] at teardown. Discovery lives on
//! [`ComputeBackend`]: availability, device names, and opening a queue by
//! device index.
//!
//! # Backends
//! Backends are chosen at runtime behind `Arc<dyn ComputeBackend>`. This
//! crate ships [`SimulatedBackend`], which keeps device memory on the host
//! and runs each queue on its own worker thread, so asynchronous writes
//! really are pending until the worker gets to them.
//!
//! # Example
//! ```
//! use bytes::Bytes;
//! use compute_backend::{ComputeBackend, SimulatedBackend};
//!
//! let backend = SimulatedBackend::single(1024 * 1024);
//! assert!(backend.is_available());
//!
//! let queue = backend.open_queue(0).unwrap();
//! let buffer = queue.create_buffer(4096).unwrap();
//!
//! let event = queue.enqueue_write(&buffer, 0, Bytes::from_static(b"abcd")).unwrap();
//! queue.wait(&event).unwrap();
//!
//! let mut out = [0u8; 4];
//! queue.enqueue_read(&buffer, 0, &mut out).unwrap();
//! assert_eq!(&out, b"abcd");
//! ```

mod error;
mod queue;
pub mod simulated;

pub use error::{BackendError, BackendResult};
pub use queue::{BufferId, CommandQueue, ComputeBackend, DeviceBuffer, TransferEvent};
pub use simulated::{SimulatedBackend, SimulatedDevice};
