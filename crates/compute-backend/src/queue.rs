// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The backend capability set: device discovery plus an in-order command
//! queue that creates buffers and moves bytes to and from them.

use crate::BackendResult;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a device buffer, unique within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Wraps a raw backend identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A device memory allocation.
///
/// Deliberately not `Clone`: exactly one owner may hold a given buffer, and
/// the allocation is handed back with [`CommandQueue::release_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    id: BufferId,
    size: usize,
}

impl DeviceBuffer {
    /// Creates the handle for a buffer a backend has just allocated.
    pub fn new(id: BufferId, size: usize) -> Self {
        Self { id, size }
    }

    /// Returns the backend identifier.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the buffer size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Marker for an enqueued write.
///
/// Events carry the queue-assigned sequence number of the transfer. Queues
/// are in-order, so waiting on an event also covers every write enqueued
/// before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransferEvent {
    seq: u64,
}

impl TransferEvent {
    /// Creates an event for the transfer with sequence number `seq`.
    pub fn new(seq: u64) -> Self {
        Self { seq }
    }

    /// Returns the transfer's sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Device discovery and queue creation.
///
/// Selected at runtime as `Arc<dyn ComputeBackend>`, so real hardware and
/// the [`SimulatedBackend`](crate::SimulatedBackend) are interchangeable.
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// Short backend name used in logs and configuration.
    fn name(&self) -> &str;

    /// Human-readable names of every usable device, in index order.
    fn list_devices(&self) -> Vec<String>;

    /// Whether at least one usable device exists. Never fails.
    fn is_available(&self) -> bool {
        !self.list_devices().is_empty()
    }

    /// Opens a command queue on the device at `index`.
    fn open_queue(&self, index: usize) -> BackendResult<Arc<dyn CommandQueue>>;
}

/// An in-order command queue bound to one device.
///
/// Operations submitted to the same queue execute in submission order.
pub trait CommandQueue: Send + Sync + fmt::Debug {
    /// Name of the device this queue drives.
    fn device_name(&self) -> &str;

    /// Allocates a device buffer of `size` bytes. Contents are undefined.
    fn create_buffer(&self, size: usize) -> BackendResult<DeviceBuffer>;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`, blocking
    /// until every previously enqueued operation and the read itself are done.
    fn enqueue_read(&self, buffer: &DeviceBuffer, offset: usize, dst: &mut [u8])
        -> BackendResult<()>;

    /// Enqueues a write of `data` at `offset` and returns without waiting.
    ///
    /// The queue owns `data` from here on; the caller's memory is never
    /// referenced after this call returns.
    fn enqueue_write(
        &self,
        buffer: &DeviceBuffer,
        offset: usize,
        data: Bytes,
    ) -> BackendResult<TransferEvent>;

    /// Blocks until the write behind `event` has completed.
    fn wait(&self, event: &TransferEvent) -> BackendResult<()>;

    /// Returns a buffer's memory to the device.
    fn release_buffer(&self, buffer: DeviceBuffer);
}
