// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The block pool: provisioning, free list, and handle reclamation.
//!
//! The [`BlockPool`] is the central allocator for device blocks. It:
//!
//! 1. Binds to one device of its backend and opens that device's command
//!    queue on first provisioning.
//! 2. Grows monotonically through [`BlockPool::increase_pool`]; device
//!    buffers are never handed back to the device while the pool lives.
//! 3. Hands out [`BlockRef`]s from an unordered free list and takes the
//!    slot back when the last reference is dropped.
//!
//! # Thread Safety
//! All free-list mutation (`allocate`, `increase_pool`, `set_device`,
//! `shutdown`, and reclamation from `Block::drop`) serializes on one mutex,
//! and the capacity queries read under the same mutex, so they always see
//! a consistent snapshot.
//!
//! # Failure
//! Any backend error other than running out of device memory marks the
//! pool failed, whether it comes from a block transfer, from provisioning,
//! or from a released block waiting on its last write. From then on every
//! transfer and provisioning call returns [`PoolError::DeviceFailed`];
//! nothing is retried.

use crate::{Block, BlockRef, PoolError, PoolStats, BLOCK_SIZE};
use compute_backend::{BackendError, CommandQueue, ComputeBackend, DeviceBuffer};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static GLOBAL: OnceCell<BlockPool> = OnceCell::new();

struct PoolState {
    /// Selected device ordinal.
    device: usize,
    /// Opened lazily by the first `increase_pool`.
    queue: Option<Arc<dyn CommandQueue>>,
    free: Vec<DeviceBuffer>,
    total_blocks: usize,
    shut_down: bool,
}

/// Internal pool state, shared between the pool and its blocks via `Arc`.
///
/// Blocks keep the inner state alive, so a block dropped after its pool
/// handle still has somewhere to return its buffer.
pub(crate) struct PoolInner {
    backend: Arc<dyn ComputeBackend>,
    state: Mutex<PoolState>,
    stats: Mutex<PoolStats>,
    /// Set once, by the first backend failure.
    failure: OnceCell<String>,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by `Block::drop` to put a buffer back on the free list.
    pub(crate) fn reclaim(&self, buffer: DeviceBuffer) {
        let mut state = self.lock_state();

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }

        if state.shut_down {
            if let Some(queue) = &state.queue {
                queue.release_buffer(buffer);
            }
            return;
        }

        tracing::debug!(buffer = %buffer.id(), "block returned to pool");
        state.free.push(buffer);
    }

    pub(crate) fn ensure_healthy(&self) -> Result<(), PoolError> {
        match self.failure.get() {
            Some(reason) => Err(PoolError::DeviceFailed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Marks the pool failed and converts the backend error.
    pub(crate) fn fail(&self, err: BackendError) -> PoolError {
        if self.failure.set(err.to_string()).is_ok() {
            tracing::error!(error = %err, "device failure, block pool is now unusable");
        }
        PoolError::Backend(err)
    }

    pub(crate) fn record_write(&self, bytes: usize, blocking: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_write(bytes, blocking);
        }
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_read(bytes);
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = state.queue.take() {
            let released = state.free.len();
            for buffer in state.free.drain(..) {
                queue.release_buffer(buffer);
            }
            tracing::debug!(released, "block pool torn down");
        }
    }
}

/// A pool of fixed-size device blocks.
///
/// Cloning a `BlockPool` yields another handle to the same pool.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use block_pool::{BlockPool, BLOCK_SIZE};
/// use compute_backend::SimulatedBackend;
///
/// let pool = BlockPool::new(Arc::new(SimulatedBackend::single(1 << 20)));
/// assert!(pool.allocate().is_none());
///
/// assert_eq!(pool.increase_pool(BLOCK_SIZE).unwrap(), BLOCK_SIZE);
/// let block = pool.allocate().unwrap();
/// assert_eq!(pool.pool_available(), 0);
///
/// block.write(0, b"abcd").unwrap();
/// let mut out = [0u8; 4];
/// block.read(0, &mut out).unwrap();
/// assert_eq!(&out, b"abcd");
///
/// drop(block);
/// assert_eq!(pool.pool_available(), BLOCK_SIZE);
/// ```
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

impl BlockPool {
    /// Creates an empty pool on `backend`, bound to device 0 until
    /// [`set_device`](Self::set_device) says otherwise.
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        tracing::debug!(backend = backend.name(), "block pool created");
        Self {
            inner: Arc::new(PoolInner {
                backend,
                state: Mutex::new(PoolState {
                    device: 0,
                    queue: None,
                    free: Vec::new(),
                    total_blocks: 0,
                    shut_down: false,
                }),
                stats: Mutex::new(PoolStats::default()),
                failure: OnceCell::new(),
            }),
        }
    }

    /// Installs `pool` as the process-wide pool and returns it.
    ///
    /// Fails if a global pool is already installed. The global pool lives
    /// until process exit; call [`shutdown`](Self::shutdown) to release its
    /// device buffers earlier.
    pub fn install_global(pool: BlockPool) -> Result<&'static BlockPool, PoolError> {
        GLOBAL
            .try_insert(pool)
            .map_err(|_| PoolError::GlobalAlreadyInstalled)
    }

    /// Returns the process-wide pool, if one was installed.
    pub fn global() -> Option<&'static BlockPool> {
        GLOBAL.get()
    }

    /// Name of the backend this pool runs on.
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Whether the backend has a usable device. Never fails.
    pub fn is_available(&self) -> bool {
        self.inner.backend.is_available()
    }

    /// Names of the backend's devices, in index order.
    pub fn list_devices(&self) -> Vec<String> {
        self.inner.backend.list_devices()
    }

    /// Selects the device by its index in [`list_devices`](Self::list_devices).
    ///
    /// Must be called before the first [`increase_pool`](Self::increase_pool).
    /// Re-selecting the current device is a no-op; selecting a different
    /// one once blocks exist fails with [`PoolError::DeviceInUse`].
    pub fn set_device(&self, index: usize) -> Result<(), PoolError> {
        let available = self.inner.backend.list_devices().len();
        if index >= available {
            return Err(PoolError::InvalidDevice { index, available });
        }

        let mut state = self.inner.lock_state();
        if state.shut_down {
            return Err(PoolError::ShutDown);
        }
        if state.device == index {
            return Ok(());
        }
        if state.total_blocks > 0 {
            return Err(PoolError::DeviceInUse {
                current: state.device,
                blocks: state.total_blocks,
            });
        }

        // A queue opened on the old device never backed a buffer.
        state.queue = None;
        state.device = index;
        tracing::info!(device = index, "device selected");
        Ok(())
    }

    /// Returns the selected device index.
    pub fn device(&self) -> usize {
        self.inner.lock_state().device
    }

    /// Total block slots provisioned, free and allocated.
    pub fn pool_size(&self) -> usize {
        self.inner.lock_state().total_blocks
    }

    /// Free capacity in bytes.
    pub fn pool_available(&self) -> usize {
        self.inner.lock_state().free.len() * BLOCK_SIZE
    }

    /// Provisions enough blocks to hold `size` bytes and returns the bytes
    /// actually added.
    ///
    /// Stops when the device runs out of memory, so the result can be
    /// smaller than requested, down to zero. Any other backend error marks
    /// the pool failed; blocks added before it stay in the pool.
    pub fn increase_pool(&self, size: usize) -> Result<usize, PoolError> {
        self.inner.ensure_healthy()?;

        let mut state = self.inner.lock_state();
        if state.shut_down {
            return Err(PoolError::ShutDown);
        }

        let requested = size.div_ceil(BLOCK_SIZE);
        if requested == 0 {
            return Ok(0);
        }

        let queue = match state.queue.clone() {
            Some(queue) => queue,
            None => {
                let queue = self.inner.backend.open_queue(state.device)?;
                tracing::info!(
                    device = state.device,
                    name = queue.device_name(),
                    "device queue opened"
                );
                state.queue = Some(Arc::clone(&queue));
                queue
            }
        };

        let mut added = 0;
        while added < requested {
            match queue.create_buffer(BLOCK_SIZE) {
                Ok(buffer) => {
                    state.free.push(buffer);
                    state.total_blocks += 1;
                    added += 1;
                }
                Err(e @ BackendError::OutOfDeviceMemory { .. }) => {
                    tracing::warn!(
                        requested_blocks = requested,
                        added_blocks = added,
                        error = %e,
                        "device refused further blocks"
                    );
                    break;
                }
                Err(e) => {
                    if let Ok(mut stats) = self.inner.stats.lock() {
                        stats.record_provisioning(requested, added);
                    }
                    return Err(self.inner.fail(e));
                }
            }
        }

        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_provisioning(requested, added);
        }
        tracing::info!(
            added_blocks = added,
            pool_size = state.total_blocks,
            "pool increased"
        );

        Ok(added * BLOCK_SIZE)
    }

    /// Takes one block from the free list.
    ///
    /// Returns `None` when no block is free; provision more with
    /// [`increase_pool`](Self::increase_pool) and retry. The block goes
    /// back to the pool when its last reference is dropped.
    pub fn allocate(&self) -> Option<BlockRef> {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return None;
        }

        let Some(buffer) = state.free.pop() else {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_exhausted();
            }
            tracing::debug!("allocation failed: pool exhausted");
            return None;
        };
        let queue = match state.queue.clone() {
            Some(queue) => queue,
            None => {
                // Buffers only exist once a queue has been opened.
                state.free.push(buffer);
                return None;
            }
        };

        let in_use = state.total_blocks - state.free.len();
        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_allocation(in_use);
        }
        drop(state);

        tracing::debug!(buffer = %buffer.id(), in_use, "block allocated");
        Some(Arc::new(Block::new(buffer, queue, Arc::clone(&self.inner))))
    }

    /// Returns a snapshot of pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Whether a backend failure has made the pool unusable.
    pub fn is_failed(&self) -> bool {
        self.inner.failure.get().is_some()
    }

    /// Releases every free buffer back to the device and stops handing out
    /// blocks. Blocks still held release their buffers when dropped.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        let released = state.free.len();
        if let Some(queue) = state.queue.clone() {
            for buffer in state.free.drain(..) {
                queue.release_buffer(buffer);
            }
        }
        tracing::info!(released, "block pool shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock_state().shut_down
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("BlockPool")
            .field("backend", &self.inner.backend.name())
            .field("device", &state.device)
            .field("pool_size", &state.total_blocks)
            .field("free_blocks", &state.free.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}
