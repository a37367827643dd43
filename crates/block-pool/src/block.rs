// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference-counted device block that returns to the pool on drop.
//!
//! A [`Block`] owns one device buffer for as long as any [`BlockRef`] to it
//! exists. When the last reference goes, `Drop` waits for the block's
//! outstanding write and puts the buffer back on the pool's free list, so
//! the next owner never races an in-flight transfer.
//!
//! # Write tracking
//! Only the most recent write's event is kept. The device queue runs in
//! order, so once that write has completed every earlier write on the block
//! has too.
//!
//! # Dirty blocks
//! A freshly allocated block still holds whatever the previous owner (or
//! the device) left in it. Until the first write, reads return zeros
//! without touching the device, and the first write zero-fills whatever
//! part of the block it does not cover.

use crate::pool::PoolInner;
use crate::{PoolError, BLOCK_SIZE};
use bytes::Bytes;
use compute_backend::{CommandQueue, DeviceBuffer, TransferEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static ZEROS: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Shared handle to an allocated block.
pub type BlockRef = Arc<Block>;

#[derive(Debug)]
struct BlockState {
    /// Event of the latest write not yet confirmed complete.
    last_write: Option<TransferEvent>,
    /// True until the first successful write.
    dirty: bool,
}

/// One fixed-size unit of device memory.
///
/// Obtained from [`BlockPool::allocate`](crate::BlockPool::allocate) as a
/// [`BlockRef`]. All transfers take `&self`, so a block can be shared
/// between consumers; coordinating concurrent writers is up to them.
///
/// # Panics
/// `read`, `write` and `write_async` panic if `offset + len` exceeds
/// [`BLOCK_SIZE`].
pub struct Block {
    /// Taken in `drop()` to hand back to the pool.
    buffer: Option<DeviceBuffer>,
    queue: Arc<dyn CommandQueue>,
    pool: Arc<PoolInner>,
    state: Mutex<BlockState>,
}

impl Block {
    pub(crate) fn new(
        buffer: DeviceBuffer,
        queue: Arc<dyn CommandQueue>,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            buffer: Some(buffer),
            queue,
            pool,
            state: Mutex::new(BlockState {
                last_write: None,
                dirty: true,
            }),
        }
    }

    /// Block capacity in bytes, always [`BLOCK_SIZE`].
    pub fn size(&self) -> usize {
        BLOCK_SIZE
    }

    /// True until the first successful write.
    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    /// Whether an asynchronous write has not yet been confirmed.
    pub fn has_pending_write(&self) -> bool {
        self.lock_state().last_write.is_some()
    }

    /// Reads `dst.len()` bytes starting at `offset`.
    ///
    /// Blocks until the data is in `dst`, waiting for any outstanding write
    /// on this block first.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), PoolError> {
        check_bounds("read", offset, dst.len());
        if dst.is_empty() {
            return Ok(());
        }
        self.pool.ensure_healthy()?;

        let mut state = self.lock_state();
        if state.dirty {
            dst.fill(0);
        } else {
            self.resolve_pending(&mut state)?;
            self.queue
                .enqueue_read(self.buffer(), offset, dst)
                .map_err(|e| self.pool.fail(e))?;
        }

        self.pool.record_read(dst.len());
        Ok(())
    }

    /// Writes `data` at `offset` and waits for the transfer to complete.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), PoolError> {
        self.write_inner(offset, data, true)
    }

    /// Writes `data` at `offset`, returning once the transfer is enqueued.
    ///
    /// `data` is copied before this returns, so the caller may reuse it
    /// immediately. Use [`sync`](Self::sync) or [`read`](Self::read) to
    /// wait for completion.
    pub fn write_async(&self, offset: usize, data: &[u8]) -> Result<(), PoolError> {
        self.write_inner(offset, data, false)
    }

    /// Blocks until the latest write on this block has completed.
    ///
    /// Returns immediately when nothing is outstanding.
    pub fn sync(&self) -> Result<(), PoolError> {
        self.pool.ensure_healthy()?;
        let mut state = self.lock_state();
        self.resolve_pending(&mut state)
    }

    fn write_inner(&self, offset: usize, data: &[u8], blocking: bool) -> Result<(), PoolError> {
        check_bounds("write", offset, data.len());
        if data.is_empty() {
            return Ok(());
        }
        self.pool.ensure_healthy()?;

        let mut state = self.lock_state();
        let buffer = self.buffer();
        let end = offset + data.len();

        if state.dirty && data.len() < BLOCK_SIZE {
            if offset > 0 {
                self.enqueue(buffer, 0, Bytes::from_static(&ZEROS[..offset]))?;
            }
            if end < BLOCK_SIZE {
                self.enqueue(buffer, end, Bytes::from_static(&ZEROS[end..]))?;
            }
        }

        let event = self.enqueue(buffer, offset, Bytes::copy_from_slice(data))?;
        if blocking {
            self.queue.wait(&event).map_err(|e| self.pool.fail(e))?;
            state.last_write = None;
        } else {
            state.last_write = Some(event);
        }
        state.dirty = false;

        self.pool.record_write(data.len(), blocking);
        tracing::trace!(
            buffer = %buffer.id(),
            offset,
            len = data.len(),
            blocking,
            "block write"
        );
        Ok(())
    }

    fn enqueue(
        &self,
        buffer: &DeviceBuffer,
        offset: usize,
        data: Bytes,
    ) -> Result<TransferEvent, PoolError> {
        self.queue
            .enqueue_write(buffer, offset, data)
            .map_err(|e| self.pool.fail(e))
    }

    fn resolve_pending(&self, state: &mut BlockState) -> Result<(), PoolError> {
        if let Some(event) = state.last_write {
            self.queue.wait(&event).map_err(|e| self.pool.fail(e))?;
            state.last_write = None;
        }
        Ok(())
    }

    fn buffer(&self) -> &DeviceBuffer {
        self.buffer.as_ref().expect("block buffer present until drop")
    }

    fn lock_state(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(event) = state.last_write.take() {
            // The buffer must not be handed out while a write is in flight.
            if let Err(e) = self.queue.wait(&event) {
                let err = self.pool.fail(e);
                tracing::warn!(error = %err, "pending write failed before reclaim");
            }
        }
        if let Some(buffer) = self.buffer.take() {
            self.pool.reclaim(buffer);
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Block")
            .field("buffer", &self.buffer.as_ref().map(DeviceBuffer::id))
            .field("dirty", &state.dirty)
            .field("pending_write", &state.last_write.is_some())
            .finish()
    }
}

fn check_bounds(op: &str, offset: usize, len: usize) {
    let in_bounds = offset.checked_add(len).is_some_and(|end| end <= BLOCK_SIZE);
    assert!(
        in_bounds,
        "block {op} out of bounds: offset {offset} + {len} bytes exceeds block size {BLOCK_SIZE}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockPool;
    use compute_backend::{BackendError, SimulatedBackend, SimulatedDevice};
    use std::time::{Duration, Instant};

    const LATENCY: Duration = Duration::from_millis(20);

    fn pool_with(device: SimulatedDevice) -> (Arc<SimulatedBackend>, BlockPool) {
        let backend = Arc::new(SimulatedBackend::new(vec![device]));
        let pool = BlockPool::new(backend.clone());
        pool.increase_pool(2 * BLOCK_SIZE).unwrap();
        (backend, pool)
    }

    fn fast_pool() -> BlockPool {
        pool_with(SimulatedDevice::new("fast", 2 * BLOCK_SIZE)).1
    }

    fn slow_pool() -> (Arc<SimulatedBackend>, BlockPool) {
        pool_with(SimulatedDevice::new("slow", 2 * BLOCK_SIZE).with_latency(LATENCY))
    }

    #[test]
    fn test_fresh_block_is_dirty_and_reads_zero() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        assert!(block.is_dirty());
        assert!(!block.has_pending_write());
        assert_eq!(block.size(), BLOCK_SIZE);

        // The simulated device fills new buffers with garbage; none of it shows.
        let mut out = [0xFFu8; 32];
        block.read(100, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();

        block.write(0, b"abcd").unwrap();
        assert!(!block.is_dirty());
        assert!(!block.has_pending_write());

        let mut out = [0u8; 4];
        block.read(0, &mut out).unwrap();
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_partial_first_write_zero_fills() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();

        block.write(10, b"xy").unwrap();

        let mut out = [0xAAu8; 16];
        block.read(0, &mut out).unwrap();
        let mut expected = [0u8; 16];
        expected[10] = b'x';
        expected[11] = b'y';
        assert_eq!(out, expected);

        let mut tail = [0xAAu8; 8];
        block.read(BLOCK_SIZE - 8, &mut tail).unwrap();
        assert_eq!(tail, [0u8; 8]);
    }

    #[test]
    fn test_later_writes_keep_earlier_data() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();

        block.write(0, b"ab").unwrap();
        block.write(10, b"cd").unwrap();

        let mut out = [0u8; 12];
        block.read(0, &mut out).unwrap();
        assert_eq!(&out, b"ab\0\0\0\0\0\0\0\0cd");
    }

    #[test]
    fn test_full_block_write() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();

        let data: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        block.write(0, &data).unwrap();

        let mut out = vec![0u8; BLOCK_SIZE];
        block.read(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_async_write_pending_until_sync() {
        let (_backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        block.write_async(0, b"wxyz").unwrap();
        assert!(block.has_pending_write());
        assert!(!block.is_dirty());

        block.sync().unwrap();
        assert!(!block.has_pending_write());

        // Redundant syncs are no-ops.
        block.sync().unwrap();
        block.sync().unwrap();
    }

    #[test]
    fn test_read_waits_for_async_write() {
        let (_backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        block.write_async(4, b"late").unwrap();
        let mut out = [0u8; 4];
        block.read(4, &mut out).unwrap();
        assert_eq!(&out, b"late");
        assert!(!block.has_pending_write());
    }

    #[test]
    fn test_async_source_may_be_reused() {
        let (_backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        let mut src = b"original".to_vec();
        block.write_async(0, &src).unwrap();
        src.copy_from_slice(b"clobber!");
        drop(src);

        block.sync().unwrap();
        let mut out = [0u8; 8];
        block.read(0, &mut out).unwrap();
        assert_eq!(&out, b"original");
    }

    #[test]
    fn test_sequential_async_writes_apply_in_order() {
        let (_backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        block.write_async(0, b"1111").unwrap();
        block.write_async(0, b"2222").unwrap();
        block.write_async(2, b"33").unwrap();
        block.sync().unwrap();

        let mut out = [0u8; 4];
        block.read(0, &mut out).unwrap();
        assert_eq!(&out, b"2233");
    }

    #[test]
    fn test_sync_without_writes() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        block.sync().unwrap();
        assert!(block.is_dirty());
    }

    #[test]
    fn test_drop_waits_for_pending_write() {
        let (_backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        let start = Instant::now();
        block.write_async(0, b"data").unwrap();
        drop(block);
        assert!(start.elapsed() >= LATENCY);
        assert_eq!(pool.pool_available(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_reused_block_is_dirty_again() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        block.write(0, b"secret").unwrap();
        drop(block);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        for block in [&a, &b] {
            assert!(block.is_dirty());
            let mut out = [0xFFu8; 6];
            block.read(0, &mut out).unwrap();
            assert_eq!(out, [0u8; 6]);
        }
    }

    #[test]
    fn test_empty_transfers_are_noops() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        block.write(BLOCK_SIZE, &[]).unwrap();
        assert!(block.is_dirty());
        block.read(BLOCK_SIZE, &mut []).unwrap();
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_read_out_of_bounds_panics() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        let mut out = [0u8; 4];
        let _ = block.read(BLOCK_SIZE - 2, &mut out);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_write_out_of_bounds_panics() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        let _ = block.write_async(BLOCK_SIZE, b"x");
    }

    #[test]
    fn test_device_loss_poisons_pool() {
        let (backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        block.write_async(0, b"doomed").unwrap();
        backend.lose_device("bus reset");

        let err = block.sync().unwrap_err();
        assert!(matches!(
            err,
            PoolError::Backend(BackendError::DeviceLost(_))
        ));
        assert!(pool.is_failed());

        let mut out = [0u8; 6];
        assert!(matches!(block.read(0, &mut out), Err(PoolError::DeviceFailed(_))));
        assert!(matches!(block.write(0, b"x"), Err(PoolError::DeviceFailed(_))));
        assert!(matches!(pool.increase_pool(1), Err(PoolError::DeviceFailed(_))));
    }

    #[test]
    fn test_failed_write_on_drop_poisons_pool() {
        let (backend, pool) = slow_pool();
        let block = pool.allocate().unwrap();

        block.write_async(0, b"x").unwrap();
        backend.lose_device("bus reset");
        drop(block);

        assert!(pool.is_failed());
        let next = pool.allocate().unwrap();
        assert!(matches!(next.write(0, b"y"), Err(PoolError::DeviceFailed(_))));
    }

    #[test]
    fn test_transfer_stats() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        block.write(0, b"abcd").unwrap();
        block.write_async(4, b"ef").unwrap();
        let mut out = [0u8; 6];
        block.read(0, &mut out).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.blocking_writes, 1);
        assert_eq!(stats.async_writes, 1);
        assert_eq!(stats.bytes_written, 6);
        assert_eq!(stats.bytes_read, 6);
    }

    #[test]
    fn test_block_is_shareable_across_threads() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        block.write(0, b"shared").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let block = Arc::clone(&block);
                std::thread::spawn(move || {
                    let mut out = [0u8; 6];
                    block.read(0, &mut out).unwrap();
                    out
                })
            })
            .collect();
        drop(block);

        for h in handles {
            assert_eq!(&h.join().unwrap(), b"shared");
        }
        assert_eq!(pool.pool_available(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_debug_format() {
        let pool = fast_pool();
        let block = pool.allocate().unwrap();
        let debug = format!("{block:?}");
        assert!(debug.contains("dirty: true"));
    }
}
