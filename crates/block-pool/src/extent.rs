// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sparse byte ranges backed by pool blocks.
//!
//! An [`Extent`] maps a logical byte range onto blocks, allocating one only
//! when a write first touches its slot. Untouched slots read as zeros.

use crate::{BlockPool, BlockRef, PoolError, BLOCK_SIZE};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A growable byte range stored in device blocks.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use block_pool::{BlockPool, Extent, BLOCK_SIZE};
/// use compute_backend::SimulatedBackend;
///
/// let pool = BlockPool::new(Arc::new(SimulatedBackend::single(4 * BLOCK_SIZE)));
/// pool.increase_pool(4 * BLOCK_SIZE).unwrap();
///
/// let mut extent = Extent::new(pool.clone());
/// extent.write(BLOCK_SIZE - 2, b"span").unwrap();
/// assert_eq!(extent.block_count(), 2);
///
/// let mut out = [0u8; 4];
/// assert_eq!(extent.read(BLOCK_SIZE - 2, &mut out).unwrap(), 4);
/// assert_eq!(&out, b"span");
/// ```
pub struct Extent {
    pool: BlockPool,
    /// Keyed by block index (`offset / BLOCK_SIZE`).
    blocks: BTreeMap<usize, BlockRef>,
    len: usize,
    last_written: Option<BlockRef>,
}

impl Extent {
    /// Creates an empty extent drawing blocks from `pool`.
    pub fn new(pool: BlockPool) -> Self {
        Self {
            pool,
            blocks: BTreeMap::new(),
            len: 0,
            last_written: None,
        }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of blocks currently held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The pool blocks are drawn from.
    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    /// Writes `data` at `offset`, waiting for every transfer to complete.
    ///
    /// Returns the number of bytes written. When the pool runs dry midway,
    /// the bytes that did fit stay written, the length grows to cover them,
    /// and [`PoolError::Exhausted`] reports how far the write got.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, PoolError> {
        self.write_inner(offset, data, true)
    }

    /// Like [`write`](Self::write) but returns once all transfers are
    /// enqueued. Call [`sync`](Self::sync) to wait for them.
    pub fn write_async(&mut self, offset: usize, data: &[u8]) -> Result<usize, PoolError> {
        self.write_inner(offset, data, false)
    }

    /// Reads into `dst` starting at `offset` and returns the bytes read.
    ///
    /// The read stops at the logical length; reading at or past it returns 0.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<usize, PoolError> {
        if offset >= self.len {
            return Ok(0);
        }
        let total = dst.len().min(self.len - offset);

        let mut done = 0;
        while done < total {
            let pos = offset + done;
            let within = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(total - done);
            let out = &mut dst[done..done + chunk];

            match self.blocks.get(&(pos / BLOCK_SIZE)) {
                Some(block) => block.read(within, out)?,
                None => out.fill(0),
            }
            done += chunk;
        }

        Ok(total)
    }

    /// Waits for every write issued through this extent.
    pub fn sync(&self) -> Result<(), PoolError> {
        // The queue is in order, so the latest write completing covers the rest.
        match &self.last_written {
            Some(block) => block.sync(),
            None => Ok(()),
        }
    }

    /// Sets the logical length.
    ///
    /// Shrinking returns blocks that lie wholly past the new end to the pool
    /// and zeroes the cut-off tail of the last block kept, so growing again
    /// reads zeros. Growing only moves the length.
    pub fn truncate(&mut self, new_len: usize) -> Result<(), PoolError> {
        if new_len < self.len {
            self.sync()?;
            self.last_written = None;

            let keep = new_len.div_ceil(BLOCK_SIZE);
            let released = self.blocks.split_off(&keep).len();

            let within = new_len % BLOCK_SIZE;
            let index = new_len / BLOCK_SIZE;
            if within != 0 {
                if let Some(block) = self.blocks.get(&index) {
                    let old_end = (self.len - index * BLOCK_SIZE).min(BLOCK_SIZE);
                    block.write(within, &vec![0u8; old_end - within])?;
                }
            }

            tracing::debug!(new_len, released, "extent truncated");
        }

        self.len = new_len;
        Ok(())
    }

    /// Truncates to zero, returning every block to the pool.
    pub fn clear(&mut self) -> Result<(), PoolError> {
        self.truncate(0)
    }

    fn write_inner(
        &mut self,
        offset: usize,
        data: &[u8],
        blocking: bool,
    ) -> Result<usize, PoolError> {
        if offset.checked_add(data.len()).is_none() {
            return Err(PoolError::OffsetOverflow {
                offset,
                len: data.len(),
            });
        }

        let mut written = 0;

        while written < data.len() {
            let pos = offset + written;
            let index = pos / BLOCK_SIZE;
            let within = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(data.len() - written);

            let block = match self.blocks.get(&index).cloned() {
                Some(block) => block,
                None => match self.pool.allocate() {
                    Some(block) => {
                        self.blocks.insert(index, Arc::clone(&block));
                        block
                    }
                    None => break,
                },
            };

            let piece = &data[written..written + chunk];
            if blocking {
                block.write(within, piece)?;
            } else {
                block.write_async(within, piece)?;
            }
            self.last_written = Some(block);
            written += chunk;
        }

        if written > 0 {
            self.len = self.len.max(offset + written);
        }

        if written < data.len() {
            tracing::warn!(
                offset,
                written,
                requested = data.len(),
                "extent write ran out of blocks"
            );
            return Err(PoolError::Exhausted {
                written,
                requested: data.len(),
            });
        }
        Ok(written)
    }
}

impl std::fmt::Debug for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extent")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
