// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # block-pool
//!
//! A pool of fixed-size device memory blocks, handed out as
//! reference-counted handles.
//!
//! # Key Components
//!
//! - [`BlockPool`]: owns every provisioned device buffer, grows on
//!   request, and keeps the free list.
//! - [`Block`] / [`BlockRef`]: one [`BLOCK_SIZE`] unit of device memory
//!   with blocking reads, blocking or asynchronous writes, and `sync`.
//!   Dropping the last reference returns the block to the pool.
//! - [`Extent`]: a sparse byte range spread over many blocks.
//! - [`ByteSize`]: human-readable provisioning sizes (`"64M"`, `"5MB"`).
//! - [`PoolConfig`]: TOML configuration that builds a ready pool.
//! - [`PoolStats`]: cumulative allocator counters.
//!
//! # Ownership Model
//!
//! ```text
//! BlockPool::allocate()
//!       │
//!       ▼
//!   Arc<Block>  ◄─── owns DeviceBuffer, holds Arc<PoolInner>
//!       │
//!       │  last reference dropped
//!       ▼
//!   wait for pending write ──► PoolInner::reclaim() ──► free list
//! ```
//!
//! Blocks keep the pool's inner state alive, so the pool handle can be
//! dropped before its blocks. Device buffers go back to the device only on
//! [`BlockPool::shutdown`] or when the pool and all its blocks are gone.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use block_pool::{BlockPool, BLOCK_SIZE};
//! use compute_backend::SimulatedBackend;
//!
//! let pool = BlockPool::new(Arc::new(SimulatedBackend::single(16 * BLOCK_SIZE)));
//! pool.increase_pool(4 * BLOCK_SIZE).unwrap();
//!
//! let block = pool.allocate().unwrap();
//! block.write_async(0, b"hello").unwrap();
//! block.sync().unwrap();
//!
//! let mut out = [0u8; 5];
//! block.read(0, &mut out).unwrap();
//! assert_eq!(&out, b"hello");
//!
//! drop(block);
//! assert_eq!(pool.pool_available(), 4 * BLOCK_SIZE);
//! ```

mod block;
mod config;
mod error;
mod extent;
mod pool;
mod size;
mod stats;

pub use block::{Block, BlockRef};
pub use config::{PoolConfig, SimulatedDeviceConfig};
pub use error::PoolError;
pub use extent::Extent;
pub use pool::BlockPool;
pub use size::ByteSize;
pub use stats::PoolStats;

/// Size of every block in bytes (128 KiB).
pub const BLOCK_SIZE: usize = 128 * 1024;
