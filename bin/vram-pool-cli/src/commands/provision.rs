// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-pool provision` command: select a device and grow a pool.
//!
//! Without `--force` a device that cannot grant the full size is an error;
//! with it the shortfall is reported and the smaller pool kept.

use block_pool::{ByteSize, PoolConfig, PoolError};

pub async fn execute(
    mut config: PoolConfig,
    size: String,
    device: Option<usize>,
    force: bool,
    json: bool,
) -> anyhow::Result<()> {
    let requested = ByteSize::parse(&size)?;
    config.initial_capacity = size;
    config.allow_partial |= force;
    if let Some(device) = device {
        config.device = device;
    }

    let pool = match config.build_pool() {
        Ok(pool) => pool,
        Err(PoolError::InsufficientCapacity { requested, provisioned }) => {
            anyhow::bail!(
                "device {} granted only {} of {}; pass --force to accept a partial pool",
                config.device,
                ByteSize::from_bytes(provisioned),
                ByteSize::from_bytes(requested),
            );
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&pool.stats())?);
        return Ok(());
    }

    let provisioned = ByteSize::from_bytes(pool.pool_available());
    let name = pool
        .list_devices()
        .get(pool.device())
        .cloned()
        .unwrap_or_default();

    println!("  Device:       {} ({name})", pool.device());
    println!("  Requested:    {requested} ({} blocks)", requested.blocks());
    println!("  Provisioned:  {provisioned} ({} blocks)", pool.pool_size());
    if provisioned.as_bytes() < requested.as_bytes() {
        println!("  WARNING: device ran out of memory before the full size was provisioned");
    }
    println!();
    println!("{}", pool.stats().summary());

    Ok(())
}
