// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-pool devices` command: backend availability and device list.

use block_pool::{BlockPool, PoolConfig};

pub async fn execute(config: PoolConfig) -> anyhow::Result<()> {
    let pool = BlockPool::new(config.create_backend()?);

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           vram-pool · Devices                        ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Backend:      {}", pool.backend_name());

    if !pool.is_available() {
        println!("  Status:       no usable device");
        return Ok(());
    }
    println!("  Status:       available");
    println!();

    for (index, name) in pool.list_devices().iter().enumerate() {
        let marker = if index == config.device { "*" } else { " " };
        println!("  {marker} {index:>3}: {name}");
    }
    println!();
    println!("  Select a device with `vram-pool provision <size> --device <index>`.");

    Ok(())
}
