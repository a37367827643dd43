// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `vram-pool benchmark` command: concurrent block round trips.
//!
//! Each worker runs on tokio's blocking pool and repeatedly allocates a
//! block, fills it with a worker-specific pattern, reads it back and checks
//! it before dropping the handle.

use block_pool::{BlockPool, ByteSize, PoolConfig, BLOCK_SIZE};
use std::time::{Duration, Instant};

pub async fn execute(
    mut config: PoolConfig,
    capacity: String,
    workers: usize,
    rounds: usize,
    asynchronous: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(workers > 0, "at least one worker is required");

    config.initial_capacity = capacity;
    config.allow_partial = true;
    let pool = config.build_pool()?;
    anyhow::ensure!(pool.pool_size() > 0, "device granted no blocks");

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║           vram-pool · Benchmark                      ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!(
        "  Pool:         {} ({} blocks)",
        ByteSize::from_bytes(pool.pool_available()),
        pool.pool_size()
    );
    println!("  Workers:      {workers} x {rounds} rounds");
    println!("  Writes:       {}", if asynchronous { "async + sync" } else { "blocking" });
    println!();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let pool = pool.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(&pool, worker, rounds, asynchronous)
        }));
    }

    let mut completed = 0usize;
    let mut retries = 0usize;
    for handle in handles {
        let result = handle.await??;
        completed += result.completed;
        retries += result.retries;
    }
    let elapsed = start.elapsed();

    let bytes = (completed * BLOCK_SIZE * 2) as f64;
    let mib_per_sec = bytes / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(f64::EPSILON);

    println!("  Round trips:  {completed}");
    println!("  Retries:      {retries} (pool empty)");
    println!("  Elapsed:      {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Throughput:   {mib_per_sec:.1} MiB/s (written + read)");
    println!();
    println!("{}", pool.stats().summary());

    Ok(())
}

struct WorkerResult {
    completed: usize,
    retries: usize,
}

fn run_worker(
    pool: &BlockPool,
    worker: usize,
    rounds: usize,
    asynchronous: bool,
) -> anyhow::Result<WorkerResult> {
    let pattern: Vec<u8> = (0..BLOCK_SIZE)
        .map(|i| (i.wrapping_mul(31) ^ worker) as u8)
        .collect();
    let mut readback = vec![0u8; BLOCK_SIZE];
    let mut retries = 0;

    for round in 0..rounds {
        let block = loop {
            match pool.allocate() {
                Some(block) => break block,
                None => {
                    retries += 1;
                    std::thread::sleep(Duration::from_micros(50));
                }
            }
        };

        if asynchronous {
            block.write_async(0, &pattern)?;
            block.sync()?;
        } else {
            block.write(0, &pattern)?;
        }

        block.read(0, &mut readback)?;
        anyhow::ensure!(
            readback == pattern,
            "worker {worker} round {round}: read back different data"
        );
    }

    tracing::debug!(worker, rounds, retries, "worker finished");
    Ok(WorkerResult {
        completed: rounds,
        retries,
    })
}
