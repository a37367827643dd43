// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # vram-pool
//!
//! Command-line diagnostics for the block pool.
//!
//! ## Usage
//! ```bash
//! # List devices
//! vram-pool devices
//!
//! # Provision 64 MiB on device 1, accepting a partial pool
//! vram-pool provision 64M --device 1 --force
//!
//! # Hammer the pool from 8 workers with asynchronous writes
//! vram-pool benchmark --capacity 32M --workers 8 --async
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vram-pool",
    about = "Fixed-size device block pool diagnostics",
    version,
    author
)]
struct Cli {
    /// Path to a TOML pool configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend availability and the indexed device list.
    Devices,

    /// Provision a pool and report what the device granted.
    Provision {
        /// Capacity to provision (e.g., "64M", "1G", "5MB").
        size: String,

        /// Device index, as listed by `devices`.
        #[arg(short, long)]
        device: Option<usize>,

        /// Accept a smaller pool when the device runs out of memory.
        #[arg(short, long)]
        force: bool,

        /// Print pool statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run concurrent allocate/write/read workers against a pool.
    Benchmark {
        /// Pool capacity (e.g., "32M").
        #[arg(long, default_value = "32M")]
        capacity: String,

        /// Number of concurrent workers.
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Block round trips per worker.
        #[arg(long, default_value_t = 64)]
        rounds: usize,

        /// Use asynchronous writes followed by `sync`.
        #[arg(long = "async")]
        asynchronous: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices => commands::devices::execute(config).await,
        Commands::Provision {
            size,
            device,
            force,
            json,
        } => commands::provision::execute(config, size, device, force, json).await,
        Commands::Benchmark {
            capacity,
            workers,
            rounds,
            asynchronous,
        } => commands::benchmark::execute(config, capacity, workers, rounds, asynchronous).await,
    }
}
