// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! backend = "simulated"
//! device = 0
//! initial_capacity = "64M"
//! allow_partial = false
//!
//! [[simulated_devices]]
//! name = "Simulated GPU 0"
//! memory = "1G"
//! transfer_latency_us = 0
//! ```

use crate::{BlockPool, ByteSize, PoolError};
use compute_backend::{BackendError, ComputeBackend, SimulatedBackend, SimulatedDevice};
use std::path::Path;
use std::sync::Arc;

/// Configuration for a block pool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    /// Backend name. Only `"simulated"` ships with this crate.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Device index to bind the pool to.
    #[serde(default)]
    pub device: usize,
    /// Capacity provisioned by [`build_pool`](Self::build_pool), e.g. `"64M"`.
    pub initial_capacity: String,
    /// Accept a pool smaller than `initial_capacity` when the device runs out.
    #[serde(default)]
    pub allow_partial: bool,
    /// Devices exposed by the simulated backend.
    #[serde(default = "default_simulated_devices")]
    pub simulated_devices: Vec<SimulatedDeviceConfig>,
}

/// One simulated device as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimulatedDeviceConfig {
    /// Name reported by `list_devices`.
    pub name: String,
    /// Device memory, e.g. `"1G"`.
    pub memory: String,
    /// Delay applied to every queued transfer, in microseconds.
    #[serde(default)]
    pub transfer_latency_us: u64,
}

fn default_backend() -> String {
    "simulated".to_string()
}

fn default_simulated_devices() -> Vec<SimulatedDeviceConfig> {
    vec![SimulatedDeviceConfig {
        name: "Simulated GPU 0".to_string(),
        memory: "1G".to_string(),
        transfer_latency_us: 0,
    }]
}

impl PoolConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PoolError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PoolError> {
        toml::from_str(toml_str).map_err(|e| PoolError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PoolError> {
        toml::to_string_pretty(self)
            .map_err(|e| PoolError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses the initial capacity string.
    pub fn parse_capacity(&self) -> Result<ByteSize, PoolError> {
        ByteSize::parse(&self.initial_capacity)
    }

    /// Creates the backend named by this config.
    pub fn create_backend(&self) -> Result<Arc<dyn ComputeBackend>, PoolError> {
        match self.backend.to_lowercase().as_str() {
            "simulated" | "sim" => {
                let devices = self
                    .simulated_devices
                    .iter()
                    .map(|d| {
                        let memory = ByteSize::parse(&d.memory)?;
                        Ok(SimulatedDevice {
                            name: d.name.clone(),
                            memory_bytes: memory.as_bytes(),
                            transfer_latency_us: d.transfer_latency_us,
                        })
                    })
                    .collect::<Result<Vec<_>, PoolError>>()?;
                Ok(Arc::new(SimulatedBackend::new(devices)))
            }
            other => Err(PoolError::Config(format!(
                "unknown backend '{other}'; expected 'simulated'"
            ))),
        }
    }

    /// Creates the backend, selects the device and provisions
    /// `initial_capacity`.
    ///
    /// A shortfall is an error unless `allow_partial` is set, in which case
    /// it is logged and the smaller pool is returned.
    pub fn build_pool(&self) -> Result<BlockPool, PoolError> {
        let capacity = self.parse_capacity()?;
        let pool = BlockPool::new(self.create_backend()?);

        if !pool.is_available() {
            return Err(PoolError::Backend(BackendError::NoDevice));
        }
        pool.set_device(self.device)?;

        let provisioned = pool.increase_pool(capacity.as_bytes())?;
        if provisioned < capacity.as_bytes() {
            if !self.allow_partial {
                return Err(PoolError::InsufficientCapacity {
                    requested: capacity.as_bytes(),
                    provisioned,
                });
            }
            tracing::warn!(
                requested = capacity.as_bytes(),
                provisioned,
                "only part of the requested capacity could be provisioned"
            );
        }

        Ok(pool)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device: 0,
            initial_capacity: "64M".to_string(),
            allow_partial: false,
            simulated_devices: default_simulated_devices(),
        }
    }
}
