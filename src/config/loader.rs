// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::circuit::KernelCircuit;
use crate::config::circuit_file::CircuitConfig;
use crate::config::consts::{
    DEFAULT_PROBE_TIMEOUT_SECONDS, DEFAULT_RESET_TIMEOUT_SECONDS, DEFAULT_STEP_TIMEOUT_SECONDS,
};
use crate::engine::allocator::QueueOrder;
use crate::engine::partitioner::{AllocationMode, Topology};
use crate::errors::ConfigError;
use crate::evaluator::Timeouts;
use crate::memory::BufferKind;
use crate::supervisor::{ProfileOptions, SupervisorOptions};

/// Runtime configuration: where the circuit runs and how registers are shared.
///
/// Every field has a default, so an empty file is a valid configuration for
/// one node with one in-order accelerator and a CPU worker.
///
/// # Example
/// ```yaml
/// allocation:
///   mode: multi_device
/// buffer_sharing: true
/// latch_binning: false
/// buffer_kind: pinned
/// timeouts:
///   step_seconds: 60
/// profile:
///   enabled: true
///   interval_steps: 500
/// nodes:
///   - name: node0
///     devices:
///       - queue_order: in_order
///         memory_bytes: 1073741824
///       - queue_order: out_of_order
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub allocation: AllocationMode,
    #[serde(default = "default_true")]
    pub buffer_sharing: bool,
    #[serde(default)]
    pub latch_binning: bool,
    #[serde(default)]
    pub buffer_kind: BufferKind,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub profile: ProfileOptions,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            allocation: AllocationMode::default(),
            buffer_sharing: true,
            latch_binning: false,
            buffer_kind: BufferKind::default(),
            timeouts: TimeoutConfig::default(),
            profile: ProfileOptions::default(),
            nodes: Vec::new(),
        }
    }
}

/// Bounds on evaluator calls.
///
/// The `*_millis` fields, when present, replace the matching `*_seconds`
/// value. They exist so tests can use sub-second bounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub step_seconds: u64,
    pub probe_seconds: u64,
    pub reset_seconds: u64,
    pub step_millis: Option<u64>,
    pub probe_millis: Option<u64>,
    pub reset_millis: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            step_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            probe_seconds: DEFAULT_PROBE_TIMEOUT_SECONDS,
            reset_seconds: DEFAULT_RESET_TIMEOUT_SECONDS,
            step_millis: None,
            probe_millis: None,
            reset_millis: None,
        }
    }
}

fn bound(seconds: u64, millis: Option<u64>) -> Duration {
    millis.map_or(Duration::from_secs(seconds), Duration::from_millis)
}

impl TimeoutConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            step: bound(self.step_seconds, self.step_millis),
            probe: bound(self.probe_seconds, self.probe_millis),
            reset: bound(self.reset_seconds, self.reset_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub cpu_worker: bool,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub queue_order: QueueOrder,
    /// Unbounded when absent.
    pub memory_bytes: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Nodes and devices as the partitioner sees them.
    pub fn topology(&self) -> Topology {
        if self.nodes.is_empty() {
            return Topology::single();
        }
        Topology::new(
            self.nodes
                .iter()
                .map(|node| {
                    let devices = node
                        .devices
                        .iter()
                        .map(|device| (device.queue_order, device.memory_bytes))
                        .collect();
                    (node.name.clone(), devices, node.cpu_worker)
                })
                .collect(),
        )
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            mode: self.allocation,
            buffer_sharing: self.buffer_sharing,
            latch_binning: self.latch_binning,
            buffer_kind: self.buffer_kind,
            profile: self.profile,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts.timeouts()
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = self.timeouts();
        if timeouts.step.is_zero() || timeouts.probe.is_zero() || timeouts.reset.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".to_string()));
        }
        if self.profile.enabled && self.profile.interval_steps == 0 {
            return Err(ConfigError::Invalid(
                "profile.interval_steps must be greater than zero".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate node name '{}'", node.name)));
            }
            if node.devices.is_empty() && !node.cpu_worker {
                return Err(ConfigError::Invalid(format!("node '{}' has no devices", node.name)));
            }
        }
        Ok(())
    }
}

/// Deserializes `path`, choosing the format from its extension.
fn parse_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        Some("toml") => Ok(toml::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load a runtime config from a YAML or TOML file and validate it.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, ConfigError> {
    let config: RuntimeConfig = parse_file(path)?;
    config.validate()?;
    Ok(config)
}

/// Load a circuit description without checking it.
pub fn load_circuit_config<P: AsRef<Path>>(path: P) -> Result<CircuitConfig, ConfigError> {
    parse_file(path)
}

/// Load a circuit description, validate it, and build the circuit.
pub fn load_circuit<P: AsRef<Path>>(path: P) -> Result<KernelCircuit, ConfigError> {
    load_circuit_config(path)?.build()
}
