// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod circuit_file;
mod loader;
mod validation;

pub mod consts;

pub use circuit_file::{CircuitConfig, KernelConfig, PlacementConfig};
pub use loader::{
    load_circuit, load_circuit_config, load_config, DeviceConfig, NodeConfig, RuntimeConfig, TimeoutConfig,
};
pub use validation::validate_circuit_config;
