// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::backends::cpu::{KernelOpFactory, OpCategory};
use crate::circuit::{CircuitBuilder, DeviceAddress, FieldRef, KernelCircuit, KernelId};
use crate::config::validation::validate_circuit_config;
use crate::errors::{CircuitError, ConfigError};
use crate::memory::FieldType;

/// A circuit description.
///
/// Inputs and drivers name other kernels by `id`, optionally followed by
/// `:<output>` to pick an output other than the first. A recurrence lists
/// no inputs; its `driver` closes the loop.
///
/// # Example
/// ```yaml
/// kernels:
///   - id: count
///     op: recurrence
///     initial: 0
///     driver: next
///     probed: true
///   - id: next
///     op: add_scalar
///     value: 1
///     inputs: [count]
///     device: { node: 0, device: 0 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CircuitConfig {
    pub kernels: Vec<KernelConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KernelConfig {
    pub id: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Field shape; `[]` is a single scalar. When absent, the kernel takes
    /// the shape of its first input, and sources are scalars.
    pub shape: Option<Vec<usize>>,
    pub value: Option<f32>,
    pub initial: Option<f32>,
    pub increment: Option<f32>,
    pub driver: Option<String>,
    #[serde(default)]
    pub probed: bool,
    pub device: Option<PlacementConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PlacementConfig {
    #[serde(default)]
    pub node: usize,
    pub device: usize,
}

/// Splits `id[:output]`. A malformed output index yields `None`.
pub(crate) fn parse_input(reference: &str) -> Option<(&str, usize)> {
    match reference.rsplit_once(':') {
        Some((id, output)) => output.parse().ok().map(|output| (id, output)),
        None => Some((reference, 0)),
    }
}

impl CircuitConfig {
    /// Validates the description and builds the circuit.
    pub fn build(&self) -> Result<KernelCircuit, ConfigError> {
        validate_circuit_config(self).map_err(ConfigError::Validation)?;

        let shapes = self.shapes();
        let mut builder = CircuitBuilder::new();
        let mut ids: HashMap<&str, KernelId> = HashMap::new();
        for config in self.build_order() {
            let op = KernelOpFactory::create_op(config)?;
            let shape = shapes.get(config.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let output = FieldType::scalar_field(shape);
            let field = match KernelOpFactory::category_for(&config.op) {
                OpCategory::Constant => builder.constant(&config.id, op, output),
                OpCategory::Sensor => builder.sensor(&config.id, op, output),
                OpCategory::Recurrent => builder.recurrent(&config.id, op, output),
                OpCategory::Ordinary => {
                    let inputs = config
                        .inputs
                        .iter()
                        .map(|input| resolve(&ids, &config.id, input))
                        .collect::<Result<Vec<_>, _>>()?;
                    builder.kernel(&config.id, op, inputs, output)?
                }
            };
            if config.probed {
                builder.probe(field.kernel)?;
            }
            if let Some(placement) = config.device {
                builder.place(field.kernel, DeviceAddress::new(placement.node, placement.device))?;
            }
            ids.insert(config.id.as_str(), field.kernel);
        }

        for config in &self.kernels {
            if let Some(driver) = &config.driver {
                let recurrent = ids
                    .get(config.id.as_str())
                    .copied()
                    .ok_or_else(|| CircuitError::MissingDriver {
                        kernel: config.id.clone(),
                    })?;
                builder.feed(FieldRef::from(recurrent), resolve(&ids, &config.id, driver)?)?;
            }
        }
        Ok(builder.build()?)
    }

    /// The shape of every kernel, declared or inherited from its first input.
    pub(crate) fn shapes(&self) -> HashMap<&str, Vec<usize>> {
        let mut shapes: HashMap<&str, Vec<usize>> = HashMap::new();
        for config in self.build_order() {
            let shape = match &config.shape {
                Some(shape) => shape.clone(),
                None => config
                    .inputs
                    .first()
                    .and_then(|input| parse_input(input))
                    .and_then(|(id, _)| shapes.get(id).cloned())
                    .unwrap_or_default(),
            };
            shapes.insert(config.id.as_str(), shape);
        }
        shapes
    }

    /// Kernels ordered so every input precedes its consumers.
    pub(crate) fn build_order(&self) -> Vec<&KernelConfig> {
        let by_id: HashMap<&str, &KernelConfig> = self.kernels.iter().map(|k| (k.id.as_str(), k)).collect();
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.kernels.len());

        fn visit<'a>(
            kernel: &'a KernelConfig,
            by_id: &HashMap<&str, &'a KernelConfig>,
            visited: &mut HashSet<&'a str>,
            order: &mut Vec<&'a KernelConfig>,
        ) {
            if !visited.insert(kernel.id.as_str()) {
                return;
            }
            for input in &kernel.inputs {
                if let Some(source) = parse_input(input).and_then(|(id, _)| by_id.get(id)) {
                    visit(source, by_id, visited, order);
                }
            }
            order.push(kernel);
        }

        for kernel in &self.kernels {
            visit(kernel, &by_id, &mut visited, &mut order);
        }
        order
    }
}

fn resolve(ids: &HashMap<&str, KernelId>, kernel: &str, reference: &str) -> Result<FieldRef, CircuitError> {
    parse_input(reference)
        .and_then(|(id, output)| ids.get(id).map(|source| FieldRef::new(*source, output)))
        .ok_or_else(|| CircuitError::UnresolvedDependency {
            kernel: kernel.to_string(),
            missing: reference.to_string(),
        })
}
