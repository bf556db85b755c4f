// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use super::ops::*;
use crate::config::KernelConfig;
use crate::errors::CircuitError;
use crate::traits::KernelOp;

/// How a described op participates in the circuit, before ids are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    Ordinary,
    Constant,
    Recurrent,
    Sensor,
}

/// Factory for the reference CPU kernel ops.
pub struct KernelOpFactory;

impl KernelOpFactory {
    /// Create an op instance from a kernel description.
    ///
    /// The `op` field selects the implementation:
    /// - "constant" -> ConstantOp (`value`, default 0)
    /// - "add_scalar" -> AddScalarOp (`value`, default 0)
    /// - "cpu_add_scalar" -> CpuAddScalarOp, runs on the node's CPU worker
    /// - "add" -> AddOp, sums all inputs
    /// - "scale" -> ScaleOp (`value`, default 1)
    /// - "recurrence" -> RecurrenceOp (`initial`, default 0), needs a `driver`
    /// - "ramp_sensor" -> RampSensorOp (`initial` start, `increment` default 1)
    pub fn create_op(config: &KernelConfig) -> Result<Arc<dyn KernelOp>, CircuitError> {
        let value = config.value.unwrap_or(0.0);
        match config.op.as_str() {
            "constant" => Ok(Arc::new(ConstantOp::new(value))),
            "add_scalar" => Ok(Arc::new(AddScalarOp::new(value))),
            "cpu_add_scalar" => Ok(Arc::new(CpuAddScalarOp::new(value))),
            "add" => Ok(Arc::new(AddOp)),
            "scale" => Ok(Arc::new(ScaleOp::new(config.value.unwrap_or(1.0)))),
            "recurrence" => Ok(Arc::new(RecurrenceOp::new(config.initial.unwrap_or(0.0)))),
            "ramp_sensor" => Ok(Arc::new(RampSensorOp::new(
                config.initial.unwrap_or(0.0),
                config.increment.unwrap_or(1.0),
            ))),
            _ => Err(CircuitError::UnknownOp {
                kernel: config.id.clone(),
                op: config.op.clone(),
            }),
        }
    }

    pub fn category_for(op: &str) -> OpCategory {
        match op {
            "constant" => OpCategory::Constant,
            "recurrence" => OpCategory::Recurrent,
            "ramp_sensor" => OpCategory::Sensor,
            _ => OpCategory::Ordinary,
        }
    }

    /// List all available op names
    pub fn list_available_implementations() -> Vec<&'static str> {
        vec![
            "constant",
            "add_scalar",
            "cpu_add_scalar",
            "add",
            "scale",
            "recurrence",
            "ramp_sensor",
        ]
    }

    pub fn is_implementation_available(op: &str) -> bool {
        Self::list_available_implementations().contains(&op)
    }
}
