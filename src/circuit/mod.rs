// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod builder;
mod graph;
mod kernel;

pub use builder::CircuitBuilder;
pub use graph::KernelCircuit;
pub use kernel::{DeviceAddress, FieldRef, Kernel, KernelCategory, KernelId};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::backends::cpu::{AddScalarOp, ConstantOp, RecurrenceOp};
    use crate::traits::KernelOp;

    pub fn constant(value: f32) -> Arc<dyn KernelOp> {
        Arc::new(ConstantOp::new(value))
    }

    pub fn add_scalar(value: f32) -> Arc<dyn KernelOp> {
        Arc::new(AddScalarOp::new(value))
    }

    pub fn recurrence(initial: f32) -> Arc<dyn KernelOp> {
        Arc::new(RecurrenceOp::new(initial))
    }
}
