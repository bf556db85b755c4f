// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for scheduling, register allocation and partitioning.

use thiserror::Error;

use crate::circuit::DeviceAddress;
use crate::errors::CircuitError;

/// Errors raised while turning a circuit into partitions, schedules and
/// register bindings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Something the scheduler or allocator guarantees did not hold. Never retried.
    #[error("Internal compiler error: {message}")]
    Internal { message: String },

    /// The partition produced an invalid sub-circuit
    #[error("Invalid partition circuit: {0}")]
    Circuit(#[from] CircuitError),

    /// A device does not have room for the registers bound to it
    #[error("Out of memory on device {device}: {required} bytes required, {available} available")]
    OutOfDeviceMemory {
        device: DeviceAddress,
        required: u64,
        available: u64,
    },

    /// The topology has no device to place kernels on
    #[error("No devices available for allocation mode '{mode}'")]
    NoDevices { mode: String },

    /// A placement or single-device index names a device that does not exist
    #[error("Unknown device {device}")]
    UnknownDevice { device: DeviceAddress },

    /// A kernel requires CPU execution but its node has no CPU worker
    #[error("Kernel '{kernel}' requires a CPU worker but node {node} has none")]
    NoCpuWorker { kernel: String, node: usize },

    /// A recurrent kernel and its driver were pinned to different devices
    #[error("Recurrence '{recurrent}' and its driver '{driver}' are pinned to different devices")]
    RecurrenceSplit { recurrent: String, driver: String },
}

impl CompileError {
    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }
}
