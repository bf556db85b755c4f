// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::circuit::{FieldRef, KernelId};

/// Errors raised while building or describing a kernel circuit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircuitError {
    /// A kernel reads an output of a kernel that does not exist
    #[error("Kernel '{kernel}' reads {input} which does not exist")]
    UnresolvedInput { kernel: String, input: FieldRef },

    /// A kernel description names an input that was never declared
    #[error("Kernel '{kernel}' depends on '{missing}' which does not exist")]
    UnresolvedDependency { kernel: String, missing: String },

    /// Two kernels share an identity or description id
    #[error("Duplicate kernel id: '{kernel}'")]
    DuplicateKernel { kernel: String },

    /// The described graph contains a cycle that is not a recurrence
    #[error("Cyclic dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A recurrent kernel was never given a driver
    #[error("Recurrent kernel '{kernel}' has no driver")]
    MissingDriver { kernel: String },

    /// Only recurrent kernels can be fed
    #[error("Kernel '{kernel}' is not recurrent and cannot be fed")]
    NotRecurrent { kernel: String },

    /// A driver must be an ordinary kernel driving exactly one recurrence
    #[error("Kernel '{kernel}' cannot drive recurrence of '{recurrent}': {reason}")]
    InvalidDriver {
        kernel: String,
        recurrent: String,
        reason: String,
    },

    /// Driver and recurrent kernel disagree on field type
    #[error("Recurrence type mismatch for '{recurrent}': expected {expected}, driver produces {actual}")]
    RecurrenceTypeMismatch {
        recurrent: String,
        expected: String,
        actual: String,
    },

    /// Elementwise ops need every input shaped like their output
    #[error("Kernel '{kernel}' has shape {expected} but input '{input}' has shape {actual}")]
    ShapeMismatch {
        kernel: String,
        input: String,
        expected: String,
        actual: String,
    },

    /// Every kernel declares at least one output
    #[error("Kernel '{kernel}' declares no outputs")]
    NoOutputs { kernel: String },

    /// The op name in a circuit description is not known to the factory
    #[error("Kernel '{kernel}' uses unknown op '{op}'")]
    UnknownOp { kernel: String, op: String },

    /// Constants, sensors and recurrences take no inputs
    #[error("Kernel '{kernel}' uses source op '{op}' but lists inputs")]
    UnexpectedInputs { kernel: String, op: String },

    /// A kernel id was referenced that is not in the circuit
    #[error("Unknown kernel {0}")]
    UnknownKernel(KernelId),
}
