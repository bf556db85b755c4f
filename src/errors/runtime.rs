// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised while stepping, resetting and probing a running circuit.

use std::time::Duration;
use thiserror::Error;

use crate::circuit::FieldRef;

/// Failure reported by a kernel op's `compute` or `reset`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("expected {expected} inputs, got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("expected {expected} outputs, got {actual}")]
    OutputCount { expected: usize, actual: usize },

    #[error("shape mismatch: expected {expected} words, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("{message}")]
    Failed { message: String },
}

/// Failure reading, writing or copying field memory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldMemoryError {
    #[error("length mismatch: buffer holds {expected} words, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("type mismatch: {expected} vs {actual}")]
    TypeMismatch { expected: String, actual: String },
}

/// Errors surfaced through the supervision hierarchy.
///
/// Cloneable because a supervisor replays one remembered error to every
/// later requester.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A kernel launch failed; `preceding` lists the (up to two) kernels
    /// launched just before it, oldest first.
    #[error("Kernel '{kernel}' failed (preceded by [{}]): {source}", .preceding.join(", "))]
    KernelLaunch {
        kernel: String,
        preceding: Vec<String>,
        source: KernelError,
    },

    /// A message arrived that the protocol does not allow in the current state
    #[error("Protocol violation in {component}: {message}")]
    ProtocolViolation { component: String, message: String },

    /// Construction of the supervision hierarchy failed; replayed for every command
    #[error("Initialization failed: {reason}")]
    Initialization { reason: String },

    /// A blocking call ran past its bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Unknown field {0}")]
    UnknownField(FieldRef),

    /// The field's latch is shared with other registers, so its contents are
    /// not meaningful outside the step that produced them
    #[error("Field {0} shares its latch and cannot be probed; mark its kernel as probed")]
    FieldNotProbeable(FieldRef),

    /// A supervisor's mailbox closed
    #[error("Supervisor '{0}' is no longer running")]
    SupervisorGone(String),

    #[error("Field memory error: {0}")]
    Memory(#[from] FieldMemoryError),

    /// A cross-node frame could not be decoded
    #[error("Failed to decode field frame: {0}")]
    Decode(String),

    /// An allocator guarantee was broken at run time
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn protocol(component: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::ProtocolViolation {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether retrying is pointless because the runtime itself is broken.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::ProtocolViolation { .. }
                | RuntimeError::Initialization { .. }
                | RuntimeError::Internal(_)
        )
    }
}
