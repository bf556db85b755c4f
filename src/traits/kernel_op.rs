// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::KernelError;
use crate::memory::{FieldView, FieldViewMut};

/// Opaque "kernel execution" capability.
///
/// The runtime never interprets what an op computes. It hands the op views of
/// the input registers in input order and writable views of its output
/// registers, and reports whatever error comes back.
///
/// Ops may be shared by several kernel instances (constants replicated across
/// devices share one op), so any internal state needs interior mutability.
pub trait KernelOp: Send + Sync {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError>;

    /// Re-initializes internal state. Recurrent kernels write their initial
    /// value into `outputs`; most ops ignore them.
    fn reset(&self, outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        let _ = outputs;
        Ok(())
    }

    /// Ops that cannot run on an accelerator are placed on the node's CPU worker.
    fn requires_cpu(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}
