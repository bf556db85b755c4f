// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::KernelError;
use crate::memory::{FieldView, FieldViewMut};
use crate::traits::KernelOp;

/// An op that always fails for testing failure scenarios
pub struct FailingOp {
    pub message: String,
}

impl FailingOp {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl KernelOp for FailingOp {
    fn compute(&self, _inputs: &[FieldView<'_>], _outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        Err(KernelError::Failed {
            message: self.message.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Copies its first input (or zeros) and counts calls.
#[derive(Default)]
pub struct CountingOp {
    computes: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl CountingOp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles that stay readable after the op moves into a circuit.
    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (self.computes.clone(), self.resets.clone())
    }
}

impl KernelOp for CountingOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        for output in outputs.iter_mut() {
            match inputs.first() {
                Some(input) if input.data.len() == output.data.len() => output.data.copy_from_slice(input.data),
                _ => output.fill(0.0),
            }
        }
        Ok(())
    }

    fn reset(&self, _outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Wraps another op and blocks for `delay` before each compute while switched on.
pub struct SlowOp {
    inner: Arc<dyn KernelOp>,
    delay: Duration,
    enabled: Arc<AtomicBool>,
}

impl SlowOp {
    pub fn new(inner: Arc<dyn KernelOp>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Turns the delay on or off after the op moves into a circuit.
    pub fn switch(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }
}

impl KernelOp for SlowOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        if self.enabled.load(Ordering::SeqCst) {
            std::thread::sleep(self.delay);
        }
        self.inner.compute(inputs, outputs)
    }

    fn reset(&self, outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        self.inner.reset(outputs)
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}
