// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Partition-boundary stand-ins.
//!
//! An output proxy forwards its input to the devices that consume it; the
//! device supervisor does the sending, the op itself only keeps the proxy's
//! own output defined. An input proxy must not complete until both the step
//! reaches it and the forwarded data has arrived, in whichever order those
//! happen. [`InputProxy`] tracks that.

use std::mem;

use crate::circuit::FieldRef;
use crate::errors::{KernelError, RuntimeError};
use crate::memory::{FieldMemory, FieldView, FieldViewMut};
use crate::traits::KernelOp;

/// Op attached to proxy kernels.
pub struct ProxyOp {
    name: &'static str,
}

impl ProxyOp {
    pub fn input() -> Self {
        Self { name: "input_proxy" }
    }

    pub fn output() -> Self {
        Self { name: "output_proxy" }
    }
}

impl KernelOp for ProxyOp {
    fn compute(&self, _inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        for output in outputs.iter_mut() {
            output.fill(0.0);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Default)]
pub enum InputProxyState {
    /// No step request and no data.
    #[default]
    Idle,
    /// The step reached the proxy before the data.
    WaitingForData,
    /// The data arrived before the step.
    WaitingForStep { data: FieldMemory },
}

/// Outcome of the step reaching an input proxy.
#[derive(Debug)]
pub enum ProxyStep {
    /// Data was already buffered; copy it and carry on.
    Ready(FieldMemory),
    /// Suspend the pass until the data arrives.
    Pending,
}

#[derive(Debug)]
pub struct InputProxy {
    source: FieldRef,
    state: InputProxyState,
}

impl InputProxy {
    pub fn new(source: FieldRef) -> Self {
        Self {
            source,
            state: InputProxyState::Idle,
        }
    }

    pub fn source(&self) -> FieldRef {
        self.source
    }

    pub fn state(&self) -> &InputProxyState {
        &self.state
    }

    fn component(&self) -> String {
        format!("input proxy for {}", self.source)
    }

    pub fn on_step(&mut self) -> Result<ProxyStep, RuntimeError> {
        match mem::take(&mut self.state) {
            InputProxyState::Idle => {
                self.state = InputProxyState::WaitingForData;
                Ok(ProxyStep::Pending)
            }
            InputProxyState::WaitingForStep { data } => Ok(ProxyStep::Ready(data)),
            InputProxyState::WaitingForData => {
                self.state = InputProxyState::WaitingForData;
                Err(RuntimeError::protocol(
                    self.component(),
                    "second Step before the first was matched with data",
                ))
            }
        }
    }

    /// Returns the data when a step was already waiting for it.
    pub fn on_data(&mut self, data: FieldMemory) -> Result<Option<FieldMemory>, RuntimeError> {
        match mem::take(&mut self.state) {
            InputProxyState::Idle => {
                self.state = InputProxyState::WaitingForStep { data };
                Ok(None)
            }
            InputProxyState::WaitingForData => Ok(Some(data)),
            waiting @ InputProxyState::WaitingForStep { .. } => {
                self.state = waiting;
                Err(RuntimeError::protocol(
                    self.component(),
                    "second FieldData before the first was consumed",
                ))
            }
        }
    }

    /// Drops whatever is outstanding. Returns true if anything was dropped.
    pub fn clear(&mut self) -> bool {
        !matches!(mem::take(&mut self.state), InputProxyState::Idle)
    }
}
