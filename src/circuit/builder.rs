// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::circuit::{DeviceAddress, FieldRef, Kernel, KernelCategory, KernelCircuit, KernelId};
use crate::errors::CircuitError;
use crate::memory::FieldType;
use crate::traits::KernelOp;

/// Incrementally assembles a [`KernelCircuit`].
///
/// Inputs must already exist when a kernel is added, so the result is acyclic
/// by construction. Recurrent kernels are created first and fed later with
/// [`CircuitBuilder::feed`], once their driver exists.
///
/// ```
/// use the_cogwheel::backends::cpu::{AddScalarOp, RecurrenceOp};
/// use the_cogwheel::circuit::CircuitBuilder;
/// use the_cogwheel::memory::FieldType;
/// use std::sync::Arc;
///
/// let mut builder = CircuitBuilder::new();
/// let counter = builder.recurrent("counter", Arc::new(RecurrenceOp::new(0.0)), FieldType::scalar());
/// let next = builder
///     .kernel("next", Arc::new(AddScalarOp::new(1.0)), vec![counter], FieldType::scalar())
///     .unwrap();
/// builder.feed(counter, next).unwrap();
/// let circuit = builder.build().unwrap();
/// assert_eq!(circuit.len(), 2);
/// ```
#[derive(Default)]
pub struct CircuitBuilder {
    kernels: Vec<Kernel>,
    unfed: Vec<KernelId>,
}

impl CircuitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> KernelId {
        KernelId(self.kernels.len() as u32)
    }

    fn push(&mut self, kernel: Kernel) -> KernelId {
        let id = kernel.id;
        self.kernels.push(kernel);
        id
    }

    fn get_mut(&mut self, id: KernelId) -> Result<&mut Kernel, CircuitError> {
        self.kernels
            .get_mut(id.0 as usize)
            .ok_or(CircuitError::UnknownKernel(id))
    }

    /// Adds a kernel with any number of inputs and outputs.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        op: Arc<dyn KernelOp>,
        category: KernelCategory,
        inputs: Vec<FieldRef>,
        outputs: Vec<FieldType>,
    ) -> Result<KernelId, CircuitError> {
        let name = name.into();
        for input in &inputs {
            let exists = self
                .kernels
                .get(input.kernel.0 as usize)
                .is_some_and(|source| input.output < source.outputs.len());
            if !exists {
                return Err(CircuitError::UnresolvedInput {
                    kernel: name,
                    input: *input,
                });
            }
        }
        if outputs.is_empty() {
            return Err(CircuitError::NoOutputs { kernel: name });
        }
        let id = self.next_id();
        Ok(self.push(Kernel::new(id, name, op, category, inputs, outputs)))
    }

    /// Adds an ordinary single-output kernel.
    pub fn kernel(
        &mut self,
        name: impl Into<String>,
        op: Arc<dyn KernelOp>,
        inputs: Vec<FieldRef>,
        output: FieldType,
    ) -> Result<FieldRef, CircuitError> {
        self.add(name, op, KernelCategory::Ordinary, inputs, vec![output])
            .map(FieldRef::from)
    }

    pub fn constant(&mut self, name: impl Into<String>, op: Arc<dyn KernelOp>, output: FieldType) -> FieldRef {
        let id = self.next_id();
        FieldRef::from(self.push(Kernel::new(
            id,
            name,
            op,
            KernelCategory::Constant,
            vec![],
            vec![output],
        )))
    }

    pub fn sensor(&mut self, name: impl Into<String>, op: Arc<dyn KernelOp>, output: FieldType) -> FieldRef {
        let id = self.next_id();
        FieldRef::from(self.push(Kernel::new(
            id,
            name,
            op,
            KernelCategory::Sensor,
            vec![],
            vec![output],
        )))
    }

    /// Adds a recurrent kernel. It must be fed before `build`.
    pub fn recurrent(&mut self, name: impl Into<String>, op: Arc<dyn KernelOp>, output: FieldType) -> FieldRef {
        let id = self.next_id();
        // Placeholder driver; replaced by `feed`.
        let category = KernelCategory::Recurrent {
            driver: FieldRef::from(id),
        };
        self.unfed.push(id);
        FieldRef::from(self.push(Kernel::new(id, name, op, category, vec![], vec![output])))
    }

    /// Closes the loop `recurrent <== driver`.
    pub fn feed(&mut self, recurrent: FieldRef, driver: FieldRef) -> Result<(), CircuitError> {
        let position = self
            .unfed
            .iter()
            .position(|id| *id == recurrent.kernel)
            .ok_or_else(|| CircuitError::NotRecurrent {
                kernel: self
                    .kernels
                    .get(recurrent.kernel.0 as usize)
                    .map(|k| k.name.clone())
                    .unwrap_or_else(|| recurrent.kernel.to_string()),
            })?;
        self.unfed.remove(position);
        self.get_mut(recurrent.kernel)?.category = KernelCategory::Recurrent { driver };
        Ok(())
    }

    /// Keeps the kernel's registers readable between steps.
    pub fn probe(&mut self, kernel: KernelId) -> Result<(), CircuitError> {
        self.get_mut(kernel)?.probed = true;
        Ok(())
    }

    pub fn place(&mut self, kernel: KernelId, device: DeviceAddress) -> Result<(), CircuitError> {
        self.get_mut(kernel)?.placement = Some(device);
        Ok(())
    }

    pub fn build(self) -> Result<KernelCircuit, CircuitError> {
        if let Some(unfed) = self.unfed.first() {
            return Err(CircuitError::MissingDriver {
                kernel: self.kernels[unfed.0 as usize].name.clone(),
            });
        }
        KernelCircuit::from_kernels(self.kernels)
    }
}
