// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Immutable kernel DAG.
//!
//! Edges run from a kernel's input [`FieldRef`]s to the kernel. Recurrences
//! are feedback, not edges, so the graph stays acyclic even when a value is
//! carried from one step to the next.
//!
//! Traversal is deterministic: roots are visited in ascending id order and a
//! kernel's inputs in declaration order.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::circuit::{FieldRef, Kernel, KernelCategory, KernelId};
use crate::errors::CircuitError;
use crate::memory::FieldType;

#[derive(Debug, Clone, Default)]
pub struct KernelCircuit {
    kernels: BTreeMap<KernelId, Kernel>,
    consumers: HashMap<FieldRef, Vec<KernelId>>,
}

impl KernelCircuit {
    /// Validates and indexes a set of kernels.
    ///
    /// Checks that ids are unique, every input names an existing output, the
    /// input edges form no cycle, and every recurrence is fed by an ordinary
    /// kernel producing the recurrent kernel's type.
    pub fn from_kernels(kernels: Vec<Kernel>) -> Result<Self, CircuitError> {
        let mut by_id = BTreeMap::new();
        for kernel in kernels {
            if kernel.outputs.is_empty() {
                return Err(CircuitError::NoOutputs {
                    kernel: kernel.name.clone(),
                });
            }
            if by_id.contains_key(&kernel.id) {
                return Err(CircuitError::DuplicateKernel {
                    kernel: kernel.name.clone(),
                });
            }
            by_id.insert(kernel.id, kernel);
        }

        let mut consumers: HashMap<FieldRef, Vec<KernelId>> = HashMap::new();
        for kernel in by_id.values() {
            for input in &kernel.inputs {
                let exists = by_id
                    .get(&input.kernel)
                    .is_some_and(|source| input.output < source.outputs.len());
                if !exists {
                    return Err(CircuitError::UnresolvedInput {
                        kernel: kernel.name.clone(),
                        input: *input,
                    });
                }
                let entry = consumers.entry(*input).or_default();
                if !entry.contains(&kernel.id) {
                    entry.push(kernel.id);
                }
            }
        }

        let circuit = Self {
            kernels: by_id,
            consumers,
        };
        circuit.check_acyclic()?;
        circuit.check_recurrences()?;
        Ok(circuit)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn kernel(&self, id: KernelId) -> Option<&Kernel> {
        self.kernels.get(&id)
    }

    pub fn contains(&self, id: KernelId) -> bool {
        self.kernels.contains_key(&id)
    }

    /// Kernels in ascending id order.
    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.values()
    }

    pub fn field_type(&self, field: FieldRef) -> Option<&FieldType> {
        self.kernels
            .get(&field.kernel)
            .and_then(|kernel| kernel.outputs.get(field.output))
    }

    /// Kernels reading `field`, in ascending id order.
    pub fn consumers(&self, field: FieldRef) -> &[KernelId] {
        self.consumers.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every virtual register in the circuit.
    pub fn fields(&self) -> impl Iterator<Item = (FieldRef, &FieldType)> {
        self.kernels.values().flat_map(Kernel::output_fields)
    }

    /// Kernels with at least one output nobody reads.
    pub fn roots(&self) -> Vec<KernelId> {
        self.kernels
            .values()
            .filter(|kernel| {
                kernel
                    .output_fields()
                    .any(|(field, _)| self.consumers(field).is_empty())
            })
            .map(|kernel| kernel.id)
            .collect()
    }

    /// Kernels with no inputs.
    pub fn leaves(&self) -> Vec<KernelId> {
        self.kernels
            .values()
            .filter(|kernel| kernel.inputs.is_empty())
            .map(|kernel| kernel.id)
            .collect()
    }

    pub fn is_root(&self, id: KernelId) -> bool {
        self.kernels.get(&id).is_some_and(|kernel| {
            kernel
                .output_fields()
                .any(|(field, _)| self.consumers(field).is_empty())
        })
    }

    /// `(recurrent kernel, driver field)` for every recurrence.
    pub fn recurrences(&self) -> impl Iterator<Item = (KernelId, FieldRef)> + '_ {
        self.kernels.values().filter_map(|kernel| match kernel.category {
            KernelCategory::Recurrent { driver } => Some((kernel.id, driver)),
            _ => None,
        })
    }

    /// Visits every kernel after all of its inputs.
    pub fn traverse_postorder<F: FnMut(&Kernel)>(&self, mut visit: F) {
        let mut visited: HashSet<KernelId> = HashSet::with_capacity(self.kernels.len());
        let starts = self.roots().into_iter().chain(self.kernels.keys().copied());

        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            // (kernel, index of the next input to descend into)
            let mut stack: Vec<(KernelId, usize)> = vec![(start, 0)];
            visited.insert(start);
            while let Some((id, next_input)) = stack.pop() {
                let kernel = &self.kernels[&id];
                if let Some(input) = kernel.inputs.get(next_input) {
                    stack.push((id, next_input + 1));
                    if visited.insert(input.kernel) {
                        stack.push((input.kernel, 0));
                    }
                } else {
                    visit(kernel);
                }
            }
        }
    }

    /// Kernel ids in postorder.
    pub fn postorder(&self) -> Vec<KernelId> {
        let mut order = Vec::with_capacity(self.kernels.len());
        self.traverse_postorder(|kernel| order.push(kernel.id));
        order
    }

    /// All kernels as a flat bottom-up sequence.
    pub fn flatten(&self) -> Vec<&Kernel> {
        self.postorder()
            .into_iter()
            .map(|id| &self.kernels[&id])
            .collect()
    }

    /// Transitive inputs of every kernel. Used to prove ordering on
    /// out-of-order queues, where only data dependencies serialize work.
    pub fn ancestors(&self) -> HashMap<KernelId, HashSet<KernelId>> {
        let mut ancestors: HashMap<KernelId, HashSet<KernelId>> = HashMap::new();
        for id in self.postorder() {
            let mut set = HashSet::new();
            for input in &self.kernels[&id].inputs {
                set.insert(input.kernel);
                if let Some(upstream) = ancestors.get(&input.kernel) {
                    set.extend(upstream.iter().copied());
                }
            }
            ancestors.insert(id, set);
        }
        ancestors
    }

    fn check_acyclic(&self) -> Result<(), CircuitError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }
        let mut marks: HashMap<KernelId, Mark> = HashMap::new();

        for &start in self.kernels.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            let mut path: Vec<(KernelId, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Active);
            while let Some((id, next_input)) = path.last().copied() {
                let kernel = &self.kernels[&id];
                match kernel.inputs.get(next_input) {
                    Some(input) => {
                        if let Some(top) = path.last_mut() {
                            top.1 += 1;
                        }
                        match marks.get(&input.kernel) {
                            Some(Mark::Active) => {
                                let begin = path
                                    .iter()
                                    .position(|(k, _)| *k == input.kernel)
                                    .unwrap_or(0);
                                let mut cycle: Vec<String> = path[begin..]
                                    .iter()
                                    .map(|(k, _)| self.kernels[k].name.clone())
                                    .collect();
                                cycle.push(self.kernels[&input.kernel].name.clone());
                                return Err(CircuitError::CyclicDependency { cycle });
                            }
                            Some(Mark::Done) => {}
                            None => {
                                marks.insert(input.kernel, Mark::Active);
                                path.push((input.kernel, 0));
                            }
                        }
                    }
                    None => {
                        marks.insert(id, Mark::Done);
                        path.pop();
                    }
                }
            }
        }
        Ok(())
    }

    fn check_recurrences(&self) -> Result<(), CircuitError> {
        let mut driven: HashSet<FieldRef> = HashSet::new();
        for (recurrent_id, driver) in self.recurrences() {
            let recurrent = &self.kernels[&recurrent_id];
            let invalid = |reason: &str| CircuitError::InvalidDriver {
                kernel: driver.to_string(),
                recurrent: recurrent.name.clone(),
                reason: reason.to_string(),
            };

            let driver_kernel = self
                .kernels
                .get(&driver.kernel)
                .ok_or_else(|| invalid("driver kernel does not exist"))?;
            let driver_type = driver_kernel
                .outputs
                .get(driver.output)
                .ok_or_else(|| invalid("driver output does not exist"))?;
            if driver_kernel.category != KernelCategory::Ordinary {
                return Err(invalid("driver must be an ordinary kernel"));
            }
            if !driven.insert(driver) {
                return Err(invalid("driver already feeds another recurrence"));
            }
            if recurrent.outputs.len() != 1 || &recurrent.outputs[0] != driver_type {
                return Err(CircuitError::RecurrenceTypeMismatch {
                    recurrent: recurrent.name.clone(),
                    expected: recurrent.outputs[0].to_string(),
                    actual: driver_type.to_string(),
                });
            }
        }
        Ok(())
    }
}
