// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bottom-up execution order.
//!
//! Every device runs a subsequence of one global postorder of the
//! unpartitioned circuit. Committing to a single static order is what keeps
//! two devices from each waiting on the other's proxy.

use std::collections::{HashMap, HashSet};

use crate::circuit::{KernelCircuit, KernelId};
use crate::errors::CompileError;

/// A linear kernel order with O(1) position lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    order: Vec<KernelId>,
    positions: HashMap<KernelId, usize>,
}

impl Schedule {
    fn from_order(order: Vec<KernelId>) -> Self {
        let positions = order
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        Self { order, positions }
    }

    pub fn order(&self) -> &[KernelId] {
        &self.order
    }

    pub fn position(&self, id: KernelId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = KernelId> + '_ {
        self.order.iter().copied()
    }
}

/// Orders a whole circuit: every kernel after all of its inputs.
pub fn schedule(circuit: &KernelCircuit) -> Schedule {
    Schedule::from_order(circuit.postorder())
}

/// Orders one partition by walking the unpartitioned circuit's postorder.
///
/// For each global kernel, the partition kernels answering to it (by id or
/// alias) are emitted in the partition's own postorder, so an output proxy
/// lands right after the kernel it forwards. A result shorter or longer than
/// the partition means the partitioner left a dependency unsatisfied.
pub fn schedule_partition(subcircuit: &KernelCircuit, global: &KernelCircuit) -> Result<Schedule, CompileError> {
    let local = subcircuit.postorder();
    let local_position: HashMap<KernelId, usize> = local
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position))
        .collect();

    let mut answering: HashMap<KernelId, Vec<KernelId>> = HashMap::new();
    for kernel in subcircuit.kernels() {
        for id in std::iter::once(kernel.id).chain(kernel.aliases.iter().copied()) {
            answering.entry(id).or_default().push(kernel.id);
        }
    }
    for group in answering.values_mut() {
        group.sort_by_key(|id| local_position[id]);
    }

    let mut emitted: HashSet<KernelId> = HashSet::with_capacity(subcircuit.len());
    let mut order = Vec::with_capacity(subcircuit.len());
    for global_id in global.postorder() {
        if let Some(group) = answering.get(&global_id) {
            for id in group {
                if emitted.insert(*id) {
                    order.push(*id);
                }
            }
        }
    }

    if order.len() != subcircuit.len() {
        return Err(CompileError::internal(format!(
            "partition schedule covers {} of {} kernels",
            order.len(),
            subcircuit.len()
        )));
    }
    Ok(Schedule::from_order(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cpu::AddOp;
    use crate::circuit::test_support::{add_scalar, constant};
    use crate::circuit::{CircuitBuilder, FieldRef, Kernel, KernelCategory};
    use crate::memory::FieldType;
    use std::sync::Arc;

    fn layered() -> KernelCircuit {
        let t = FieldType::scalar_field(&[8]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), t.clone());
        let b = builder.constant("b", constant(2.0), t.clone());
        let c = builder.kernel("c", Arc::new(AddOp), vec![a, b], t.clone()).unwrap();
        let d = builder.kernel("d", add_scalar(1.0), vec![c], t.clone()).unwrap();
        let e = builder.kernel("e", add_scalar(2.0), vec![a], t.clone()).unwrap();
        builder.kernel("f", Arc::new(AddOp), vec![d, e, b], t).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_no_forward_references() {
        let circuit = layered();
        let schedule = schedule(&circuit);
        assert_eq!(schedule.len(), circuit.len());
        for kernel in circuit.kernels() {
            let position = schedule.position(kernel.id).unwrap();
            for input in &kernel.inputs {
                assert!(schedule.position(input.kernel).unwrap() < position);
            }
        }
    }

    #[test]
    fn test_partition_follows_global_order_with_aliases() {
        let global = layered();
        let t = FieldType::scalar_field(&[8]);
        // A partition holding `e` and a replica of `a` with a fresh id.
        let mut replica = Kernel::new(
            KernelId(100),
            "a",
            constant(1.0),
            KernelCategory::Constant,
            vec![],
            vec![t.clone()],
        );
        replica.aliases.insert(KernelId(0));
        let e = Kernel::new(
            KernelId(4),
            "e",
            add_scalar(2.0),
            KernelCategory::Ordinary,
            vec![FieldRef::from(KernelId(100))],
            vec![t],
        );
        let sub = KernelCircuit::from_kernels(vec![replica, e]).unwrap();

        let schedule = schedule_partition(&sub, &global).unwrap();
        assert_eq!(schedule.order(), &[KernelId(100), KernelId(4)]);
    }

    #[test]
    fn test_partition_with_unknown_kernel_is_internal_error() {
        let global = layered();
        let stray = Kernel::new(
            KernelId(42),
            "stray",
            constant(0.0),
            KernelCategory::Constant,
            vec![],
            vec![FieldType::scalar()],
        );
        let sub = KernelCircuit::from_kernels(vec![stray]).unwrap();
        let err = schedule_partition(&sub, &global).unwrap_err();
        assert!(matches!(err, CompileError::Internal { .. }));
    }
}
