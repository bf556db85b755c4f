// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use super::shared_latch::{LatchKey, LatchOrdering, SharedLatch};
use super::{AllocatorOptions, Binding, FlipFlopRole, FlipFlopSpec, LatchSpec, RegisterAllocation};
use crate::circuit::{FieldRef, KernelCategory, KernelCircuit, KernelId};
use crate::engine::scheduler::Schedule;
use crate::errors::CompileError;
use crate::memory::FieldType;
use crate::observability::messages::engine::RegistersAllocated;
use crate::observability::messages::StructuredLog;

/// Register allocator parameterized by the queue ordering it must respect.
pub struct LatchAllocator<O> {
    ordering: O,
    options: AllocatorOptions,
}

#[derive(Default)]
struct Pending {
    bindings: HashMap<FieldRef, Binding>,
    latches: Vec<LatchSpec>,
    flip_flops: Vec<FlipFlopSpec>,
    /// Shared groups with the latch index each one was given.
    groups: Vec<(SharedLatch, usize)>,
    by_key: HashMap<LatchKey, Vec<usize>>,
}

impl Pending {
    fn flip_flop(&mut self, field_type: FieldType, members: &[(FieldRef, FlipFlopRole)]) {
        let flip_flop = self.flip_flops.len();
        self.flip_flops.push(FlipFlopSpec {
            field_type,
            members: members.iter().map(|(field, _)| *field).collect(),
        });
        for (field, role) in members {
            self.bindings.insert(*field, Binding::FlipFlop { flip_flop, role: *role });
        }
    }

    fn dedicated(&mut self, field: FieldRef, field_type: &FieldType) {
        let latch = self.latches.len();
        self.latches.push(LatchSpec {
            storage: field_type.clone(),
            members: vec![field],
            shared: false,
        });
        self.bindings.insert(field, Binding::Latch { latch, shared: false });
    }

    fn finish(mut self, options: &AllocatorOptions) -> RegisterAllocation {
        for (group, latch) in &mut self.groups {
            group.seal();
            self.latches[*latch] = LatchSpec {
                storage: group.storage().clone(),
                members: group.members().to_vec(),
                shared: true,
            };
        }
        RegisterAllocation::new(self.bindings, self.latches, self.flip_flops, options.buffer_kind)
    }
}

impl<O: LatchOrdering> LatchAllocator<O> {
    pub fn new(ordering: O, options: AllocatorOptions) -> Self {
        Self { ordering, options }
    }

    pub fn allocate(&self, circuit: &KernelCircuit, schedule: &Schedule) -> Result<RegisterAllocation, CompileError> {
        let mut pending = Pending::default();

        for (recurrent, driver) in circuit.recurrences() {
            let field = FieldRef::from(recurrent);
            let field_type = circuit
                .field_type(field)
                .ok_or_else(|| CompileError::internal(format!("recurrent kernel {recurrent} has no output")))?
                .clone();
            pending.flip_flop(
                field_type,
                &[(field, FlipFlopRole::Master), (driver, FlipFlopRole::Slave)],
            );
        }
        for kernel in circuit.kernels() {
            if kernel.category == KernelCategory::Sensor {
                for (field, field_type) in kernel.output_fields() {
                    pending.flip_flop(field_type.clone(), &[(field, FlipFlopRole::Pipelined)]);
                }
            }
        }

        for id in schedule.iter() {
            let kernel = circuit
                .kernel(id)
                .ok_or_else(|| CompileError::internal(format!("scheduled kernel {id} is not in the circuit")))?;
            let pinned = matches!(
                kernel.category,
                KernelCategory::Constant | KernelCategory::OutputProxy { .. }
            ) || kernel.probed;

            for (field, field_type) in kernel.output_fields() {
                if pending.bindings.contains_key(&field) {
                    continue;
                }
                let consumers = circuit.consumers(field);
                if pinned || consumers.is_empty() || !self.options.buffer_sharing {
                    pending.dedicated(field, field_type);
                } else {
                    self.share(&mut pending, field, field_type, id, consumers);
                }
            }
        }

        let unbound = circuit.fields().find(|(field, _)| !pending.bindings.contains_key(field));
        if let Some((field, _)) = unbound {
            return Err(CompileError::internal(format!("register {field} was never bound")));
        }

        let allocation = pending.finish(&self.options);
        verify_sharing(&allocation, circuit, &self.ordering)?;

        RegistersAllocated {
            strategy: self.ordering.label(),
            virtual_registers: allocation.virtual_registers(),
            latches: allocation.latches().len(),
            shared_latches: allocation.shared_latches(),
            flip_flops: allocation.flip_flops().len(),
            bytes: allocation.bytes_required(),
        }
        .log();
        Ok(allocation)
    }

    /// First-fit search over compatible groups; opens a new group if none fits.
    fn share(
        &self,
        pending: &mut Pending,
        field: FieldRef,
        field_type: &FieldType,
        producer: KernelId,
        consumers: &[KernelId],
    ) {
        let key = LatchKey::for_type(field_type, self.options.latch_binning);
        let candidates = pending.by_key.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        let found = candidates
            .iter()
            .copied()
            .find(|group| pending.groups[*group].0.can_accept(producer, &self.ordering));

        let group = match found {
            Some(group) => {
                pending.groups[group].0.join(field, field_type, consumers);
                group
            }
            None => {
                let latch = pending.latches.len();
                // Placeholder until the group is sealed in `finish`.
                pending.latches.push(LatchSpec {
                    storage: field_type.clone(),
                    members: Vec::new(),
                    shared: true,
                });
                let group = pending.groups.len();
                pending
                    .groups
                    .push((SharedLatch::new(field, field_type, consumers), latch));
                pending.by_key.entry(key).or_default().push(group);
                group
            }
        };

        let (shared, latch) = &mut pending.groups[group];
        if consumers.iter().any(|consumer| !self.ordering.knows(*consumer)) {
            shared.seal();
        }
        pending.bindings.insert(
            field,
            Binding::Latch {
                latch: *latch,
                shared: true,
            },
        );
    }
}

/// Re-checks every shared latch: each member's consumers must all finish
/// before any later member's producer runs, and every member must fit.
pub fn verify_sharing<O: LatchOrdering>(
    allocation: &RegisterAllocation,
    circuit: &KernelCircuit,
    ordering: &O,
) -> Result<(), CompileError> {
    for (index, latch) in allocation.latches().iter().enumerate() {
        if !latch.shared {
            continue;
        }
        for (position, earlier) in latch.members.iter().enumerate() {
            let fits = circuit
                .field_type(*earlier)
                .is_some_and(|field_type| field_type.words() <= latch.storage.words());
            if !fits {
                return Err(CompileError::internal(format!(
                    "register {earlier} does not fit shared latch {index}"
                )));
            }
            let consumers = circuit.consumers(*earlier);
            for later in &latch.members[position + 1..] {
                if !ordering.completes_before(consumers, later.kernel) {
                    return Err(CompileError::internal(format!(
                        "shared latch {index}: {later} may overwrite {earlier} before its consumers ran ({})",
                        ordering.label()
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cpu::AddOp;
    use crate::circuit::test_support::{add_scalar, constant, recurrence};
    use crate::circuit::CircuitBuilder;
    use crate::engine::allocator::{allocate, InOrderQueue, OutOfOrderQueue, QueueOrder};
    use crate::engine::scheduler::schedule;
    use crate::memory::BufferKind;
    use std::sync::Arc;

    fn options(queue_order: QueueOrder) -> AllocatorOptions {
        AllocatorOptions {
            queue_order,
            ..AllocatorOptions::default()
        }
    }

    fn latch_of(allocation: &RegisterAllocation, field: FieldRef) -> usize {
        match allocation.binding(field) {
            Some(Binding::Latch { latch, .. }) => latch,
            other => panic!("expected latch for {field}, got {other:?}"),
        }
    }

    /// a(const) -> b -> c -> d -> e(root)
    fn chain() -> (KernelCircuit, [FieldRef; 5]) {
        let t = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let c = builder.kernel("c", add_scalar(1.0), vec![b], t.clone()).unwrap();
        let d = builder.kernel("d", add_scalar(1.0), vec![c], t.clone()).unwrap();
        let e = builder.kernel("e", add_scalar(1.0), vec![d], t).unwrap();
        (builder.build().unwrap(), [a, b, c, d, e])
    }

    /// Two independent branches off a constant, joined at the root:
    /// b -> c and x -> y, then z = c + y.
    fn branches() -> (KernelCircuit, [FieldRef; 6]) {
        let t = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        let c = builder.kernel("c", add_scalar(1.0), vec![b], t.clone()).unwrap();
        let x = builder.kernel("x", add_scalar(2.0), vec![a], t.clone()).unwrap();
        let y = builder.kernel("y", add_scalar(2.0), vec![x], t.clone()).unwrap();
        let z = builder.kernel("z", Arc::new(AddOp), vec![c, y], t).unwrap();
        (builder.build().unwrap(), [a, b, c, x, y, z])
    }

    #[test]
    fn test_recurrence_shares_one_flip_flop() {
        let mut builder = CircuitBuilder::new();
        let counter = builder.recurrent("counter", recurrence(0.0), FieldType::scalar());
        let next = builder
            .kernel("next", add_scalar(1.0), vec![counter], FieldType::scalar())
            .unwrap();
        builder.feed(counter, next).unwrap();
        let circuit = builder.build().unwrap();
        let allocation = allocate(&circuit, &schedule(&circuit), AllocatorOptions::default()).unwrap();

        assert_eq!(
            allocation.binding(counter),
            Some(Binding::FlipFlop {
                flip_flop: 0,
                role: FlipFlopRole::Master
            })
        );
        assert_eq!(
            allocation.binding(next),
            Some(Binding::FlipFlop {
                flip_flop: 0,
                role: FlipFlopRole::Slave
            })
        );
        assert!(allocation.latches().is_empty());
        assert_eq!(allocation.bytes_required(), 8);
    }

    #[test]
    fn test_chain_reuses_latch_after_consumer_ran() {
        let (circuit, [a, b, c, d, e]) = chain();
        let allocation = allocate(&circuit, &schedule(&circuit), AllocatorOptions::default()).unwrap();

        assert_eq!(allocation.binding(a), Some(Binding::Latch { latch: 0, shared: false }));
        assert_eq!(latch_of(&allocation, b), latch_of(&allocation, d));
        assert_ne!(latch_of(&allocation, b), latch_of(&allocation, c));
        assert!(matches!(allocation.binding(e), Some(Binding::Latch { shared: false, .. })));
        assert_eq!(allocation.shared_latches(), 2);
    }

    #[test]
    fn test_in_order_shares_across_independent_branches() {
        let (circuit, [_, b, c, x, _, _]) = branches();
        let allocation = allocate(&circuit, &schedule(&circuit), options(QueueOrder::InOrder)).unwrap();
        assert_eq!(latch_of(&allocation, b), latch_of(&allocation, x));
        assert_ne!(latch_of(&allocation, c), latch_of(&allocation, x));
    }

    #[test]
    fn test_out_of_order_is_conservative_across_branches() {
        let (circuit, [_, b, _, x, _, _]) = branches();
        let in_order = allocate(&circuit, &schedule(&circuit), options(QueueOrder::InOrder)).unwrap();
        let out_of_order = allocate(&circuit, &schedule(&circuit), options(QueueOrder::OutOfOrder)).unwrap();

        assert_ne!(latch_of(&out_of_order, b), latch_of(&out_of_order, x));
        assert!(out_of_order.bytes_required() > in_order.bytes_required());
    }

    #[test]
    fn test_sharing_disabled_gives_dedicated_latches() {
        let (circuit, _) = chain();
        let options = AllocatorOptions {
            buffer_sharing: false,
            ..AllocatorOptions::default()
        };
        let allocation = allocate(&circuit, &schedule(&circuit), options).unwrap();
        assert_eq!(allocation.shared_latches(), 0);
        assert_eq!(allocation.latches().len(), circuit.len());
    }

    #[test]
    fn test_binning_shares_compatible_sizes() {
        let small = FieldType::scalar_field(&[3]);
        let large = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), small.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], small.clone()).unwrap();
        let c = builder.kernel("c", add_scalar(1.0), vec![b], small).unwrap();
        let d = builder.kernel("d", add_scalar(1.0), vec![c], large.clone()).unwrap();
        builder.kernel("e", add_scalar(1.0), vec![d], large).unwrap();
        let circuit = builder.build().unwrap();
        let schedule = schedule(&circuit);

        let exact = allocate(&circuit, &schedule, AllocatorOptions::default()).unwrap();
        assert_ne!(latch_of(&exact, b), latch_of(&exact, d));

        let binned_options = AllocatorOptions {
            latch_binning: true,
            ..AllocatorOptions::default()
        };
        let binned = allocate(&circuit, &schedule, binned_options).unwrap();
        let shared = latch_of(&binned, b);
        assert_eq!(shared, latch_of(&binned, d));
        assert_eq!(binned.latches()[shared].storage.words(), 4);
    }

    #[test]
    fn test_probed_kernel_keeps_dedicated_latch() {
        let t = FieldType::scalar_field(&[4]);
        let mut builder = CircuitBuilder::new();
        let a = builder.constant("a", constant(1.0), t.clone());
        let b = builder.kernel("b", add_scalar(1.0), vec![a], t.clone()).unwrap();
        builder.kernel("c", add_scalar(1.0), vec![b], t).unwrap();
        builder.probe(b.kernel).unwrap();
        let circuit = builder.build().unwrap();
        let allocation = allocate(&circuit, &schedule(&circuit), AllocatorOptions::default()).unwrap();
        assert!(matches!(allocation.binding(b), Some(Binding::Latch { shared: false, .. })));
    }

    #[test]
    fn test_verify_rejects_overlapping_lifetimes() {
        let (circuit, fields) = chain();
        let schedule = schedule(&circuit);
        // c reads b while writing, so b and c cannot share.
        let t = FieldType::scalar_field(&[4]);
        let mut bindings = HashMap::new();
        bindings.insert(fields[1], Binding::Latch { latch: 0, shared: true });
        bindings.insert(fields[2], Binding::Latch { latch: 0, shared: true });
        let bad = RegisterAllocation::new(
            bindings,
            vec![LatchSpec {
                storage: t,
                members: vec![fields[1], fields[2]],
                shared: true,
            }],
            vec![],
            BufferKind::Direct,
        );

        let in_order = verify_sharing(&bad, &circuit, &InOrderQueue::new(&schedule));
        assert!(matches!(in_order, Err(CompileError::Internal { .. })));
        let out_of_order = verify_sharing(&bad, &circuit, &OutOfOrderQueue::new(&circuit));
        assert!(matches!(out_of_order, Err(CompileError::Internal { .. })));
    }

    #[test]
    fn test_capacity_check() {
        let (circuit, _) = chain();
        let allocation = allocate(&circuit, &schedule(&circuit), AllocatorOptions::default()).unwrap();
        let device = crate::circuit::DeviceAddress::new(0, 0);
        assert!(allocation.check_capacity(device, None).is_ok());
        let err = allocation.check_capacity(device, Some(8)).unwrap_err();
        assert!(matches!(err, CompileError::OutOfDeviceMemory { available: 8, .. }));
    }
}
