// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};

use crate::circuit::{FieldRef, KernelCircuit, KernelId};
use crate::engine::scheduler::Schedule;
use crate::memory::FieldType;

/// Compatibility class of a shared latch.
///
/// Image buffers live in a different memory kind, so they are always keyed
/// by exact type even when binning is on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LatchKey {
    Exact(FieldType),
    /// `log2` of the power-of-two byte bucket.
    Bin(u32),
}

impl LatchKey {
    pub fn for_type(field_type: &FieldType, binning: bool) -> Self {
        if binning && !field_type.is_image() {
            LatchKey::Bin(size_bin(field_type.byte_size()))
        } else {
            LatchKey::Exact(field_type.clone())
        }
    }
}

/// Smallest `n` with `bytes <= 2^n`.
pub fn size_bin(bytes: usize) -> u32 {
    bytes.max(1).next_power_of_two().trailing_zeros()
}

/// Proves that a set of consumers has finished before a producer runs.
pub trait LatchOrdering {
    fn completes_before(&self, consumers: &[KernelId], producer: KernelId) -> bool;

    /// Whether the ordering can say anything about `kernel` at all.
    fn knows(&self, kernel: KernelId) -> bool;

    fn label(&self) -> &'static str;
}

/// In-order command queue: the enqueue order is the execution order.
pub struct InOrderQueue<'a> {
    schedule: &'a Schedule,
}

impl<'a> InOrderQueue<'a> {
    pub fn new(schedule: &'a Schedule) -> Self {
        Self { schedule }
    }
}

impl LatchOrdering for InOrderQueue<'_> {
    fn completes_before(&self, consumers: &[KernelId], producer: KernelId) -> bool {
        let Some(producer_position) = self.schedule.position(producer) else {
            return false;
        };
        consumers.iter().all(|consumer| {
            self.schedule
                .position(*consumer)
                .is_some_and(|position| position < producer_position)
        })
    }

    fn knows(&self, kernel: KernelId) -> bool {
        self.schedule.position(kernel).is_some()
    }

    fn label(&self) -> &'static str {
        "in_order"
    }
}

/// Out-of-order command queue: only data dependencies serialize launches,
/// so a consumer is finished only if the producer transitively reads it.
pub struct OutOfOrderQueue {
    ancestors: HashMap<KernelId, HashSet<KernelId>>,
}

impl OutOfOrderQueue {
    pub fn new(circuit: &KernelCircuit) -> Self {
        Self {
            ancestors: circuit.ancestors(),
        }
    }
}

impl LatchOrdering for OutOfOrderQueue {
    fn completes_before(&self, consumers: &[KernelId], producer: KernelId) -> bool {
        let Some(upstream) = self.ancestors.get(&producer) else {
            return false;
        };
        consumers.iter().all(|consumer| upstream.contains(consumer))
    }

    fn knows(&self, kernel: KernelId) -> bool {
        self.ancestors.contains_key(&kernel)
    }

    fn label(&self) -> &'static str {
        "out_of_order"
    }
}

/// A group of virtual registers taking turns in one physical latch.
#[derive(Debug, Clone)]
pub struct SharedLatch {
    members: Vec<FieldRef>,
    /// Consumers of the current occupant.
    last_consumers: Vec<KernelId>,
    storage: FieldType,
    max_words: usize,
    min_words: usize,
    sealed: bool,
}

impl SharedLatch {
    pub fn new(field: FieldRef, field_type: &FieldType, consumers: &[KernelId]) -> Self {
        Self {
            members: vec![field],
            last_consumers: consumers.to_vec(),
            storage: field_type.clone(),
            max_words: field_type.words(),
            min_words: field_type.words(),
            sealed: false,
        }
    }

    pub fn can_accept<O: LatchOrdering>(&self, producer: KernelId, ordering: &O) -> bool {
        !self.sealed && ordering.completes_before(&self.last_consumers, producer)
    }

    /// Makes `field` the occupant. The caller has checked `can_accept`.
    pub fn join(&mut self, field: FieldRef, field_type: &FieldType, consumers: &[KernelId]) {
        let words = field_type.words();
        if words > self.max_words {
            self.max_words = words;
            self.storage = field_type.clone();
        }
        self.min_words = self.min_words.min(words);
        self.members.push(field);
        self.last_consumers = consumers.to_vec();
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn members(&self) -> &[FieldRef] {
        &self.members
    }

    /// The largest member type; every member views a prefix of it.
    pub fn storage(&self) -> &FieldType {
        &self.storage
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    pub fn min_words(&self) -> usize {
        self.min_words
    }
}
