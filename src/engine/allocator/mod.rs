// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Binding of virtual field registers to physical buffers.
//!
//! Policy, in priority order:
//! 1. A recurrent kernel and its driver share one flip-flop; sensors get a
//!    pipelined flip-flop of their own.
//! 2. Constants and output proxies get a dedicated latch.
//! 3. Roots and probed kernels get a dedicated latch so they stay readable
//!    between steps.
//! 4. Everything else joins a [`SharedLatch`] when buffer sharing is on, or
//!    gets a dedicated latch otherwise.
//!
//! Sharing is proven safe at allocation time against the device's queue
//! ordering; there is no runtime locking on field buffers.

mod latch_allocator;
mod shared_latch;

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::circuit::{DeviceAddress, FieldRef, KernelCircuit};
use crate::engine::scheduler::Schedule;
use crate::errors::CompileError;
use crate::memory::{BufferKind, FieldType};

pub use latch_allocator::{verify_sharing, LatchAllocator};
pub use shared_latch::{size_bin, InOrderQueue, LatchKey, LatchOrdering, OutOfOrderQueue, SharedLatch};

/// Ordering behavior of a device's command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    #[default]
    InOrder,
    OutOfOrder,
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueOrder::InOrder => write!(f, "in_order"),
            QueueOrder::OutOfOrder => write!(f, "out_of_order"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatorOptions {
    pub buffer_sharing: bool,
    pub latch_binning: bool,
    pub queue_order: QueueOrder,
    pub buffer_kind: BufferKind,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            buffer_sharing: true,
            latch_binning: false,
            queue_order: QueueOrder::InOrder,
            buffer_kind: BufferKind::default(),
        }
    }
}

/// Which half of a flip-flop a register uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipFlopRole {
    /// The recurrent kernel: reads and resets the master.
    Master,
    /// The recurrence driver: computes into and is read from the slave.
    Slave,
    /// A sensor: computes into the slave, consumers read the master, so they
    /// see the previous step's load.
    Pipelined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Latch { latch: usize, shared: bool },
    FlipFlop { flip_flop: usize, role: FlipFlopRole },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatchSpec {
    pub storage: FieldType,
    pub members: Vec<FieldRef>,
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlipFlopSpec {
    pub field_type: FieldType,
    pub members: Vec<FieldRef>,
}

/// The physical register plan for one device.
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocation {
    bindings: HashMap<FieldRef, Binding>,
    latches: Vec<LatchSpec>,
    flip_flops: Vec<FlipFlopSpec>,
    buffer_kind: BufferKind,
}

impl RegisterAllocation {
    pub(crate) fn new(
        bindings: HashMap<FieldRef, Binding>,
        latches: Vec<LatchSpec>,
        flip_flops: Vec<FlipFlopSpec>,
        buffer_kind: BufferKind,
    ) -> Self {
        Self {
            bindings,
            latches,
            flip_flops,
            buffer_kind,
        }
    }

    pub fn binding(&self, field: FieldRef) -> Option<Binding> {
        self.bindings.get(&field).copied()
    }

    pub fn latches(&self) -> &[LatchSpec] {
        &self.latches
    }

    pub fn flip_flops(&self) -> &[FlipFlopSpec] {
        &self.flip_flops
    }

    pub fn buffer_kind(&self) -> BufferKind {
        self.buffer_kind
    }

    pub fn virtual_registers(&self) -> usize {
        self.bindings.len()
    }

    pub fn shared_latches(&self) -> usize {
        self.latches.iter().filter(|latch| latch.shared).count()
    }

    /// Device bytes needed once every buffer has been materialized.
    pub fn bytes_required(&self) -> u64 {
        let latches: usize = self.latches.iter().map(|l| l.storage.byte_size()).sum();
        let flip_flops: usize = self.flip_flops.iter().map(|f| 2 * f.field_type.byte_size()).sum();
        (latches + flip_flops) as u64
    }

    pub fn check_capacity(&self, device: DeviceAddress, available: Option<u64>) -> Result<(), CompileError> {
        let required = self.bytes_required();
        match available {
            Some(available) if required > available => Err(CompileError::OutOfDeviceMemory {
                device,
                required,
                available,
            }),
            _ => Ok(()),
        }
    }
}

/// Allocates with the strategy matching the device's queue ordering.
pub fn allocate(
    circuit: &KernelCircuit,
    schedule: &Schedule,
    options: AllocatorOptions,
) -> Result<RegisterAllocation, CompileError> {
    match options.queue_order {
        QueueOrder::InOrder => LatchAllocator::new(InOrderQueue::new(schedule), options).allocate(circuit, schedule),
        QueueOrder::OutOfOrder => {
            LatchAllocator::new(OutOfOrderQueue::new(circuit), options).allocate(circuit, schedule)
        }
    }
}
