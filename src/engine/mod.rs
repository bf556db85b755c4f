// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod allocator;
pub mod partitioner;
pub mod proxy;
pub mod scheduler;

pub use allocator::{allocate, AllocatorOptions, Binding, FlipFlopRole, QueueOrder, RegisterAllocation};
pub use partitioner::{partition, AllocationMode, DeviceKind, DeviceSlot, Partition, PartitionPlan, Topology};
pub use proxy::{InputProxy, InputProxyState, ProxyOp, ProxyStep};
pub use scheduler::{schedule, schedule_partition, Schedule};
