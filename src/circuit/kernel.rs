// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::memory::FieldType;
use crate::traits::KernelOp;

/// Identity of a kernel, unique within the top-level circuit and its partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub u32);

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Identity of a virtual field register: one output of one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub kernel: KernelId,
    pub output: usize,
}

impl FieldRef {
    pub fn new(kernel: KernelId, output: usize) -> Self {
        Self { kernel, output }
    }
}

impl From<KernelId> for FieldRef {
    fn from(kernel: KernelId) -> Self {
        Self { kernel, output: 0 }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kernel, self.output)
    }
}

/// A device within the cluster: node index, then device index within the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress {
    pub node: usize,
    pub device: usize,
}

impl DeviceAddress {
    pub fn new(node: usize, device: usize) -> Self {
        Self { node, device }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}/dev{}", self.node, self.device)
    }
}

/// The kernel categories the allocator and device supervisor care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelCategory {
    Ordinary,
    /// Value never changes after reset.
    Constant,
    /// Holds last step's value of `driver`. The recurrence is a feedback
    /// edge, not a DAG input.
    Recurrent { driver: FieldRef },
    /// Loads external data each step; consumers see the previous load.
    Sensor,
    /// Stands in for `source`, computed on another device.
    InputProxy { source: FieldRef },
    /// Forwards `source` to the devices holding a matching input proxy.
    OutputProxy { source: FieldRef },
}

impl KernelCategory {
    pub fn label(&self) -> &'static str {
        match self {
            KernelCategory::Ordinary => "ordinary",
            KernelCategory::Constant => "constant",
            KernelCategory::Recurrent { .. } => "recurrent",
            KernelCategory::Sensor => "sensor",
            KernelCategory::InputProxy { .. } => "input_proxy",
            KernelCategory::OutputProxy { .. } => "output_proxy",
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(
            self,
            KernelCategory::InputProxy { .. } | KernelCategory::OutputProxy { .. }
        )
    }
}

/// A computation node in a kernel circuit.
#[derive(Clone)]
pub struct Kernel {
    pub id: KernelId,
    pub name: String,
    pub op: Arc<dyn KernelOp>,
    pub category: KernelCategory,
    pub inputs: Vec<FieldRef>,
    pub outputs: Vec<FieldType>,
    /// Original identities this kernel also stands for after partitioning.
    pub aliases: BTreeSet<KernelId>,
    pub placement: Option<DeviceAddress>,
    /// Probed kernels keep dedicated registers so they can be read between steps.
    pub probed: bool,
}

impl Kernel {
    pub fn new(
        id: KernelId,
        name: impl Into<String>,
        op: Arc<dyn KernelOp>,
        category: KernelCategory,
        inputs: Vec<FieldRef>,
        outputs: Vec<FieldType>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            op,
            category,
            inputs,
            outputs,
            aliases: BTreeSet::new(),
            placement: None,
            probed: false,
        }
    }

    /// True if this kernel is `id` or stands in for it.
    pub fn answers_to(&self, id: KernelId) -> bool {
        self.id == id || self.aliases.contains(&id)
    }

    pub fn output_fields(&self) -> impl Iterator<Item = (FieldRef, &FieldType)> + '_ {
        self.outputs
            .iter()
            .enumerate()
            .map(move |(index, field_type)| (FieldRef::new(self.id, index), field_type))
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("op", &self.op.name())
            .field("category", &self.category)
            .field("inputs", &self.inputs)
            .field("aliases", &self.aliases)
            .field("placement", &self.placement)
            .finish()
    }
}
