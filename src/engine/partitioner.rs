// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Maps a circuit onto nodes and devices.
//!
//! Placement walks the global postorder. An explicit placement wins; a
//! recurrence driver follows its recurrent kernel; ops that need the CPU go
//! to their node's CPU worker; other kernels inherit the device of their
//! first accelerator-resident input; sources are spread round-robin.
//!
//! Every edge that crosses devices is cut. A constant is replicated on the
//! consuming device. Anything else gets an output proxy next to the producer
//! and an input proxy next to the consumer, both aliased to the producer so
//! [`schedule_partition`] slots them into the global order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use crate::circuit::{DeviceAddress, FieldRef, Kernel, KernelCategory, KernelCircuit, KernelId};
use crate::engine::allocator::QueueOrder;
use crate::engine::proxy::ProxyOp;
use crate::engine::scheduler::{schedule_partition, Schedule};
use crate::errors::CompileError;
use crate::memory::FieldType;
use crate::observability::messages::engine::PartitionCompleted;
use crate::observability::messages::StructuredLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllocationMode {
    /// Everything on one accelerator of the first node.
    SingleDevice {
        #[serde(default)]
        device: usize,
    },
    /// All accelerators of the first node.
    MultiDevice,
    /// All accelerators of every node.
    Cluster,
}

impl Default for AllocationMode {
    fn default() -> Self {
        AllocationMode::SingleDevice { device: 0 }
    }
}

impl AllocationMode {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationMode::SingleDevice { .. } => "single_device",
            AllocationMode::MultiDevice => "multi_device",
            AllocationMode::Cluster => "cluster",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Accelerator,
    /// Runs kernels that cannot go on an accelerator.
    Cpu,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSlot {
    pub address: DeviceAddress,
    pub kind: DeviceKind,
    pub queue_order: QueueOrder,
    pub memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeTopology {
    pub name: String,
    /// Accelerators first, then the CPU worker if the node has one.
    pub devices: Vec<DeviceSlot>,
}

/// The devices available to the partitioner.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub nodes: Vec<NodeTopology>,
}

impl Topology {
    /// Builds a topology from per-node accelerator lists.
    pub fn new(nodes: Vec<(String, Vec<(QueueOrder, Option<u64>)>, bool)>) -> Self {
        let nodes = nodes
            .into_iter()
            .enumerate()
            .map(|(node, (name, accelerators, cpu_worker))| {
                let mut devices: Vec<DeviceSlot> = accelerators
                    .into_iter()
                    .enumerate()
                    .map(|(device, (queue_order, memory_bytes))| DeviceSlot {
                        address: DeviceAddress::new(node, device),
                        kind: DeviceKind::Accelerator,
                        queue_order,
                        memory_bytes,
                    })
                    .collect();
                if cpu_worker {
                    devices.push(DeviceSlot {
                        address: DeviceAddress::new(node, devices.len()),
                        kind: DeviceKind::Cpu,
                        queue_order: QueueOrder::InOrder,
                        memory_bytes: None,
                    });
                }
                NodeTopology { name, devices }
            })
            .collect();
        Self { nodes }
    }

    /// One node with one in-order accelerator and a CPU worker.
    pub fn single() -> Self {
        Self::new(vec![("node0".to_string(), vec![(QueueOrder::InOrder, None)], true)])
    }

    pub fn device(&self, address: DeviceAddress) -> Option<&DeviceSlot> {
        self.nodes.get(address.node)?.devices.get(address.device)
    }

    pub fn cpu_worker(&self, node: usize) -> Option<DeviceAddress> {
        self.nodes
            .get(node)?
            .devices
            .iter()
            .find(|slot| slot.kind == DeviceKind::Cpu)
            .map(|slot| slot.address)
    }

    fn accelerators(&self, node: usize) -> impl Iterator<Item = DeviceAddress> + '_ {
        self.nodes
            .get(node)
            .into_iter()
            .flat_map(|n| n.devices.iter())
            .filter(|slot| slot.kind == DeviceKind::Accelerator)
            .map(|slot| slot.address)
    }

    fn is_cpu(&self, address: DeviceAddress) -> bool {
        self.device(address).is_some_and(|slot| slot.kind == DeviceKind::Cpu)
    }
}

/// One device's share of the circuit.
#[derive(Debug, Clone)]
pub struct Partition {
    pub device: DeviceAddress,
    pub circuit: KernelCircuit,
    pub schedule: Schedule,
}

#[derive(Debug, Clone)]
pub struct PartitionPlan {
    pub mode: AllocationMode,
    /// Non-empty partitions in address order.
    pub partitions: Vec<Partition>,
    /// Device of every kernel of the original circuit.
    pub owners: HashMap<KernelId, DeviceAddress>,
    /// Devices holding an input proxy for each forwarded field.
    pub field_consumers: HashMap<FieldRef, BTreeSet<DeviceAddress>>,
}

impl PartitionPlan {
    pub fn nodes(&self) -> BTreeSet<usize> {
        self.partitions.iter().map(|p| p.device.node).collect()
    }

    pub fn partitions_on(&self, node: usize) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(move |p| p.device.node == node)
    }

    pub fn owner(&self, kernel: KernelId) -> Option<DeviceAddress> {
        self.owners.get(&kernel).copied()
    }
}

struct Placer<'a> {
    topology: &'a Topology,
    single: bool,
    candidates: Vec<DeviceAddress>,
    next: usize,
    pins: HashMap<KernelId, DeviceAddress>,
    partners: HashMap<KernelId, KernelId>,
    placed: HashMap<KernelId, DeviceAddress>,
}

impl<'a> Placer<'a> {
    fn new(circuit: &KernelCircuit, mode: AllocationMode, topology: &'a Topology) -> Result<Self, CompileError> {
        let no_devices = || CompileError::NoDevices {
            mode: mode.label().to_string(),
        };
        if topology.nodes.is_empty() {
            return Err(no_devices());
        }
        let candidates: Vec<DeviceAddress> = match mode {
            AllocationMode::SingleDevice { device } => {
                let address = DeviceAddress::new(0, device);
                match topology.device(address) {
                    Some(slot) if slot.kind == DeviceKind::Accelerator => vec![address],
                    _ => return Err(CompileError::UnknownDevice { device: address }),
                }
            }
            AllocationMode::MultiDevice => topology.accelerators(0).collect(),
            AllocationMode::Cluster => (0..topology.nodes.len())
                .flat_map(|node| topology.accelerators(node))
                .collect(),
        };
        if candidates.is_empty() {
            return Err(no_devices());
        }

        let single = matches!(mode, AllocationMode::SingleDevice { .. });
        let mut placer = Self {
            topology,
            single,
            candidates,
            next: 0,
            pins: HashMap::new(),
            partners: HashMap::new(),
            placed: HashMap::new(),
        };
        placer.pin_explicit(circuit, mode)?;
        Ok(placer)
    }

    fn pin_explicit(&mut self, circuit: &KernelCircuit, mode: AllocationMode) -> Result<(), CompileError> {
        if !self.single {
            for kernel in circuit.kernels() {
                if let Some(device) = kernel.placement {
                    let in_scope = mode == AllocationMode::Cluster || device.node == 0;
                    if !in_scope || self.topology.device(device).is_none() {
                        return Err(CompileError::UnknownDevice { device });
                    }
                    self.pins.insert(kernel.id, device);
                }
            }
        }

        for (recurrent, driver) in circuit.recurrences() {
            self.partners.insert(recurrent, driver.kernel);
            self.partners.insert(driver.kernel, recurrent);
            match (self.pins.get(&recurrent).copied(), self.pins.get(&driver.kernel).copied()) {
                (Some(a), Some(b)) if a != b => {
                    let name = |id: KernelId| circuit.kernel(id).map(|k| k.name.clone()).unwrap_or_default();
                    return Err(CompileError::RecurrenceSplit {
                        recurrent: name(recurrent),
                        driver: name(driver.kernel),
                    });
                }
                (Some(device), None) => {
                    self.pins.insert(driver.kernel, device);
                }
                (None, Some(device)) => {
                    self.pins.insert(recurrent, device);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn round_robin(&mut self) -> DeviceAddress {
        let device = self.candidates[self.next % self.candidates.len()];
        self.next += 1;
        device
    }

    fn choose(&mut self, kernel: &Kernel, circuit: &KernelCircuit) -> Result<DeviceAddress, CompileError> {
        if let Some(device) = self.pins.get(&kernel.id) {
            return Ok(*device);
        }

        let partner_needs_cpu = self
            .partners
            .get(&kernel.id)
            .and_then(|partner| circuit.kernel(*partner))
            .is_some_and(|partner| partner.op.requires_cpu());
        let inherited = kernel
            .inputs
            .iter()
            .filter_map(|input| self.placed.get(&input.kernel).copied())
            .find(|device| !self.topology.is_cpu(*device));

        if kernel.op.requires_cpu() || partner_needs_cpu {
            let node = match inherited {
                Some(device) => device.node,
                None => self.round_robin().node,
            };
            return self.topology.cpu_worker(node).ok_or_else(|| CompileError::NoCpuWorker {
                kernel: kernel.name.clone(),
                node,
            });
        }
        if self.single {
            return Ok(self.candidates[0]);
        }
        match inherited {
            Some(device) => Ok(device),
            None => Ok(self.round_robin()),
        }
    }

    fn place(&mut self, kernel: &Kernel, circuit: &KernelCircuit) -> Result<DeviceAddress, CompileError> {
        let device = self.choose(kernel, circuit)?;
        self.placed.insert(kernel.id, device);
        if let Some(partner) = self.partners.get(&kernel.id).copied() {
            self.pins.entry(partner).or_insert(device);
        }
        Ok(device)
    }
}

/// Splits `circuit` into per-device partitions for `mode` over `topology`.
pub fn partition(
    circuit: &KernelCircuit,
    mode: AllocationMode,
    topology: &Topology,
) -> Result<PartitionPlan, CompileError> {
    let mut placer = Placer::new(circuit, mode, topology)?;
    let postorder = circuit.postorder();
    for id in &postorder {
        let kernel = circuit
            .kernel(*id)
            .ok_or_else(|| CompileError::internal(format!("postorder names unknown kernel {id}")))?;
        placer.place(kernel, circuit)?;
    }
    let placed = placer.placed;

    let mut next_id = circuit.kernels().map(|k| k.id.0 + 1).max().unwrap_or(0);
    let mut fresh_id = move || {
        let id = KernelId(next_id);
        next_id += 1;
        id
    };

    let mut devices: BTreeMap<DeviceAddress, Vec<Kernel>> = BTreeMap::new();
    let mut replicas: HashMap<(KernelId, DeviceAddress), KernelId> = HashMap::new();
    let mut input_proxies: HashMap<(FieldRef, DeviceAddress), KernelId> = HashMap::new();
    let mut output_proxies: BTreeSet<FieldRef> = BTreeSet::new();
    let mut field_consumers: HashMap<FieldRef, BTreeSet<DeviceAddress>> = HashMap::new();

    for id in &postorder {
        let Some(original) = circuit.kernel(*id) else {
            continue;
        };
        let device = placed[id];
        let mut kernel = original.clone();
        kernel.placement = Some(device);
        // Global roots stay readable even when a partition forwards them.
        kernel.probed |= circuit.is_root(*id);

        for input in kernel.inputs.iter_mut() {
            let producer_device = placed[&input.kernel];
            if producer_device == device {
                continue;
            }
            let producer = circuit
                .kernel(input.kernel)
                .ok_or_else(|| CompileError::internal(format!("input {input} has no producer")))?;
            let field_type = circuit
                .field_type(*input)
                .ok_or_else(|| CompileError::internal(format!("input {input} has no type")))?
                .clone();

            if producer.category == KernelCategory::Constant {
                let replica = *replicas.entry((producer.id, device)).or_insert_with(|| {
                    let mut replica = producer.clone();
                    replica.id = fresh_id();
                    replica.aliases.insert(producer.id);
                    replica.placement = Some(device);
                    replica.probed = false;
                    let replica_id = replica.id;
                    devices.entry(device).or_default().push(replica);
                    replica_id
                });
                *input = FieldRef::new(replica, input.output);
                continue;
            }

            let source = *input;
            let proxy = *input_proxies.entry((source, device)).or_insert_with(|| {
                let mut proxy = Kernel::new(
                    fresh_id(),
                    format!("{}#in", producer.name),
                    Arc::new(ProxyOp::input()),
                    KernelCategory::InputProxy { source },
                    vec![],
                    vec![field_type],
                );
                proxy.aliases.insert(source.kernel);
                proxy.placement = Some(device);
                let proxy_id = proxy.id;
                devices.entry(device).or_default().push(proxy);
                proxy_id
            });
            *input = FieldRef::from(proxy);
            field_consumers.entry(source).or_default().insert(device);

            if output_proxies.insert(source) {
                let mut forward = Kernel::new(
                    fresh_id(),
                    format!("{}#out", producer.name),
                    Arc::new(ProxyOp::output()),
                    KernelCategory::OutputProxy { source },
                    vec![source],
                    vec![FieldType::scalar()],
                );
                forward.aliases.insert(source.kernel);
                forward.placement = Some(producer_device);
                devices.entry(producer_device).or_default().push(forward);
            }
        }
        devices.entry(device).or_default().push(kernel);
    }

    let mut partitions = Vec::with_capacity(devices.len());
    let mut proxies = 0;
    for (device, kernels) in devices {
        proxies += kernels.iter().filter(|k| k.category.is_proxy()).count();
        let sub = KernelCircuit::from_kernels(kernels)?;
        let schedule = schedule_partition(&sub, circuit)?;
        partitions.push(Partition {
            device,
            circuit: sub,
            schedule,
        });
    }

    PartitionCompleted {
        mode: mode.label(),
        kernels: circuit.len(),
        partitions: partitions.len(),
        proxies,
        replicas: replicas.len(),
    }
    .log();

    Ok(PartitionPlan {
        mode,
        partitions,
        owners: placed,
        field_consumers,
    })
}
