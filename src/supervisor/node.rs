// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::circuit::DeviceAddress;
use crate::engine::partitioner::{PartitionPlan, Topology};
use crate::errors::{CompileError, RuntimeError};
use crate::memory::FieldMemoryPool;
use crate::observability::messages::supervisor::SupervisorStarted;
use crate::observability::messages::StructuredLog;
use crate::supervisor::device::DeviceSupervisor;
use crate::supervisor::hub::{Hub, Routes};
use crate::supervisor::protocol::{mailbox, Address, Mailbox, UpLink};
use crate::supervisor::SupervisorOptions;

/// Supervises the devices of one node.
pub struct NodeSupervisor;

/// A node whose devices are built but not yet running.
pub struct PreparedNode {
    name: String,
    address: Address,
    mailbox: Mailbox,
    devices: Vec<(DeviceSupervisor, Mailbox, Address)>,
    routes: Routes,
}

impl NodeSupervisor {
    /// Builds every device of `node` without starting anything. Dropping the
    /// result returns whatever the built devices hold to `pool`.
    pub fn prepare(
        node: usize,
        topology: &Topology,
        plan: &PartitionPlan,
        options: &SupervisorOptions,
        pool: Arc<FieldMemoryPool>,
    ) -> Result<PreparedNode, RuntimeError> {
        let name = topology
            .nodes
            .get(node)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("node{node}"));
        let (address, mailbox) = mailbox(name.clone());
        let devices = Self::build_devices(node, topology, plan, options, pool, &address).map_err(|error| {
            RuntimeError::Initialization {
                reason: format!("{name}: {error}"),
            }
        })?;
        Ok(PreparedNode {
            routes: Self::routes(node, plan),
            name,
            address,
            mailbox,
            devices,
        })
    }

    /// Starts the devices of a prepared node and the node's own task.
    pub fn start(prepared: PreparedNode, up: UpLink, shutdown: &CancellationToken) -> Address {
        let PreparedNode {
            name,
            address,
            mailbox,
            devices,
            routes,
        } = prepared;
        let mut children = Vec::with_capacity(devices.len());
        for (device, device_mailbox, device_address) in devices {
            children.push(device_address);
            tokio::spawn(device.run(device_mailbox, shutdown.child_token()));
        }
        SupervisorStarted {
            component: &name,
            children: children.len(),
            exports: routes.exports.len(),
        }
        .log();
        let hub = Hub::new(name, up, children, routes, false);
        tokio::spawn(hub.run(mailbox, shutdown.child_token()));
        address
    }

    fn build_devices(
        node: usize,
        topology: &Topology,
        plan: &PartitionPlan,
        options: &SupervisorOptions,
        pool: Arc<FieldMemoryPool>,
        parent: &Address,
    ) -> Result<Vec<(DeviceSupervisor, Mailbox, Address)>, CompileError> {
        plan.partitions_on(node)
            .enumerate()
            .map(|(child, partition)| {
                let slot = topology
                    .device(partition.device)
                    .ok_or(CompileError::UnknownDevice {
                        device: partition.device,
                    })?;
                let device = DeviceSupervisor::new(slot, partition, options, pool.clone(), parent.uplink(child))?;
                let (address, mailbox) = mailbox(device.name().to_string());
                Ok((device, mailbox, address))
            })
            .collect()
    }

    fn routes(node: usize, plan: &PartitionPlan) -> Routes {
        let children: HashMap<DeviceAddress, usize> = plan
            .partitions_on(node)
            .enumerate()
            .map(|(child, partition)| (partition.device, child))
            .collect();

        let mut routes = Routes::default();
        for (kernel, device) in &plan.owners {
            if let Some(&child) = children.get(device) {
                routes.owners.insert(*kernel, child);
            }
        }
        for (field, consumers) in &plan.field_consumers {
            let local: Vec<usize> = consumers.iter().filter_map(|d| children.get(d).copied()).collect();
            if !local.is_empty() {
                routes.field_consumers.insert(*field, local);
            }
            let produced_here = plan.owner(field.kernel).is_some_and(|d| d.node == node);
            if produced_here && consumers.iter().any(|d| d.node != node) {
                routes.exports.insert(*field);
            }
        }
        routes
    }
}
