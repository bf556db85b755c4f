// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::circuit::KernelCircuit;
use crate::engine::partitioner::{partition, AllocationMode, PartitionPlan, Topology};
use crate::errors::RuntimeError;
use crate::memory::FieldMemoryPool;
use crate::observability::messages::engine::CompileFailed;
use crate::observability::messages::supervisor::SupervisorStarted;
use crate::observability::messages::StructuredLog;
use crate::supervisor::hub::{Hub, Routes};
use crate::supervisor::node::NodeSupervisor;
use crate::supervisor::protocol::{mailbox, Address, UpLink};
use crate::supervisor::SupervisorOptions;

/// Top of the hierarchy: partitions the circuit and supervises one node
/// supervisor per node holding a partition.
pub struct ClusterSupervisor;

impl ClusterSupervisor {
    pub fn spawn(
        circuit: &KernelCircuit,
        topology: &Topology,
        options: &SupervisorOptions,
        pool: Arc<FieldMemoryPool>,
        up: UpLink,
        shutdown: &CancellationToken,
    ) -> Address {
        let name = "cluster";
        let (address, mailbox) = mailbox(name);

        let hub = match partition(circuit, options.mode, topology) {
            Ok(plan) => {
                let nodes: Vec<usize> = plan.nodes().into_iter().collect();
                // Every node is built before any starts, so one bad node leaves nothing running.
                let prepared = nodes
                    .iter()
                    .map(|&node| NodeSupervisor::prepare(node, topology, &plan, options, pool.clone()))
                    .collect::<Result<Vec<_>, _>>();
                match prepared {
                    Ok(prepared) => {
                        let children: Vec<Address> = prepared
                            .into_iter()
                            .enumerate()
                            .map(|(child, node)| NodeSupervisor::start(node, address.uplink(child), shutdown))
                            .collect();
                        let routes = Self::routes(&nodes, &plan);
                        SupervisorStarted {
                            component: name,
                            children: children.len(),
                            exports: 0,
                        }
                        .log();
                        Hub::new(name, up, children, routes, options.mode == AllocationMode::Cluster)
                    }
                    Err(error) => Hub::failed(name, up, error),
                }
            }
            Err(error) => {
                CompileFailed {
                    stage: "partition",
                    error: &error,
                }
                .log();
                Hub::failed(
                    name,
                    up,
                    RuntimeError::Initialization {
                        reason: error.to_string(),
                    },
                )
            }
        };
        tokio::spawn(hub.run(mailbox, shutdown.child_token()));
        address
    }

    fn routes(nodes: &[usize], plan: &PartitionPlan) -> Routes {
        let children: HashMap<usize, usize> = nodes.iter().enumerate().map(|(child, &node)| (node, child)).collect();

        let mut routes = Routes::default();
        for (kernel, device) in &plan.owners {
            if let Some(&child) = children.get(&device.node) {
                routes.owners.insert(*kernel, child);
            }
        }
        for (field, consumers) in &plan.field_consumers {
            let producer = plan.owner(field.kernel).map(|d| d.node);
            let remote: BTreeSet<usize> = consumers
                .iter()
                .map(|d| d.node)
                .filter(|node| Some(*node) != producer)
                .filter_map(|node| children.get(&node).copied())
                .collect();
            if !remote.is_empty() {
                routes.field_consumers.insert(*field, remote.into_iter().collect());
            }
        }
        routes
    }
}
