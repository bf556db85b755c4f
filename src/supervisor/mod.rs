// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The supervision hierarchy: one cluster supervisor over one node
//! supervisor per node over one device supervisor per device.
//!
//! Each supervisor is a task draining its own mailbox. Parents fan passes out
//! to children and report once every child has answered; probes go straight
//! to the child owning the kernel; field data produced on one device moves
//! up only as far as the lowest supervisor that sees both ends.

mod cluster;
mod device;
mod fan_in;
mod hub;
mod node;
pub mod protocol;

use serde::Deserialize;

use crate::config::consts::DEFAULT_PROFILE_INTERVAL_STEPS;
use crate::engine::partitioner::AllocationMode;
use crate::memory::BufferKind;

pub use cluster::ClusterSupervisor;
pub use device::{DeviceSupervisor, KernelStats};
pub use fan_in::FanIn;
pub use hub::{Hub, Routes};
pub use node::{NodeSupervisor, PreparedNode};
pub use protocol::{Address, Command, Envelope, Mailbox, Pass, ProbeData, Report, UpLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    pub enabled: bool,
    /// Steps between two profile reports.
    pub interval_steps: u64,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_steps: DEFAULT_PROFILE_INTERVAL_STEPS,
        }
    }
}

/// Everything the hierarchy needs besides the circuit and the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorOptions {
    pub mode: AllocationMode,
    pub buffer_sharing: bool,
    pub latch_binning: bool,
    pub buffer_kind: BufferKind,
    pub profile: ProfileOptions,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            mode: AllocationMode::default(),
            buffer_sharing: true,
            latch_binning: false,
            buffer_kind: BufferKind::default(),
            profile: ProfileOptions::default(),
        }
    }
}
