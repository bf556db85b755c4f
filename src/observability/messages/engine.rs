// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the compile pipeline.
//!
//! This module contains message types for logging events related to:
//! * Register allocation results per device
//! * Circuit partitioning and proxy insertion
//! * Compile failures

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Registers of one circuit were bound to physical buffers.
///
/// # Log Level
/// `debug!` - Emitted once per device at construction
///
/// # Example
/// ```
/// use the_cogwheel::observability::messages::engine::RegistersAllocated;
///
/// let msg = RegistersAllocated {
///     strategy: "in_order",
///     virtual_registers: 10,
///     latches: 4,
///     shared_latches: 2,
///     flip_flops: 1,
///     bytes: 4096,
/// };
///
/// assert!(msg.to_string().contains("10 registers"));
/// ```
pub struct RegistersAllocated<'a> {
    pub strategy: &'a str,
    pub virtual_registers: usize,
    pub latches: usize,
    pub shared_latches: usize,
    pub flip_flops: usize,
    pub bytes: u64,
}

impl Display for RegistersAllocated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Allocated {} registers with {} strategy: {} latches ({} shared), {} flip-flops, {} bytes",
            self.virtual_registers, self.strategy, self.latches, self.shared_latches, self.flip_flops, self.bytes
        )
    }
}

impl StructuredLog for RegistersAllocated<'_> {
    fn log(&self) {
        tracing::debug!(
            strategy = self.strategy,
            virtual_registers = self.virtual_registers,
            latches = self.latches,
            shared_latches = self.shared_latches,
            flip_flops = self.flip_flops,
            bytes = self.bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "register_allocation",
            span_name = name,
            strategy = self.strategy,
            virtual_registers = self.virtual_registers,
        )
    }
}

/// The circuit was split across devices.
///
/// # Log Level
/// `info!` - Important operational event
pub struct PartitionCompleted<'a> {
    pub mode: &'a str,
    pub kernels: usize,
    pub partitions: usize,
    pub proxies: usize,
    pub replicas: usize,
}

impl Display for PartitionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Partitioned {} kernels in {} mode into {} partitions ({} proxies, {} replicated constants)",
            self.kernels, self.mode, self.partitions, self.proxies, self.replicas
        )
    }
}

impl StructuredLog for PartitionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            mode = self.mode,
            kernels = self.kernels,
            partitions = self.partitions,
            proxies = self.proxies,
            replicas = self.replicas,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "partition",
            span_name = name,
            mode = self.mode,
            partitions = self.partitions,
        )
    }
}

/// Compiling the circuit for the supervision hierarchy failed.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct CompileFailed<'a> {
    pub stage: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for CompileFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Compile stage '{}' failed: {}", self.stage, self.error)
    }
}

impl StructuredLog for CompileFailed<'_> {
    fn log(&self) {
        tracing::error!(
            stage = self.stage,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "compile_failed",
            span_name = name,
            stage = self.stage,
            error = %self.error,
        )
    }
}
