// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for per-device evaluation.
//!
//! This module contains message types for logging events related to:
//! * Device construction
//! * Step and reset passes
//! * Kernel launch failures
//! * Kernel profiles
//! * Input proxy housekeeping

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A device compiled its partition and is ready for commands.
///
/// # Log Level
/// `info!` - Important operational event
pub struct DeviceStarted<'a> {
    pub device: &'a str,
    pub kernels: usize,
    pub latches: usize,
    pub flip_flops: usize,
    pub bytes: u64,
}

impl Display for DeviceStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device {} ready: {} kernels, {} latches, {} flip-flops, {} bytes",
            self.device, self.kernels, self.latches, self.flip_flops, self.bytes
        )
    }
}

impl StructuredLog for DeviceStarted<'_> {
    fn log(&self) {
        tracing::info!(
            device = self.device,
            kernels = self.kernels,
            latches = self.latches,
            flip_flops = self.flip_flops,
            bytes = self.bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "device",
            span_name = name,
            device = self.device,
            kernels = self.kernels,
        )
    }
}

/// A step or reset pass finished on one device.
///
/// # Log Level
/// `debug!` - High-frequency event
pub struct PassCompleted<'a> {
    pub device: &'a str,
    pub pass: &'a str,
    pub kernels: usize,
    pub duration: Duration,
    pub failed: bool,
}

impl Display for PassCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device {} {} pass {} after {} kernels in {:?}",
            self.device,
            self.pass,
            if self.failed { "aborted" } else { "completed" },
            self.kernels,
            self.duration
        )
    }
}

impl StructuredLog for PassCompleted<'_> {
    fn log(&self) {
        tracing::debug!(
            device = self.device,
            pass = self.pass,
            kernels = self.kernels,
            duration_us = self.duration.as_micros() as u64,
            failed = self.failed,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "pass",
            span_name = name,
            device = self.device,
            pass = self.pass,
        )
    }
}

/// A kernel launch failed and aborted the pass.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use the_cogwheel::observability::messages::device::KernelLaunchFailed;
///
/// let error = std::io::Error::new(std::io::ErrorKind::Other, "shape mismatch");
/// let msg = KernelLaunchFailed {
///     device: "node0/dev0",
///     kernel: "blur",
///     preceding: &["load".to_string(), "scale".to_string()],
///     error: &error,
/// };
///
/// assert!(msg.to_string().contains("load, scale"));
/// ```
pub struct KernelLaunchFailed<'a> {
    pub device: &'a str,
    pub kernel: &'a str,
    pub preceding: &'a [String],
    pub error: &'a dyn std::error::Error,
}

impl Display for KernelLaunchFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Kernel {} failed on device {} (preceded by [{}]): {}",
            self.kernel,
            self.device,
            self.preceding.join(", "),
            self.error
        )
    }
}

impl StructuredLog for KernelLaunchFailed<'_> {
    fn log(&self) {
        tracing::error!(
            device = self.device,
            kernel = self.kernel,
            preceding = self.preceding.join(", ").as_str(),
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "kernel_launch_failed",
            span_name = name,
            device = self.device,
            kernel = self.kernel,
        )
    }
}

/// Accumulated launch statistics for one kernel.
///
/// # Log Level
/// `info!` - Emitted every `interval_steps` when profiling is on
pub struct KernelProfile<'a> {
    pub device: &'a str,
    pub kernel: &'a str,
    pub steps: u64,
    pub invocations: u64,
    pub total: Duration,
    pub max: Duration,
}

impl Display for KernelProfile<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Profile after {} steps on {}: kernel {} ran {} times, total {:?}, max {:?}",
            self.steps, self.device, self.kernel, self.invocations, self.total, self.max
        )
    }
}

impl StructuredLog for KernelProfile<'_> {
    fn log(&self) {
        tracing::info!(
            device = self.device,
            kernel = self.kernel,
            steps = self.steps,
            invocations = self.invocations,
            total_us = self.total.as_micros() as u64,
            max_us = self.max.as_micros() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "kernel_profile",
            span_name = name,
            device = self.device,
            kernel = self.kernel,
        )
    }
}

/// Data left over from an aborted pass was discarded.
///
/// # Log Level
/// `warn!` - Follows an earlier failure
pub struct StaleProxyDataDropped<'a> {
    pub device: &'a str,
    pub field: &'a str,
}

impl Display for StaleProxyDataDropped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device {} dropped stale data for {} left by an aborted pass",
            self.device, self.field
        )
    }
}

impl StructuredLog for StaleProxyDataDropped<'_> {
    fn log(&self) {
        tracing::warn!(device = self.device, field = self.field, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("stale_proxy_data", span_name = name, device = self.device, field = self.field)
    }
}

/// Unsent output proxies were flushed after an abort so consumers do not wait forever.
///
/// # Log Level
/// `warn!` - Follows an earlier failure
pub struct ExportsFlushed<'a> {
    pub device: &'a str,
    pub count: usize,
}

impl Display for ExportsFlushed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Device {} flushed {} unsent fields with stale contents",
            self.device, self.count
        )
    }
}

impl StructuredLog for ExportsFlushed<'_> {
    fn log(&self) {
        tracing::warn!(device = self.device, count = self.count, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("exports_flushed", span_name = name, device = self.device, count = self.count)
    }
}
