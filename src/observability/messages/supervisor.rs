// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for node and cluster supervisors.
//!
//! This module contains message types for logging events related to:
//! * Hierarchy construction and sticky initialization errors
//! * Rejected commands and protocol violations
//! * Errors reported by children during fan-in
//! * Cross-partition field routing

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A supervisor finished building its children.
///
/// # Log Level
/// `info!` - Important operational event
pub struct SupervisorStarted<'a> {
    pub component: &'a str,
    pub children: usize,
    pub exports: usize,
}

impl Display for SupervisorStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Supervisor {} started with {} children, forwarding {} fields upward",
            self.component, self.children, self.exports
        )
    }
}

impl StructuredLog for SupervisorStarted<'_> {
    fn log(&self) {
        tracing::info!(
            component = self.component,
            children = self.children,
            exports = self.exports,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "supervisor",
            span_name = name,
            component = self.component,
            children = self.children,
        )
    }
}

/// Construction failed; the error will answer every later command.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use the_cogwheel::observability::messages::supervisor::InitializationFailed;
///
/// let error = std::io::Error::new(std::io::ErrorKind::Other, "out of device memory");
/// let msg = InitializationFailed {
///     component: "node0",
///     error: &error,
/// };
///
/// assert!(msg.to_string().contains("node0"));
/// ```
pub struct InitializationFailed<'a> {
    pub component: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for InitializationFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Supervisor {} failed to initialize, every command will be answered with: {}",
            self.component, self.error
        )
    }
}

impl StructuredLog for InitializationFailed<'_> {
    fn log(&self) {
        tracing::error!(
            component = self.component,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "initialization_failed",
            span_name = name,
            component = self.component,
            error = %self.error,
        )
    }
}

/// A command was answered with the remembered initialization error.
///
/// # Log Level
/// `warn!` - Expected after a failed start, but worth seeing
pub struct StickyErrorReplayed<'a> {
    pub component: &'a str,
    pub command: &'a str,
}

impl Display for StickyErrorReplayed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Supervisor {} answered {} with its initialization error",
            self.component, self.command
        )
    }
}

impl StructuredLog for StickyErrorReplayed<'_> {
    fn log(&self) {
        tracing::warn!(
            component = self.component,
            command = self.command,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "sticky_error",
            span_name = name,
            component = self.component,
            command = self.command,
        )
    }
}

/// A message the protocol does not allow in the current state.
///
/// # Log Level
/// `error!` - Indicates a scheduling or protocol bug
pub struct CommandRejected<'a> {
    pub component: &'a str,
    pub command: &'a str,
    pub reason: &'a str,
}

impl Display for CommandRejected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Supervisor {} rejected {}: {}",
            self.component, self.command, self.reason
        )
    }
}

impl StructuredLog for CommandRejected<'_> {
    fn log(&self) {
        tracing::error!(
            component = self.component,
            command = self.command,
            reason = self.reason,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "command_rejected",
            span_name = name,
            component = self.component,
            command = self.command,
        )
    }
}

/// A child finished a pass with an error.
///
/// # Log Level
/// `warn!` - The error travels upward; later errors in the same pass replace it
pub struct ChildReportedError<'a> {
    pub component: &'a str,
    pub child: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for ChildReportedError<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Child {} of {} reported: {}",
            self.child, self.component, self.error
        )
    }
}

impl StructuredLog for ChildReportedError<'_> {
    fn log(&self) {
        tracing::warn!(
            component = self.component,
            child = self.child,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "child_error",
            span_name = name,
            component = self.component,
            child = self.child,
        )
    }
}

/// Cross-partition data was routed.
///
/// # Log Level
/// `trace!` - One per forwarded field per step
pub struct FieldRouted<'a> {
    pub component: &'a str,
    pub field: &'a str,
    pub targets: usize,
    pub exported: bool,
}

impl Display for FieldRouted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Supervisor {} routed {} to {} children{}",
            self.component,
            self.field,
            self.targets,
            if self.exported { " and upward" } else { "" }
        )
    }
}

impl StructuredLog for FieldRouted<'_> {
    fn log(&self) {
        tracing::trace!(
            component = self.component,
            field = self.field,
            targets = self.targets,
            exported = self.exported,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::trace_span!(
            "field_routed",
            span_name = name,
            component = self.component,
            field = self.field,
        )
    }
}

/// A supervisor task left its mailbox loop.
///
/// # Log Level
/// `debug!` - Shutdown detail
pub struct SupervisorStopped<'a> {
    pub component: &'a str,
}

impl Display for SupervisorStopped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Supervisor {} stopped", self.component)
    }
}

impl StructuredLog for SupervisorStopped<'_> {
    fn log(&self) {
        tracing::debug!(component = self.component, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("supervisor_stopped", span_name = name, component = self.component)
    }
}

/// A report could not be delivered because the parent is gone.
///
/// # Log Level
/// `debug!` - Expected during shutdown
pub struct ReportDropped<'a> {
    pub child: usize,
    pub report: &'a str,
}

impl Display for ReportDropped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Parent mailbox closed, dropping {} from child {}", self.report, self.child)
    }
}

impl StructuredLog for ReportDropped<'_> {
    fn log(&self) {
        tracing::debug!(child = self.child, report = self.report, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("report_dropped", span_name = name, child = self.child)
    }
}
