// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the evaluator façade.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// The supervision hierarchy for a circuit was spawned.
///
/// # Log Level
/// `info!` - Important operational event
pub struct EvaluatorStarted<'a> {
    pub mode: &'a str,
    pub kernels: usize,
    pub nodes: usize,
}

impl Display for EvaluatorStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Evaluator started in {} mode for {} kernels over {} nodes",
            self.mode, self.kernels, self.nodes
        )
    }
}

impl StructuredLog for EvaluatorStarted<'_> {
    fn log(&self) {
        tracing::info!(
            mode = self.mode,
            kernels = self.kernels,
            nodes = self.nodes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("evaluator", span_name = name, mode = self.mode, kernels = self.kernels)
    }
}

/// A step or probe arrived before any reset, so one was issued first.
///
/// # Log Level
/// `debug!` - Expected on first use
pub struct ImplicitReset<'a> {
    pub operation: &'a str,
}

impl Display for ImplicitReset<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Resetting before first {}", self.operation)
    }
}

impl StructuredLog for ImplicitReset<'_> {
    fn log(&self) {
        tracing::debug!(operation = self.operation, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("implicit_reset", span_name = name, operation = self.operation)
    }
}

/// A blocking call ran out of time. The next call waits for the late reply.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use std::time::Duration;
/// use the_cogwheel::observability::messages::evaluator::OperationTimedOut;
///
/// let msg = OperationTimedOut {
///     operation: "step",
///     after: Duration::from_secs(300),
/// };
///
/// assert!(msg.to_string().contains("step"));
/// ```
pub struct OperationTimedOut<'a> {
    pub operation: &'a str,
    pub after: Duration,
}

impl Display for OperationTimedOut<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} did not complete within {:?}", self.operation, self.after)
    }
}

impl StructuredLog for OperationTimedOut<'_> {
    fn log(&self) {
        tracing::error!(
            operation = self.operation,
            after_ms = self.after.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!("timed_out", span_name = name, operation = self.operation)
    }
}

/// The reply owed for a timed-out pass finally arrived before the next command.
///
/// # Log Level
/// `warn!` - Follows an earlier timeout
pub struct LateReplySettled<'a> {
    pub report: &'a str,
    pub failed: bool,
}

impl Display for LateReplySettled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let outcome = if self.failed { "failed" } else { "succeeded" };
        write!(f, "Late {} reply arrived, the pass {}", self.report, outcome)
    }
}

impl StructuredLog for LateReplySettled<'_> {
    fn log(&self) {
        tracing::warn!(report = self.report, failed = self.failed, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("late_reply", span_name = name, report = self.report)
    }
}

/// A free-running loop ended.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunStopped {
    pub steps: u64,
    pub failed: bool,
}

impl Display for RunStopped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.failed {
            write!(f, "Run aborted by an error after {} steps", self.steps)
        } else {
            write!(f, "Run stopped after {} steps", self.steps)
        }
    }
}

impl StructuredLog for RunStopped {
    fn log(&self) {
        if self.failed {
            tracing::error!(steps = self.steps, "{}", self);
        } else {
            tracing::info!(steps = self.steps, "{}", self);
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("run", span_name = name, steps = self.steps)
    }
}

/// Something other than a pass completion reached the evaluator.
///
/// # Log Level
/// `warn!` - The hierarchy sent something it should not have
pub struct UnexpectedMessage<'a> {
    pub received: &'a str,
}

impl Display for UnexpectedMessage<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Evaluator ignored unexpected {}", self.received)
    }
}

impl StructuredLog for UnexpectedMessage<'_> {
    fn log(&self) {
        tracing::warn!(received = self.received, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("unexpected_message", span_name = name, received = self.received)
    }
}
