// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for circuit description validation warnings and errors.
//!
//! This module contains message types for logging events related to:
//! * Input resolution between kernels
//! * Cyclic dependency detection
//! * Duplicate kernel ID detection
//! * Recurrences without a driver

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Cyclic dependency detected in a circuit description.
///
/// # Log Level
/// `error!` - Failure requiring attention
///
/// # Example
/// ```
/// use the_cogwheel::observability::messages::validation::CyclicDependencyDetected;
///
/// let cycle = vec!["blur", "sharpen", "blur"];
/// let msg = CyclicDependencyDetected {
///     cycle: &cycle,
/// };
///
/// assert_eq!(msg.to_string(), "Cyclic dependency detected: blur -> sharpen -> blur");
/// ```
pub struct CyclicDependencyDetected<'a> {
    pub cycle: &'a [&'a str],
}

impl Display for CyclicDependencyDetected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cyclic dependency detected: {}", self.cycle.join(" -> "))
    }
}

impl StructuredLog for CyclicDependencyDetected<'_> {
    fn log(&self) {
        tracing::error!(
            cycle = self.cycle.join(" -> "),
            cycle_length = self.cycle.len(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "span_name",
            name = name,
            cycle = self.cycle.join(" -> "),
            cycle_length = self.cycle.len(),
        )
    }
}

/// A kernel names an input no kernel produces.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct UnresolvedInput<'a> {
    pub kernel: &'a str,
    pub missing_input: &'a str,
}

impl Display for UnresolvedInput<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Kernel '{}' reads from '{}' which does not exist",
            self.kernel, self.missing_input
        )
    }
}

impl StructuredLog for UnresolvedInput<'_> {
    fn log(&self) {
        tracing::error!(
            kernel = self.kernel,
            missing_input = self.missing_input,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "span_name",
            name = name,
            kernel = self.kernel,
            missing_input = self.missing_input,
        )
    }
}

/// A kernel reads a field whose shape differs from its own.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct IncompatibleShapes<'a> {
    pub kernel: &'a str,
    pub input: &'a str,
}

impl Display for IncompatibleShapes<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Kernel '{}' reads '{}' with a different shape", self.kernel, self.input)
    }
}

impl StructuredLog for IncompatibleShapes<'_> {
    fn log(&self) {
        tracing::error!(kernel = self.kernel, input = self.input, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "span_name",
            name = name,
            kernel = self.kernel,
            input = self.input,
        )
    }
}

/// Two kernels share an ID.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct DuplicateKernelId<'a> {
    pub kernel: &'a str,
}

impl Display for DuplicateKernelId<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Duplicate kernel ID found: '{}'", self.kernel)
    }
}

impl StructuredLog for DuplicateKernelId<'_> {
    fn log(&self) {
        tracing::error!(kernel = self.kernel, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(tracing::Level::ERROR, "span_name", name = name, kernel = self.kernel)
    }
}

/// A recurrence has no driver, or names one that does not exist.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct MissingDriver<'a> {
    pub kernel: &'a str,
    pub driver: Option<&'a str>,
}

impl Display for MissingDriver<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.driver {
            Some(driver) => write!(
                f,
                "Recurrence '{}' is driven by '{}' which does not exist",
                self.kernel, driver
            ),
            None => write!(f, "Recurrence '{}' has no driver", self.kernel),
        }
    }
}

impl StructuredLog for MissingDriver<'_> {
    fn log(&self) {
        tracing::error!(
            kernel = self.kernel,
            driver = self.driver.unwrap_or(""),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(tracing::Level::ERROR, "span_name", name = name, kernel = self.kernel)
    }
}

/// Starting circuit validation.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ValidationStarted {
    pub kernel_count: usize,
}

impl Display for ValidationStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting circuit validation for {} kernels",
            self.kernel_count
        )
    }
}

impl StructuredLog for ValidationStarted {
    fn log(&self) {
        tracing::info!(kernel_count = self.kernel_count, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::INFO,
            "span_name",
            name = name,
            kernel_count = self.kernel_count,
        )
    }
}

/// Circuit validation completed successfully.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use the_cogwheel::observability::messages::validation::ValidationCompleted;
///
/// let msg = ValidationCompleted {
///     kernel_count: 5,
///     recurrence_count: 1,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ValidationCompleted {
    pub kernel_count: usize,
    pub recurrence_count: usize,
}

impl Display for ValidationCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Circuit validation completed for {} kernels ({} recurrences)",
            self.kernel_count, self.recurrence_count
        )
    }
}

impl StructuredLog for ValidationCompleted {
    fn log(&self) {
        tracing::info!(
            kernel_count = self.kernel_count,
            recurrence_count = self.recurrence_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::INFO,
            "span_name",
            name = name,
            kernel_count = self.kernel_count,
            recurrence_count = self.recurrence_count,
        )
    }
}

/// Circuit validation failed.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct ValidationFailed {
    pub error_count: usize,
}

impl Display for ValidationFailed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Circuit validation failed with {} errors",
            self.error_count
        )
    }
}

impl StructuredLog for ValidationFailed {
    fn log(&self) {
        tracing::error!(error_count = self.error_count, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "span_name",
            name = name,
            error_count = self.error_count,
        )
    }
}
