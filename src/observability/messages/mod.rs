// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable line and
//! [`StructuredLog`] to emit it as a `tracing` event with typed fields.
//!
//! # Organization
//!
//! * `engine` - schedule, allocation and partition events
//! * `supervisor` - node and cluster protocol events
//! * `device` - per-device pass and kernel events
//! * `validation` - circuit description warnings and errors
//! * `evaluator` - façade events

use tracing::Span;

pub mod device;
pub mod engine;
pub mod evaluator;
pub mod supervisor;
pub mod validation;

/// A message that knows its own log level and structured fields.
pub trait StructuredLog {
    /// Emits the message at its documented level.
    fn log(&self);

    /// Opens a span carrying the message's fields.
    fn span(&self, name: &str) -> Span;
}
