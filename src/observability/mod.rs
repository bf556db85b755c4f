// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout The Cogwheel. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep structured fields and human-readable text in one place
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - scheduling, register allocation and partitioning
//! * `messages::supervisor` - fan-out/fan-in, routing and sticky errors
//! * `messages::device` - step passes, launch failures and kernel profiles
//! * `messages::validation` - circuit description problems
//! * `messages::evaluator` - implicit resets, timeouts and run loops
//!
//! # Usage
//!
//! ```rust
//! use the_cogwheel::observability::messages::engine::PartitionCompleted;
//! use the_cogwheel::observability::messages::StructuredLog;
//!
//! let msg = PartitionCompleted {
//!     mode: "multi_device",
//!     kernels: 12,
//!     partitions: 2,
//!     proxies: 4,
//!     replicas: 1,
//! };
//!
//! msg.log();
//! ```
//!
//! Subscribers are installed by the binary only; the library just emits events.

pub mod messages;
