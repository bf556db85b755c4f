// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel op implementations.
//!
//! # Available Backends
//!
//! ## CPU Backend
//! Reference ops computed in-process on `f32` words:
//! - **Sources**: constants, ramp sensors, recurrence state holders
//! - **Arithmetic**: scalar add, elementwise sum, scaling
//! - **Placement**: `cpu_add_scalar` is pinned to a node's CPU worker
//!
//! ## Stub Backend (Test-Only)
//! - **FailingOp**: fails every launch, for error propagation tests
//! - **CountingOp**: counts compute and reset calls
//! - **SlowOp**: delays another op, for timeout tests
//!
//! # Architecture
//!
//! ```text
//! CircuitConfig → KernelOpFactory → Arc<dyn KernelOp> → Kernel → DeviceSupervisor
//! ```
//!
//! ```rust
//! use the_cogwheel::backends::cpu::KernelOpFactory;
//! use the_cogwheel::config::KernelConfig;
//!
//! let config = KernelConfig {
//!     id: "offset".to_string(),
//!     op: "add_scalar".to_string(),
//!     value: Some(1.0),
//!     ..KernelConfig::default()
//! };
//!
//! let op = KernelOpFactory::create_op(&config)?;
//! assert_eq!(op.name(), "add_scalar");
//! # Ok::<(), the_cogwheel::errors::CircuitError>(())
//! ```

pub mod cpu;
#[cfg(test)]
pub mod stub;
