// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod circuit;
mod compile;
mod config;
mod runtime;

pub use circuit::CircuitError;
pub use compile::CompileError;
pub use config::ConfigError;
pub use runtime::{FieldMemoryError, KernelError, RuntimeError};
