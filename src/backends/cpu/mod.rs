// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod factory;
mod ops;

pub use factory::{KernelOpFactory, OpCategory};
pub use ops::*;
