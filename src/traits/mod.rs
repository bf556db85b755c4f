// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod kernel_op;

pub use kernel_op::KernelOp;
