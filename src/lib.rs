// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backends;   // kernel op implementations
pub mod circuit;    // kernel circuit DAG
pub mod config;     // runtime config + circuit descriptions
pub mod engine;     // scheduling, register allocation, partitioning
pub mod errors;     // error handling
pub mod evaluator;  // external façade
pub mod memory;     // field types and buffers
pub mod observability;
pub mod proto;      // cross-node field frames
pub mod supervisor; // cluster -> node -> device actors
pub mod traits;     // unified abstractions
