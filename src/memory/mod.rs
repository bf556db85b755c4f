// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod field_memory;
mod field_type;
mod pool;

pub use field_memory::{FieldMemory, FieldView, FieldViewMut};
pub use field_type::{BufferKind, ElementKind, FieldType};
pub use pool::FieldMemoryPool;
