// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Field memory arena owned by one top-level circuit.
//!
//! Buffers are bucketed by (word count, buffer kind). Released buffers are
//! zeroed and handed back out on the next matching `acquire`, so a circuit
//! that is torn down and rebuilt does not go back to the allocator.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::memory::{BufferKind, FieldMemory, FieldType};

#[derive(Debug, Default)]
struct PoolState {
    free: HashMap<(usize, BufferKind), Vec<Vec<f32>>>,
    outstanding: usize,
    reused: usize,
}

/// Arena of host field buffers.
#[derive(Debug, Default)]
pub struct FieldMemoryPool {
    state: Mutex<PoolState>,
}

impl FieldMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-filled memory for `field_type`, reusing a released buffer when possible.
    pub fn acquire(&self, field_type: &FieldType, kind: BufferKind) -> FieldMemory {
        let words = field_type.words();
        let mut state = self.lock();
        state.outstanding += 1;
        let recycled = state.free.get_mut(&(words, kind)).and_then(Vec::pop);
        match recycled {
            Some(mut storage) => {
                state.reused += 1;
                storage.fill(0.0);
                FieldMemory::from_storage(field_type.clone(), kind, storage)
            }
            None => FieldMemory::new(field_type.clone(), kind),
        }
    }

    pub fn release(&self, memory: FieldMemory) {
        let (kind, storage) = memory.into_storage();
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.free.entry((storage.len(), kind)).or_default().push(storage);
    }

    /// Buffers acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Buffers waiting in the free lists.
    pub fn pooled(&self) -> usize {
        self.lock().free.values().map(Vec::len).sum()
    }

    /// Acquisitions served from a free list.
    pub fn reused(&self) -> usize {
        self.lock().reused
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the free lists inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
