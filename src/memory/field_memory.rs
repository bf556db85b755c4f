// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::errors::FieldMemoryError;
use crate::memory::{BufferKind, FieldType};

/// Host-side buffer holding the contents of one field.
///
/// The numeric layout is opaque to the runtime: kernels see a flat slice of
/// `field_type.words()` f32 words.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMemory {
    field_type: FieldType,
    kind: BufferKind,
    data: Vec<f32>,
}

impl FieldMemory {
    /// Zero-filled memory for `field_type`.
    pub fn new(field_type: FieldType, kind: BufferKind) -> Self {
        let data = vec![0.0; field_type.words()];
        Self {
            field_type,
            kind,
            data,
        }
    }

    pub fn from_data(field_type: FieldType, data: Vec<f32>) -> Result<Self, FieldMemoryError> {
        if data.len() != field_type.words() {
            return Err(FieldMemoryError::LengthMismatch {
                expected: field_type.words(),
                actual: data.len(),
            });
        }
        Ok(Self {
            field_type,
            kind: BufferKind::default(),
            data,
        })
    }

    /// Reuses a pooled allocation. `storage` must already be sized and zeroed.
    pub(crate) fn from_storage(field_type: FieldType, kind: BufferKind, storage: Vec<f32>) -> Self {
        debug_assert_eq!(storage.len(), field_type.words());
        Self {
            field_type,
            kind,
            data: storage,
        }
    }

    pub(crate) fn into_storage(self) -> (BufferKind, Vec<f32>) {
        (self.kind, self.data)
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn read(&self) -> &[f32] {
        &self.data
    }

    pub fn write(&mut self, values: &[f32]) -> Result<(), FieldMemoryError> {
        if values.len() != self.data.len() {
            return Err(FieldMemoryError::LengthMismatch {
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn copy_to(&self, other: &mut FieldMemory) -> Result<(), FieldMemoryError> {
        if self.field_type.words() != other.field_type.words() {
            return Err(FieldMemoryError::TypeMismatch {
                expected: other.field_type.to_string(),
                actual: self.field_type.to_string(),
            });
        }
        other.data.copy_from_slice(&self.data);
        Ok(())
    }

    /// Largest elementwise absolute difference, or infinity when the buffers
    /// cannot be compared.
    pub fn compare_linf(&self, other: &FieldMemory) -> f32 {
        if self.data.len() != other.data.len() {
            return f32::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }

    /// View of the first `field_type.words()` words, retyped as `field_type`.
    /// Shared latches are sized for their largest member; smaller members use a prefix.
    pub fn view_as<'a>(&'a self, field_type: &'a FieldType) -> FieldView<'a> {
        FieldView {
            field_type,
            data: &self.data[..field_type.words()],
        }
    }

    pub fn view_mut_as<'a>(&'a mut self, field_type: &'a FieldType) -> FieldViewMut<'a> {
        let words = field_type.words();
        FieldViewMut {
            field_type,
            data: &mut self.data[..words],
        }
    }

    pub fn view(&self) -> FieldView<'_> {
        FieldView {
            field_type: &self.field_type,
            data: &self.data,
        }
    }

    pub fn view_mut(&mut self) -> FieldViewMut<'_> {
        FieldViewMut {
            field_type: &self.field_type,
            data: &mut self.data,
        }
    }
}

/// Read-only kernel input.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    pub field_type: &'a FieldType,
    pub data: &'a [f32],
}

impl<'a> FieldView<'a> {
    pub fn to_memory(&self, kind: BufferKind) -> FieldMemory {
        FieldMemory {
            field_type: self.field_type.clone(),
            kind,
            data: self.data.to_vec(),
        }
    }
}

/// Writable kernel output.
#[derive(Debug)]
pub struct FieldViewMut<'a> {
    pub field_type: &'a FieldType,
    pub data: &'a mut [f32],
}

impl<'a> FieldViewMut<'a> {
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn copy_from(&mut self, source: &[f32]) -> Result<(), FieldMemoryError> {
        if source.len() != self.data.len() {
            return Err(FieldMemoryError::LengthMismatch {
                expected: self.data.len(),
                actual: source.len(),
            });
        }
        self.data.copy_from_slice(source);
        Ok(())
    }
}
