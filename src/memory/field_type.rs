// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use std::fmt;

/// Element kind stored at every point of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    #[default]
    Float32,
    /// RGBA color pixel, one byte per channel
    Uint8Pixel,
    Complex32,
}

impl ElementKind {
    /// Number of f32 words used to hold one element in host memory.
    pub fn lanes(self) -> usize {
        match self {
            ElementKind::Float32 => 1,
            ElementKind::Complex32 => 2,
            ElementKind::Uint8Pixel => 4,
        }
    }

    /// Bytes one element occupies in device memory.
    pub fn device_bytes(self) -> usize {
        match self {
            ElementKind::Float32 => 4,
            ElementKind::Complex32 => 8,
            ElementKind::Uint8Pixel => 4,
        }
    }
}

/// Shape and element type of a virtual field register.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldType {
    pub field_shape: Vec<usize>,
    pub tensor_shape: Vec<usize>,
    pub element: ElementKind,
}

impl FieldType {
    pub fn new(field_shape: Vec<usize>, tensor_shape: Vec<usize>, element: ElementKind) -> Self {
        Self {
            field_shape,
            tensor_shape,
            element,
        }
    }

    /// A 0-dimensional scalar field holding a single float.
    pub fn scalar() -> Self {
        Self::new(vec![], vec![], ElementKind::Float32)
    }

    pub fn scalar_field(field_shape: &[usize]) -> Self {
        Self::new(field_shape.to_vec(), vec![], ElementKind::Float32)
    }

    pub fn vector_field(field_shape: &[usize], length: usize) -> Self {
        Self::new(field_shape.to_vec(), vec![length], ElementKind::Float32)
    }

    pub fn complex_field(field_shape: &[usize]) -> Self {
        Self::new(field_shape.to_vec(), vec![], ElementKind::Complex32)
    }

    pub fn color_image(field_shape: &[usize]) -> Self {
        Self::new(field_shape.to_vec(), vec![], ElementKind::Uint8Pixel)
    }

    pub fn points(&self) -> usize {
        self.field_shape.iter().product()
    }

    pub fn tensor_points(&self) -> usize {
        self.tensor_shape.iter().product()
    }

    pub fn tensor_order(&self) -> usize {
        self.tensor_shape.len()
    }

    /// f32 words needed to hold the field in host memory.
    pub fn words(&self) -> usize {
        self.points() * self.tensor_points() * self.element.lanes()
    }

    /// Bytes the field occupies on a device.
    pub fn byte_size(&self) -> usize {
        self.points() * self.tensor_points() * self.element.device_bytes()
    }

    /// Image fields live in a different memory kind on accelerators and never
    /// share storage with numeric fields.
    pub fn is_image(&self) -> bool {
        self.element == ElementKind::Uint8Pixel
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?}{:?}", self.element, self.field_shape, self.tensor_shape)
    }
}

/// Host buffer kind requested for device transfers. Opaque to the allocator;
/// it only keys the memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Pinned,
    #[default]
    Direct,
    Indirect,
}
