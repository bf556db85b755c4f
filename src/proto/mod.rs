// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wire frames for field data crossing node boundaries.

#[path = "field.v1.rs"]
pub mod field_v1;

use prost::Message;

use crate::circuit::{FieldRef, KernelId};
use crate::errors::RuntimeError;
use crate::memory::{ElementKind, FieldMemory, FieldType};

pub use field_v1::{ElementFrame, FieldDataFrame, FieldTypeFrame};

impl From<ElementKind> for ElementFrame {
    fn from(element: ElementKind) -> Self {
        match element {
            ElementKind::Float32 => ElementFrame::Float32,
            ElementKind::Uint8Pixel => ElementFrame::Uint8Pixel,
            ElementKind::Complex32 => ElementFrame::Complex32,
        }
    }
}

impl From<ElementFrame> for ElementKind {
    fn from(element: ElementFrame) -> Self {
        match element {
            ElementFrame::Float32 => ElementKind::Float32,
            ElementFrame::Uint8Pixel => ElementKind::Uint8Pixel,
            ElementFrame::Complex32 => ElementKind::Complex32,
        }
    }
}

fn to_u32(values: &[usize]) -> Vec<u32> {
    values.iter().map(|v| *v as u32).collect()
}

fn to_usize(values: &[u32]) -> Vec<usize> {
    values.iter().map(|v| *v as usize).collect()
}

pub fn encode_field_data(field: FieldRef, data: &FieldMemory) -> Vec<u8> {
    let field_type = data.field_type();
    FieldDataFrame {
        kernel: field.kernel.0,
        output: field.output as u32,
        field_type: Some(FieldTypeFrame {
            field_shape: to_u32(&field_type.field_shape),
            tensor_shape: to_u32(&field_type.tensor_shape),
            element: ElementFrame::from(field_type.element) as i32,
        }),
        data: data.read().to_vec(),
    }
    .encode_to_vec()
}

pub fn decode_field_data(frame: &[u8]) -> Result<(FieldRef, FieldMemory), RuntimeError> {
    let decoded = FieldDataFrame::decode(frame).map_err(|e| RuntimeError::Decode(e.to_string()))?;
    let type_frame = decoded
        .field_type
        .ok_or_else(|| RuntimeError::Decode("frame carries no field type".to_string()))?;
    let element = ElementFrame::try_from(type_frame.element)
        .map_err(|_| RuntimeError::Decode(format!("unknown element kind {}", type_frame.element)))?;
    let field_type = FieldType::new(
        to_usize(&type_frame.field_shape),
        to_usize(&type_frame.tensor_shape),
        element.into(),
    );
    let field = FieldRef::new(KernelId(decoded.kernel), decoded.output as usize);
    let memory = FieldMemory::from_data(field_type, decoded.data)?;
    Ok((field, memory))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_preserves_field_identity_type_and_data() {
        let field = FieldRef::new(KernelId(7), 1);
        let memory = FieldMemory::from_data(FieldType::complex_field(&[2]), vec![1.0, -1.0, 0.5, 2.5]).unwrap();

        let (decoded_field, decoded) = decode_field_data(&encode_field_data(field, &memory)).unwrap();
        assert_eq!(decoded_field, field);
        assert_eq!(decoded.field_type(), memory.field_type());
        assert_eq!(decoded.read(), memory.read());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = decode_field_data(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode(_)));
    }

    #[test]
    fn test_missing_type_is_a_decode_error() {
        let frame = FieldDataFrame {
            kernel: 1,
            output: 0,
            field_type: None,
            data: vec![1.0],
        }
        .encode_to_vec();
        assert!(matches!(decode_field_data(&frame), Err(RuntimeError::Decode(_))));
    }

    #[test]
    fn test_data_not_matching_type_is_rejected() {
        let frame = FieldDataFrame {
            kernel: 1,
            output: 0,
            field_type: Some(FieldTypeFrame {
                field_shape: vec![3],
                tensor_shape: vec![],
                element: ElementFrame::Float32 as i32,
            }),
            data: vec![1.0],
        }
        .encode_to_vec();
        assert!(matches!(decode_field_data(&frame), Err(RuntimeError::Memory(_))));
    }
}
