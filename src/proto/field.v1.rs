// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// One field's contents as sent between nodes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldDataFrame {
    /// Producing kernel of the original circuit.
    #[prost(uint32, tag = "1")]
    pub kernel: u32,
    #[prost(uint32, tag = "2")]
    pub output: u32,
    #[prost(message, optional, tag = "3")]
    pub field_type: ::core::option::Option<FieldTypeFrame>,
    #[prost(float, repeated, tag = "4")]
    pub data: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldTypeFrame {
    #[prost(uint32, repeated, tag = "1")]
    pub field_shape: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, repeated, tag = "2")]
    pub tensor_shape: ::prost::alloc::vec::Vec<u32>,
    #[prost(enumeration = "ElementFrame", tag = "3")]
    pub element: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ElementFrame {
    Float32 = 0,
    Uint8Pixel = 1,
    Complex32 = 2,
}
