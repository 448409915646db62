//! # Buffer Transport
//!
//! Typed numeric buffers and the bookkeeping needed to move them between the
//! main side and execution contexts.
//!
//! Buffers are shared through [`SharedBuffer`] (an `Arc`). Posting a buffer
//! hands the allocation to the receiver without copying it; a deep copy is only
//! made when the sender asks for one through `package(true)` or
//! `reconstruct(true)`.
//!
//! The element stride of every standard attribute is fixed by its name, see
//! [`ATTRIBUTE_STRIDES`]. This table is the implicit schema of the wire format.

use std::sync::Arc;

use phf::phf_map;
use crate::error::TransportError;

/// Fixed element stride per standard attribute name.
pub static ATTRIBUTE_STRIDES: phf::Map<&'static str, usize> = phf_map! {
    "position" => 3,
    "normal" => 3,
    "color" => 3,
    "uv" => 2,
    "skinIndex" => 4,
    "skinWeight" => 4,
    "index" => 1,
};

/// Element type of a [`TypedArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 32-bit float
    Float32,
    /// 32-bit unsigned integer
    Uint32,
    /// 16-bit unsigned integer
    Uint16,
    /// 8-bit unsigned integer
    Uint8,
}

/// An owned numeric buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    /// Float data (positions, normals, uvs, colors, skin weights)
    Float32(Vec<f32>),
    /// Large index buffers
    Uint32(Vec<u32>),
    /// Small index buffers and skin indices
    Uint16(Vec<u16>),
    /// Byte data
    Uint8(Vec<u8>),
}

/// A buffer that can be posted without copying.
pub type SharedBuffer = Arc<TypedArray>;

impl TypedArray {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TypedArray::Float32(values) => values.len(),
            TypedArray::Uint32(values) => values.len(),
            TypedArray::Uint16(values) => values.len(),
            TypedArray::Uint8(values) => values.len(),
        }
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type.
    pub fn kind(&self) -> ElementKind {
        match self {
            TypedArray::Float32(_) => ElementKind::Float32,
            TypedArray::Uint32(_) => ElementKind::Uint32,
            TypedArray::Uint16(_) => ElementKind::Uint16,
            TypedArray::Uint8(_) => ElementKind::Uint8,
        }
    }

    /// Raw byte view of the buffer, as it would be transferred.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TypedArray::Float32(values) => bytemuck::cast_slice(values),
            TypedArray::Uint32(values) => bytemuck::cast_slice(values),
            TypedArray::Uint16(values) => bytemuck::cast_slice(values),
            TypedArray::Uint8(values) => values,
        }
    }

    /// Float view, if this is a float buffer.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TypedArray::Float32(values) => Some(values),
            _ => None,
        }
    }

    /// Integer values widened to `usize`, for index-like buffers.
    pub fn to_indices(&self) -> Option<Vec<usize>> {
        match self {
            TypedArray::Uint32(values) => Some(values.iter().map(|&v| v as usize).collect()),
            TypedArray::Uint16(values) => Some(values.iter().map(|&v| v as usize).collect()),
            TypedArray::Uint8(values) => Some(values.iter().map(|&v| v as usize).collect()),
            TypedArray::Float32(_) => None,
        }
    }
}

impl From<Vec<f32>> for TypedArray {
    fn from(values: Vec<f32>) -> Self {
        TypedArray::Float32(values)
    }
}

impl From<Vec<u32>> for TypedArray {
    fn from(values: Vec<u32>) -> Self {
        TypedArray::Uint32(values)
    }
}

impl From<Vec<u16>> for TypedArray {
    fn from(values: Vec<u16>) -> Self {
        TypedArray::Uint16(values)
    }
}

impl From<Vec<u8>> for TypedArray {
    fn from(values: Vec<u8>) -> Self {
        TypedArray::Uint8(values)
    }
}

/// Copies the buffer contents into a new allocation.
pub fn deep_copy(buffer: &SharedBuffer) -> SharedBuffer {
    Arc::new(buffer.as_ref().clone())
}

/// Stride of a standard attribute, `None` for custom buffer names.
pub fn stride_of(name: &str) -> Option<usize> {
    ATTRIBUTE_STRIDES.get(name).copied()
}

/// Checks a buffer against the schema of its attribute name: the length must
/// be a multiple of the stride and `index` must hold unsigned integers.
///
/// Custom buffer names have no schema and always pass.
pub fn validate_attribute(name: &str, buffer: &TypedArray) -> Result<(), TransportError> {
    if name == "index" && buffer.kind() == ElementKind::Float32 {
        return Err(TransportError::InvalidIndexKind(buffer.kind()));
    }
    match stride_of(name) {
        Some(stride) if buffer.len() % stride != 0 => Err(TransportError::StrideMismatch {
            name: name.to_string(),
            len: buffer.len(),
            stride,
        }),
        _ => Ok(()),
    }
}

/// The list of buffers moved alongside one envelope.
///
/// A buffer referenced by several logical names occupies a single slot.
#[derive(Debug, Default)]
pub struct TransferList {
    /// `(original, sent)` pairs; `sent` differs from `original` when copying.
    entries: Vec<(SharedBuffer, SharedBuffer)>,
}

impl TransferList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a buffer unless the same allocation is already listed.
    ///
    /// # Arguments
    /// * `buffer` - The buffer to transfer
    /// * `clone_buffer` - Send a deep copy instead of the original allocation
    ///
    /// # Returns
    /// The slot index the buffer occupies
    pub fn push(&mut self, buffer: &SharedBuffer, clone_buffer: bool) -> usize {
        if let Some(slot) = self
            .entries
            .iter()
            .position(|(original, _)| Arc::ptr_eq(original, buffer))
        {
            return slot;
        }

        let sent = if clone_buffer {
            deep_copy(buffer)
        } else {
            buffer.clone()
        };
        self.entries.push((buffer.clone(), sent));
        self.entries.len() - 1
    }

    /// Number of listed buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the list into the buffers to send, in slot order.
    pub fn into_transferables(self) -> Vec<SharedBuffer> {
        self.entries.into_iter().map(|(_, sent)| sent).collect()
    }
}
