use std::sync::Arc;

use crate::{ElementType, Error, Result};

/// Element storage for one tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum Buffer {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

/// Run `$body` with `$data` bound to the inner `Vec` of any buffer variant.
macro_rules! with_buffer {
    ($buffer:expr, $data:ident => $body:expr) => {
        match $buffer {
            Buffer::Bool($data) => $body,
            Buffer::U8($data) => $body,
            Buffer::I32($data) => $body,
            Buffer::I64($data) => $body,
            Buffer::F32($data) => $body,
            Buffer::F64($data) => $body,
            Buffer::Str($data) => $body,
        }
    };
}
pub(crate) use with_buffer;

/// Reserve exactly `len` elements or report how many bytes could not be obtained.
fn try_vec<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    data.resize(len, fill);
    Ok(data)
}

impl Buffer {
    /// A buffer of `len` default-valued elements.
    pub fn zeroed(dtype: ElementType, len: usize) -> Result<Self> {
        Ok(match dtype {
            ElementType::Bool => Self::Bool(try_vec(len, false)?),
            ElementType::UInt8 => Self::U8(try_vec(len, 0)?),
            ElementType::Int32 => Self::I32(try_vec(len, 0)?),
            ElementType::Int64 => Self::I64(try_vec(len, 0)?),
            ElementType::Float32 => Self::F32(try_vec(len, 0.)?),
            ElementType::Float64 => Self::F64(try_vec(len, 0.)?),
            ElementType::String => Self::Str(try_vec(len, String::new())?),
        })
    }

    pub fn dtype(&self) -> ElementType {
        match self {
            Self::Bool(_) => ElementType::Bool,
            Self::U8(_) => ElementType::UInt8,
            Self::I32(_) => ElementType::Int32,
            Self::I64(_) => ElementType::Int64,
            Self::F32(_) => ElementType::Float32,
            Self::F64(_) => ElementType::Float64,
            Self::Str(_) => ElementType::String,
        }
    }

    pub fn len(&self) -> usize {
        with_buffer!(self, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        with_buffer!(self, data => data.capacity())
    }

    /// Bytes held by the elements. Strings count their UTF-8 payload.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Str(data) => data.iter().map(String::len).sum(),
            other => other.len() * other.dtype().size_of().unwrap_or(0),
        }
    }

    /// Bytes reserved by the allocation, used for pool accounting.
    pub(crate) fn capacity_bytes(&self) -> usize {
        match self {
            Self::Str(data) => data.capacity() * std::mem::size_of::<String>(),
            other => other.capacity() * other.dtype().size_of().unwrap_or(0),
        }
    }

    /// Fallible deep copy.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(with_buffer!(self, data => {
            let mut copy = Vec::new();
            copy.try_reserve_exact(data.len())
                .map_err(|_| Error::AllocationFailure { bytes: self.byte_len() })?;
            copy.extend_from_slice(data);
            Self::from(copy)
        }))
    }

    /// Overwrite every element with the elements of `other`.
    pub fn copy_from(&mut self, other: &Buffer) -> Result<()> {
        if self.dtype() != other.dtype() {
            return Err(Error::type_mismatch(
                "buffer copy",
                self.dtype(),
                other.dtype(),
            ));
        }
        if self.len() != other.len() {
            return Err(Error::shape_mismatch(format!(
                "cannot copy {} elements into a buffer of {}",
                other.len(),
                self.len()
            )));
        }
        match (self, other) {
            (Self::Bool(dst), Self::Bool(src)) => dst.copy_from_slice(src),
            (Self::U8(dst), Self::U8(src)) => dst.copy_from_slice(src),
            (Self::I32(dst), Self::I32(src)) => dst.copy_from_slice(src),
            (Self::I64(dst), Self::I64(src)) => dst.copy_from_slice(src),
            (Self::F32(dst), Self::F32(src)) => dst.copy_from_slice(src),
            (Self::F64(dst), Self::F64(src)) => dst.copy_from_slice(src),
            (Self::Str(dst), Self::Str(src)) => dst.clone_from_slice(src),
            _ => unreachable!("element types were checked above"),
        }
        Ok(())
    }

    /// Reset to `len` default-valued elements, keeping the allocation when it fits.
    pub(crate) fn reset(&mut self, len: usize) -> Result<()> {
        let bytes = len.saturating_mul(self.dtype().size_of().unwrap_or(1));
        with_buffer!(self, data => {
            data.clear();
            data.try_reserve_exact(len)
                .map_err(|_| Error::AllocationFailure { bytes })?;
            data.resize(len, Default::default());
        });
        Ok(())
    }
}

/// Reference-counted tensor storage shared between tensor handles.
///
/// Mutation goes through [`SharedBuffer::make_mut`], which copies the
/// buffer first whenever another handle still refers to it.
#[derive(Clone, Debug)]
pub struct SharedBuffer(Arc<Buffer>);

impl SharedBuffer {
    pub fn new(buffer: Buffer) -> Self {
        Self(Arc::new(buffer))
    }

    /// Number of tensor handles referring to this storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_buffer(&self) -> &Buffer {
        &self.0
    }

    /// Mutable access with copy-on-write.
    pub fn make_mut(&mut self) -> Result<&mut Buffer> {
        if Arc::get_mut(&mut self.0).is_none() {
            tracing::trace!(refs = self.ref_count(), "copy-on-write before mutation");
            self.0 = Arc::new(self.0.try_clone()?);
        }
        Arc::get_mut(&mut self.0).ok_or_else(|| Error::msg("freshly copied buffer is shared"))
    }

    /// Mutable access only when no other handle exists.
    pub fn get_mut(&mut self) -> Option<&mut Buffer> {
        Arc::get_mut(&mut self.0)
    }

    /// Take the buffer out if this is the last handle.
    pub fn try_unwrap(self) -> std::result::Result<Buffer, SharedBuffer> {
        Arc::try_unwrap(self.0).map_err(SharedBuffer)
    }

    pub fn deep_copy(&self) -> Result<SharedBuffer> {
        Ok(Self::new(self.0.try_clone()?))
    }
}
