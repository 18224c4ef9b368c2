use std::fmt::Debug;

use crate::tensor::Buffer;

/// Runtime element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    UInt8,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Variable-length text; tensors of this type are always dynamically allocated.
    String,
}

impl ElementType {
    /// Size of one element in bytes, or `None` for variable-length elements.
    pub fn size_of(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(std::mem::size_of::<bool>()),
            Self::UInt8 => Some(std::mem::size_of::<u8>()),
            Self::Int32 => Some(std::mem::size_of::<i32>()),
            Self::Int64 => Some(std::mem::size_of::<i64>()),
            Self::Float32 => Some(std::mem::size_of::<f32>()),
            Self::Float64 => Some(std::mem::size_of::<f64>()),
            Self::String => None,
        }
    }

    pub fn is_variable_length(&self) -> bool {
        self.size_of().is_none()
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }
}

/// Marker trait for tensor datatypes.
pub trait DType: Debug + Clone + Default + PartialEq + Send + Sync + 'static {
    const ELEMENT: ElementType;

    fn slice(buffer: &Buffer) -> Option<&[Self]>;
    fn slice_mut(buffer: &mut Buffer) -> Option<&mut [Self]>;
    fn into_buffer(data: Vec<Self>) -> Buffer;
}

macro_rules! dtype {
    ($rt:ty, $variant:ident, $element:ident) => {
        impl DType for $rt {
            const ELEMENT: ElementType = ElementType::$element;

            fn slice(buffer: &Buffer) -> Option<&[Self]> {
                match buffer {
                    Buffer::$variant(data) => Some(data.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut Buffer) -> Option<&mut [Self]> {
                match buffer {
                    Buffer::$variant(data) => Some(data.as_mut_slice()),
                    _ => None,
                }
            }

            fn into_buffer(data: Vec<Self>) -> Buffer {
                Buffer::$variant(data)
            }
        }

        impl From<Vec<$rt>> for Buffer {
            fn from(data: Vec<$rt>) -> Self {
                Buffer::$variant(data)
            }
        }
    };
}

dtype!(bool, Bool, Bool);
dtype!(u8, U8, UInt8);
dtype!(i32, I32, Int32);
dtype!(i64, I64, Int64);
dtype!(f32, F32, Float32);
dtype!(f64, F64, Float64);
dtype!(String, Str, String);
