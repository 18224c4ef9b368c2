mod buffer;

pub(crate) use buffer::with_buffer;
pub use buffer::{Buffer, SharedBuffer};

use crate::{DType, ElementType, Error, Result, Shape};

/// How a tensor's storage is owned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// Build-time data that is never reallocated.
    Constant,
    /// Size fixed by an allocation pass, backed by the subgraph's arena.
    Static,
    /// Independently owned storage that may be resized or shared at any time.
    Dynamic,
}

impl AllocationKind {
    /// Allowed transitions: staying put, and `Static` to `Dynamic`.
    pub fn can_become(self, next: AllocationKind) -> bool {
        self == next || (self == Self::Static && next == Self::Dynamic)
    }
}

/// A typed, shaped handle onto (possibly shared) storage.
#[derive(Clone, Debug)]
pub struct Tensor {
    name: Option<String>,
    dtype: ElementType,
    shape: Shape,
    kind: AllocationKind,
    buffer: Option<SharedBuffer>,
    /// Shape only becomes known while the producing operator runs.
    deferred: bool,
}

impl Tensor {
    /// An unallocated tensor. Variable-length element types start out dynamic.
    pub fn new(dtype: ElementType, shape: impl Into<Shape>) -> Self {
        let kind = if dtype.is_variable_length() {
            AllocationKind::Dynamic
        } else {
            AllocationKind::Static
        };
        Self {
            name: None,
            dtype,
            shape: shape.into(),
            kind,
            buffer: None,
            deferred: false,
        }
    }

    /// A constant tensor holding `data`.
    pub fn constant<T: DType>(shape: impl Into<Shape>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        if shape.element_count() != data.len() {
            return Err(Error::shape_mismatch(format!(
                "constant of shape {shape} given {} elements",
                data.len()
            )));
        }
        Ok(Self {
            name: None,
            dtype: T::ELEMENT,
            shape,
            kind: AllocationKind::Constant,
            buffer: Some(SharedBuffer::new(T::into_buffer(data))),
            deferred: false,
        })
    }

    /// An owned dynamic slot with no storage yet.
    pub(crate) fn dynamic_slot(dtype: ElementType) -> Self {
        Self {
            kind: AllocationKind::Dynamic,
            ..Self::new(dtype, Shape::scalar())
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn buffer(&self) -> Option<&SharedBuffer> {
        self.buffer.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether the current storage matches the shape.
    pub fn has_storage_for_shape(&self) -> bool {
        self.buffer
            .as_ref()
            .is_some_and(|b| b.as_buffer().len() == self.shape.element_count())
    }

    /// Handles referring to this tensor's storage, zero when unallocated.
    pub fn ref_count(&self) -> usize {
        self.buffer.as_ref().map_or(0, SharedBuffer::ref_count)
    }

    pub fn shares_buffer_with(&self, other: &Tensor) -> bool {
        match (&self.buffer, &other.buffer) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Size of the tensor's contents in bytes.
    ///
    /// Fixed-size types are measured from the shape, variable-length ones from
    /// their current storage.
    pub fn byte_size(&self) -> usize {
        match self.dtype.size_of() {
            Some(size) => size * self.shape.element_count(),
            None => self.buffer.as_ref().map_or(0, |b| b.as_buffer().byte_len()),
        }
    }

    pub(crate) fn set_kind(&mut self, next: AllocationKind) -> Result<()> {
        if !self.kind.can_become(next) {
            return Err(Error::InvalidKindTransition {
                from: self.kind,
                to: next,
            });
        }
        if self.kind != next {
            tracing::debug!(name = ?self.name, shape = %self.shape, "tensor becomes {next:?}");
        }
        self.kind = next;
        Ok(())
    }

    pub(crate) fn mark_deferred(&mut self) -> Result<()> {
        self.set_kind(AllocationKind::Dynamic)?;
        self.deferred = true;
        self.buffer = None;
        Ok(())
    }

    /// Change the logical shape.
    ///
    /// A `Static` tensor that already owns storage of a different size becomes
    /// `Dynamic`; its old arena storage is handed back to the caller.
    pub(crate) fn resize(&mut self, shape: Shape) -> Result<Option<Buffer>> {
        self.deferred = false;
        if self.shape == shape {
            return Ok(None);
        }
        if self.kind == AllocationKind::Constant {
            return Err(Error::shape_mismatch(format!(
                "constant tensor of shape {} cannot be resized to {shape}",
                self.shape
            )));
        }
        let size_changed = shape.element_count() != self.shape.element_count();
        self.shape = shape;
        if !size_changed {
            return Ok(None);
        }
        let released = self.buffer.take();
        if self.kind == AllocationKind::Static && released.is_some() {
            self.set_kind(AllocationKind::Dynamic)?;
            return Ok(released.and_then(|b| b.try_unwrap().ok()));
        }
        Ok(None)
    }

    pub(crate) fn set_buffer(&mut self, buffer: SharedBuffer) {
        self.buffer = Some(buffer);
    }

    pub(crate) fn take_buffer(&mut self) -> Option<SharedBuffer> {
        self.buffer.take()
    }

    /// Read the elements.
    pub fn data<T: DType>(&self) -> Result<&[T]> {
        let buffer = self.buffer.as_ref().ok_or(Error::UninitializedTensor)?;
        T::slice(buffer.as_buffer())
            .ok_or_else(|| Error::type_mismatch("tensor read", T::ELEMENT, self.dtype))
    }

    pub fn to_vec<T: DType>(&self) -> Result<Vec<T>> {
        Ok(self.data::<T>()?.to_vec())
    }

    /// Mutable elements. Storage shared with another handle is copied first.
    pub fn data_mut<T: DType>(&mut self) -> Result<&mut [T]> {
        if self.kind == AllocationKind::Constant {
            crate::bail!("constant tensors are read-only");
        }
        let dtype = self.dtype;
        let buffer = self.buffer.as_mut().ok_or(Error::UninitializedTensor)?;
        T::slice_mut(buffer.make_mut()?)
            .ok_or_else(|| Error::type_mismatch("tensor write", T::ELEMENT, dtype))
    }

    /// Storage the caller is about to overwrite completely.
    ///
    /// Shared or wrongly sized storage is replaced by a fresh allocation instead
    /// of being copied.
    pub(crate) fn storage_for_overwrite(&mut self) -> Result<&mut Buffer> {
        if self.kind == AllocationKind::Constant {
            crate::bail!("constant tensors are read-only");
        }
        let len = self.shape.element_count();
        let reusable = self
            .buffer
            .as_ref()
            .is_some_and(|b| b.is_unique() && b.as_buffer().len() == len);
        if !reusable {
            self.buffer = Some(SharedBuffer::new(Buffer::zeroed(self.dtype, len)?));
        }
        match self.buffer.as_mut().and_then(SharedBuffer::get_mut) {
            Some(buffer) => Ok(buffer),
            None => crate::bail!("tensor storage is still shared after reallocation"),
        }
    }

    pub(crate) fn data_for_overwrite<T: DType>(&mut self) -> Result<&mut [T]> {
        let dtype = self.dtype;
        T::slice_mut(self.storage_for_overwrite()?)
            .ok_or_else(|| Error::type_mismatch("tensor write", T::ELEMENT, dtype))
    }

    /// Install freshly computed contents, which must fill the shape exactly.
    pub(crate) fn set_storage(&mut self, buffer: Buffer) -> Result<()> {
        if self.kind == AllocationKind::Constant {
            crate::bail!("constant tensors are read-only");
        }
        if buffer.dtype() != self.dtype {
            return Err(Error::type_mismatch("tensor write", self.dtype, buffer.dtype()));
        }
        if buffer.len() != self.shape.element_count() {
            return Err(Error::shape_mismatch(format!(
                "{} elements do not fill a tensor of shape {}",
                buffer.len(),
                self.shape
            )));
        }
        self.buffer = Some(SharedBuffer::new(buffer));
        Ok(())
    }

    /// Replace the contents with `values`, which must match the shape.
    pub fn copy_from_slice<T: DType>(&mut self, values: &[T]) -> Result<()> {
        if values.len() != self.shape.element_count() {
            return Err(Error::shape_mismatch(format!(
                "{} values do not fill a tensor of shape {}",
                values.len(),
                self.shape
            )));
        }
        self.data_for_overwrite::<T>()?.clone_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_static_may_become_dynamic() {
        use AllocationKind::*;
        assert!(Static.can_become(Dynamic));
        assert!(Dynamic.can_become(Dynamic));
        assert!(!Dynamic.can_become(Static));
        assert!(!Constant.can_become(Dynamic));

        let mut tensor = Tensor::new(ElementType::Int32, [2]);
        tensor.set_kind(Dynamic).unwrap();
        assert!(matches!(
            tensor.set_kind(Static),
            Err(Error::InvalidKindTransition { from: Dynamic, to: Static })
        ));
    }

    #[test]
    fn resizing_allocated_static_storage_turns_dynamic() {
        let mut tensor = Tensor::new(ElementType::Float32, [2]);
        // Same element count before allocation keeps the kind.
        assert!(tensor.resize(Shape::from([3])).unwrap().is_none());
        assert_eq!(tensor.kind(), AllocationKind::Static);

        tensor.copy_from_slice(&[1f32, 2., 3.]).unwrap();
        assert!(tensor.resize(Shape::from([3, 1])).unwrap().is_none());
        assert_eq!(tensor.kind(), AllocationKind::Static);
        assert!(tensor.has_storage_for_shape());

        let released = tensor.resize(Shape::from([5])).unwrap();
        assert_eq!(released.map(|b| b.len()), Some(3));
        assert_eq!(tensor.kind(), AllocationKind::Dynamic);
        assert!(!tensor.is_allocated());
    }

    #[test]
    fn constants_are_read_only() {
        let mut constant = Tensor::constant([2], vec![1i32, 2]).unwrap();
        assert_eq!(constant.kind(), AllocationKind::Constant);
        assert!(constant.data_mut::<i32>().is_err());
        assert!(matches!(
            constant.resize(Shape::from([3])),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Tensor::constant([3], vec![1i32]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reads_need_a_write_first() {
        let tensor = Tensor::dynamic_slot(ElementType::Int64);
        assert!(matches!(tensor.data::<i64>(), Err(Error::UninitializedTensor)));
        assert_eq!(tensor.ref_count(), 0);
    }

    #[test]
    fn typed_access_checks_the_element_type() {
        let mut tensor = Tensor::new(ElementType::Int32, [1]);
        tensor.copy_from_slice(&[4i32]).unwrap();
        assert!(matches!(
            tensor.data::<f32>(),
            Err(Error::TypeMismatch {
                expected: ElementType::Float32,
                actual: ElementType::Int32,
                ..
            })
        ));
    }

    #[test]
    fn overwrite_detaches_shared_storage() {
        let mut a = Tensor::new(ElementType::Int32, [2]);
        a.copy_from_slice(&[1, 2]).unwrap();
        let mut b = a.clone();
        assert!(b.shares_buffer_with(&a));
        b.copy_from_slice(&[3, 4]).unwrap();
        assert!(!b.shares_buffer_with(&a));
        assert_eq!(a.data::<i32>().unwrap(), &[1, 2]);
    }
}
