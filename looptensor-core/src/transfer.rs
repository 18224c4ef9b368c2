//! Moving loop-carried values between tensor slots.
//!
//! Every hand-over between the loop state and a subgraph slot goes through
//! [`transfer`], with a [`TransferMode`] chosen by [`TransferPolicy::select`].

use crate::{tensor::Buffer, AllocationKind, Error, Result, Tensor};

/// How a value reaches its destination slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// The destination gets its own copy of the bytes.
    CopyDeep,
    /// The destination becomes another handle on the source's storage.
    ShareShallow,
    /// The destination already holds this value; nothing moves.
    PassThrough,
}

/// What the destination is going to do with the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Only read, e.g. the inputs of a condition subgraph.
    ReadOnly,
    /// May be written independently of the source.
    Exclusive,
    /// The slot was declared as an unchanged pass-through of the source.
    Forwarded,
}

/// Chooses a [`TransferMode`] from the tensor and the destination's needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Byte size at or above which dynamic tensors are shared instead of copied.
    pub large_tensor_threshold: Option<usize>,
}

impl TransferPolicy {
    pub fn new(large_tensor_threshold: Option<usize>) -> Self {
        Self {
            large_tensor_threshold,
        }
    }

    /// Whether a tensor of this kind and size may be shared with a writer.
    pub fn is_share_eligible(&self, kind: AllocationKind, byte_size: usize) -> bool {
        kind == AllocationKind::Dynamic
            && self
                .large_tensor_threshold
                .is_some_and(|threshold| byte_size >= threshold)
    }

    pub fn select(&self, kind: AllocationKind, byte_size: usize, access: Access) -> TransferMode {
        match access {
            Access::Forwarded => TransferMode::PassThrough,
            Access::ReadOnly => TransferMode::ShareShallow,
            Access::Exclusive if self.is_share_eligible(kind, byte_size) => {
                TransferMode::ShareShallow
            }
            Access::Exclusive => TransferMode::CopyDeep,
        }
    }

    /// Select a mode for `source` and apply it.
    pub fn transfer(
        &self,
        source: &Tensor,
        destination: &mut Tensor,
        access: Access,
    ) -> Result<Option<Buffer>> {
        let mode = self.select(source.kind(), source.byte_size(), access);
        tracing::trace!(
            ?mode,
            ?access,
            kind = ?source.kind(),
            bytes = source.byte_size(),
            "transfer"
        );
        transfer(source, destination, mode)
    }
}

/// Move the value of `source` into `destination`.
///
/// Returns arena storage the destination gave up, if any, so the owner of
/// the destination can recycle it.
pub fn transfer(
    source: &Tensor,
    destination: &mut Tensor,
    mode: TransferMode,
) -> Result<Option<Buffer>> {
    if source.dtype() != destination.dtype() {
        return Err(Error::type_mismatch(
            "loop-carried value",
            destination.dtype(),
            source.dtype(),
        ));
    }
    match mode {
        TransferMode::PassThrough => {
            if source.shape() != destination.shape() {
                return Err(Error::shape_mismatch(format!(
                    "pass-through value of shape {} reached a slot of shape {}",
                    source.shape(),
                    destination.shape()
                )));
            }
            Ok(None)
        }
        TransferMode::ShareShallow => {
            let shared = source
                .buffer()
                .cloned()
                .ok_or(Error::UninitializedTensor)?;
            let released = destination.resize(source.shape().clone())?;
            let was_static = destination.kind() == AllocationKind::Static;
            destination.set_kind(AllocationKind::Dynamic)?;
            let reclaimed = destination
                .take_buffer()
                .filter(|_| was_static)
                .and_then(|b| b.try_unwrap().ok());
            destination.set_buffer(shared);
            Ok(released.or(reclaimed))
        }
        TransferMode::CopyDeep => {
            let bytes = source
                .buffer()
                .ok_or(Error::UninitializedTensor)?
                .as_buffer();
            let released = destination.resize(source.shape().clone())?;
            destination.storage_for_overwrite()?.copy_from(bytes)?;
            Ok(released)
        }
    }
}
