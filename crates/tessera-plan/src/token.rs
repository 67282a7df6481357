//! Storage tokens: the planner's unit of reservation.

use tessera_ir::{DeviceType, TensorType};

use crate::error::PlanError;
use crate::texture::is_texture_storage;

/// Storage id value of a token that has not been allocated yet.
pub const UNASSIGNED: i64 = -1;

/// One reservation record per produced tensor.
///
/// Tokens are created by the liveness pass, live in an arena owned by
/// the planner entry point, and are mutated by the assignment pass and
/// the allocators. "Releasing" a token returns it to a free list for
/// reuse; tokens are never destroyed before planning finishes.
#[derive(Clone, Debug)]
pub struct StorageToken {
    /// The producing tensor type (shape and dtype).
    pub ttype: TensorType,
    /// Device the tensor is placed on; 0 means unannotated.
    pub device_type: DeviceType,
    /// Backing-storage tag: `"global"` for linear buffers, any string
    /// containing `"texture"` for 2d image buffers.
    pub storage_scope: String,
    /// Remaining consumers. The buffer may be released at zero.
    pub ref_counter: usize,
    /// High-water byte size across every prototype this token served.
    pub max_bytes: u64,
    /// Assigned buffer id, or [`UNASSIGNED`].
    pub storage_id: i64,
}

impl StorageToken {
    pub(crate) fn new(ttype: TensorType, device_type: DeviceType) -> Self {
        Self {
            ttype,
            device_type,
            storage_scope: "global".to_string(),
            ref_counter: 0,
            max_bytes: 0,
            storage_id: UNASSIGNED,
        }
    }

    /// Whether this token has been given a storage id.
    pub fn is_assigned(&self) -> bool {
        self.storage_id >= 0
    }

    /// Whether this token is backed by a 2d image buffer.
    pub fn is_texture(&self) -> bool {
        is_texture_storage(&self.storage_scope)
    }
}

/// The concrete dimensions of a tensor type.
///
/// Planning refuses symbolic and negative extents.
pub(crate) fn concrete_shape(ttype: &TensorType) -> Result<Vec<i64>, PlanError> {
    let mut dims = Vec::with_capacity(ttype.shape.len());
    for dim in &ttype.shape {
        let value = dim.as_const().ok_or_else(|| PlanError::SymbolicShape {
            shape: ttype.shape.clone(),
        })?;
        if value < 0 {
            return Err(PlanError::NegativeShape { dim: value });
        }
        dims.push(value);
    }
    Ok(dims)
}

/// Byte size of a linear buffer holding one value of `ttype`.
pub(crate) fn memory_size(ttype: &TensorType) -> Result<u64, PlanError> {
    let mut size: u64 = 1;
    for dim in concrete_shape(ttype)? {
        size *= dim as u64;
    }
    Ok(size * ttype.dtype.bytes_per_element())
}
