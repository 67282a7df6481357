//! 2d image ("texture") shape conventions.
//!
//! Texture-scoped tensors are stored as 2d images. An N-d shape is
//! collapsed to `(height, width, channel)` by an axis separator derived
//! from the scope string; the last dimension is always the channel and
//! is never folded into width or height.

use crate::error::PlanError;

/// The flattened 2d extent of a texture-scoped tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture2dShape {
    pub width: i64,
    pub height: i64,
    pub channel: i64,
}

/// Whether a storage scope is backed by a 2d image.
pub fn is_texture_storage(scope: &str) -> bool {
    scope.contains("texture")
}

/// The axis separator that splits an N-d shape into image rows and columns.
///
/// - `"texture:weight"`: the leading dimension becomes the height,
///   e.g. `[O,I,H,W,c]` -> `[O, I*H*W, c]`
/// - `"texture:nhwc"`: the first two dimensions become the height,
///   e.g. `[N,H,W,C,c]` -> `[N*H, W*C, c]`
/// - any other texture scope: all but the last two dimensions become
///   the height, e.g. `[N,C,H,W,c]` -> `[N*C*H, W, c]`
pub fn texture_layout_separator(rank: usize, scope: &str) -> Result<usize, PlanError> {
    let axis = match scope {
        "texture:weight" => 1,
        "texture:nhwc" => 2,
        _ => rank.saturating_sub(2),
    };
    if rank < 2 || axis >= rank {
        return Err(PlanError::TextureFlattening { rank, axis });
    }
    Ok(axis)
}

/// Collapses a concrete N-d shape at `axis`.
///
/// Dimensions below the separator multiply into the height, dimensions
/// from the separator up to the second-to-last multiply into the width,
/// and the last dimension is carried through as the channel.
pub fn apply_texture_flattening(shape: &[i64], axis: usize) -> Texture2dShape {
    let rank = shape.len();
    assert!(axis < rank, "axis separator {axis} out of range for rank {rank}");
    let mut texture = Texture2dShape {
        width: 1,
        height: 1,
        channel: shape[rank - 1],
    };
    for (i, &dim) in shape[..rank - 1].iter().enumerate() {
        if i < axis {
            texture.height *= dim;
        } else {
            texture.width *= dim;
        }
    }
    texture
}
