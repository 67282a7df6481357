//! Error types for the tessera IR.

/// Errors that can occur when inspecting IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// An expression that should produce a value has no resolved type.
    #[error("expression [{index}] has no resolved type")]
    UntypedExpression { index: usize },
}
