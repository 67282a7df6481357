//! Error types for the graph memory planner.
//!
//! All planner errors are fatal: the compilation pass aborts with the
//! message, there are no retry semantics.

use tessera_ir::{Dim, Expr, Handle, IrError};

/// Errors that abort memory planning.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// An expression kind the planner does not handle (conditionals).
    #[error("unsupported expression in graph memory planning: {kind}")]
    UnsupportedExpression { kind: &'static str },

    /// A tensor dimension is not a concrete integer.
    #[error("cannot allocate memory for symbolic tensor shape {shape:?}")]
    SymbolicShape { shape: Vec<Dim> },

    /// A tensor dimension is negative.
    #[error("cannot allocate memory for tensor with negative dimension {dim}")]
    NegativeShape { dim: i64 },

    /// A storage-info entry does not match the node's tensor count.
    #[error("{scopes} storage scope entries for a node producing {tensors} tensors")]
    ScopeArityMismatch { scopes: usize, tensors: usize },

    /// Some but not all tokens carry a device annotation.
    #[error(
        "{annotated} out of {total} storage tokens are assigned a device type; \
         either all or none of the expressions are expected to be annotated"
    )]
    MixedDeviceAnnotation { annotated: usize, total: usize },

    /// A tuple projection index is out of range.
    #[error("tuple index {index} out of range for a value of {fields} tensors")]
    TupleIndexOutOfRange { index: usize, fields: usize },

    /// A node was token-created twice.
    #[error("storage tokens already assigned for expression {expr:?}")]
    TokenAlreadyAssigned { expr: Handle<Expr> },

    /// A node that should carry tokens has none (e.g. an unbound variable).
    #[error("no storage token recorded for expression {expr:?}")]
    MissingToken { expr: Handle<Expr> },

    /// The function has no body to plan.
    #[error("function has no body to plan")]
    MissingBody,

    /// A shape cannot be collapsed to a 2d image.
    #[error("cannot flatten a rank {rank} shape to a 2d image at axis {axis}")]
    TextureFlattening { rank: usize, axis: usize },

    /// An underlying IR inspection failed.
    #[error(transparent)]
    Ir(#[from] IrError),
}
