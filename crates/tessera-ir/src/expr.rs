//! Expression nodes of the functional graph IR.
//!
//! A function body is an immutable tree of [`Expr`] nodes stored in a
//! per-function arena. Every node that produces tensor values has a
//! resolved [`Type`](crate::Type) recorded by the owning
//! [`Function`](crate::Function).

use crate::func::Function;
use crate::handle::Handle;

/// Operators that may appear as the callee of a [`Expr::Call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// 2d convolution.
    Conv2d,
    /// Fully connected layer.
    Dense,
    /// Element-wise addition.
    Add,
    /// Element-wise multiplication.
    Mul,
    /// Rectified linear unit.
    Relu,
    /// Sigmoid activation.
    Sigmoid,
    /// Softmax activation.
    Softmax,
    /// Max pooling 2d.
    MaxPool2d,
    /// Average pooling 2d.
    AvgPool2d,
    /// Reshape/view.
    Reshape,
    /// Concatenation along an axis.
    Concat { axis: i32 },
    /// Any other operator, referenced by name.
    Custom { name: String },
}

impl OpKind {
    /// Canonical operator name.
    pub fn name(&self) -> &str {
        match self {
            Self::Conv2d => "conv2d",
            Self::Dense => "dense",
            Self::Add => "add",
            Self::Mul => "multiply",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Softmax => "softmax",
            Self::MaxPool2d => "max_pool2d",
            Self::AvgPool2d => "avg_pool2d",
            Self::Reshape => "reshape",
            Self::Concat { .. } => "concatenate",
            Self::Custom { name } => name,
        }
    }
}

/// An expression node.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A constant tensor embedded in the graph (weights, biases).
    Constant {
        /// Raw little-endian element bytes; may be empty for placeholders.
        data: Vec<u8>,
    },
    /// A named variable: a function parameter or a let-bound name.
    Var { name: String },
    /// Operator application. `op` points at an [`Expr::Op`] node.
    Call {
        op: Handle<Expr>,
        args: Vec<Handle<Expr>>,
    },
    /// Aggregates the outputs of its fields into one value.
    Tuple { fields: Vec<Handle<Expr>> },
    /// Projects a single field out of a tuple-typed expression.
    TupleGetItem { tuple: Handle<Expr>, index: usize },
    /// Binds `value` to `var` for use in `body`.
    Let {
        var: Handle<Expr>,
        value: Handle<Expr>,
        body: Handle<Expr>,
    },
    /// A conditional expression.
    If {
        cond: Handle<Expr>,
        then_branch: Handle<Expr>,
        else_branch: Handle<Expr>,
    },
    /// Reference to a function elsewhere in the program.
    GlobalVar { name: String },
    /// An operator reference, only meaningful as the callee of a call.
    Op(OpKind),
    /// A nested function literal. Opaque to graph-level analyses.
    Function(Box<Function>),
}

impl Expr {
    /// Short node-kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::Var { .. } => "variable",
            Self::Call { .. } => "call",
            Self::Tuple { .. } => "tuple",
            Self::TupleGetItem { .. } => "tuple-get-item",
            Self::Let { .. } => "let",
            Self::If { .. } => "if",
            Self::GlobalVar { .. } => "global-var",
            Self::Op(_) => "op",
            Self::Function(_) => "function",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names() {
        assert_eq!(OpKind::Conv2d.name(), "conv2d");
        assert_eq!(OpKind::Concat { axis: 1 }.name(), "concatenate");
        assert_eq!(
            OpKind::Custom {
                name: "layout_transform".into()
            }
            .name(),
            "layout_transform"
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(Expr::Var { name: "x".into() }.kind_name(), "variable");
        assert_eq!(Expr::Op(OpKind::Add).kind_name(), "op");
        assert_eq!(Expr::Constant { data: vec![] }.kind_name(), "constant");
    }
}
