//! Functions: the unit of planning and analysis.

use std::collections::HashMap;

use crate::error::IrError;
use crate::expr::{Expr, OpKind};
use crate::handle::{Arena, Handle};
use crate::types::{DataType, DeviceType, TensorType, Type, TypeInterner};

/// A function over tensor values.
///
/// Owns the expression arena for its body, the interned type arena, and
/// the resolved type of every value-producing expression. Optional
/// per-node device annotations record where a value should live.
#[derive(Clone, Debug)]
pub struct Function {
    /// Optional function name.
    pub name: Option<String>,
    /// Structurally deduplicated types.
    pub types: TypeInterner,
    /// Expression arena for the body.
    pub expressions: Arena<Expr>,
    /// Formal parameters, each a handle to an [`Expr::Var`] node.
    pub params: Vec<Handle<Expr>>,
    /// The body expression, once built.
    pub body: Option<Handle<Expr>>,
    /// Per-node device placement annotations.
    pub device_annotations: HashMap<Handle<Expr>, DeviceType>,
    /// Resolved type per value-producing expression.
    expr_types: HashMap<Handle<Expr>, Handle<Type>>,
}

impl Function {
    /// Creates an empty function with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            types: TypeInterner::new(),
            expressions: Arena::new(),
            params: Vec::new(),
            body: None,
            device_annotations: HashMap::new(),
            expr_types: HashMap::new(),
        }
    }

    /// Appends an expression with a resolved type.
    pub fn append(&mut self, expr: Expr, ty: Handle<Type>) -> Handle<Expr> {
        let handle = self.expressions.append(expr);
        self.expr_types.insert(handle, ty);
        handle
    }

    /// Appends an expression that produces no tensor value (operator
    /// references, global references, nested functions).
    pub fn append_opaque(&mut self, expr: Expr) -> Handle<Expr> {
        self.expressions.append(expr)
    }

    /// Interns a tensor type with fully concrete dimensions.
    pub fn tensor_type(&mut self, dims: &[i64], dtype: DataType) -> Handle<Type> {
        self.types
            .intern(Type::Tensor(TensorType::with_dims(dims, dtype)))
    }

    /// Interns a tuple type from its field tensor types.
    pub fn tuple_type(&mut self, fields: Vec<TensorType>) -> Handle<Type> {
        self.types.intern(Type::Tuple(fields))
    }

    /// Declares a function parameter of the given type.
    pub fn param(&mut self, name: impl Into<String>, ty: Handle<Type>) -> Handle<Expr> {
        let var = self.append(Expr::Var { name: name.into() }, ty);
        self.params.push(var);
        var
    }

    /// Appends a constant tensor.
    pub fn constant(&mut self, data: Vec<u8>, ty: Handle<Type>) -> Handle<Expr> {
        self.append(Expr::Constant { data }, ty)
    }

    /// Appends an operator reference and a call to it.
    pub fn call(&mut self, op: OpKind, args: Vec<Handle<Expr>>, ty: Handle<Type>) -> Handle<Expr> {
        let op = self.append_opaque(Expr::Op(op));
        self.append(Expr::Call { op, args }, ty)
    }

    /// The resolved type of an expression.
    pub fn type_of(&self, expr: Handle<Expr>) -> Result<&Type, IrError> {
        if self.expressions.try_get(expr).is_none() {
            return Err(IrError::BadHandle {
                index: expr.index(),
                size: self.expressions.len(),
            });
        }
        self.expr_types
            .get(&expr)
            .map(|&ty| &self.types[ty])
            .ok_or(IrError::UntypedExpression {
                index: expr.index(),
            })
    }

    /// Records the device a node's output is placed on.
    pub fn annotate_device(&mut self, expr: Handle<Expr>, device: DeviceType) {
        self.device_annotations.insert(expr, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_type_a_call() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[1, 64], DataType::F32);
        let x = f.param("x", ty);
        let y = f.call(OpKind::Relu, vec![x], ty);
        f.body = Some(y);

        assert_eq!(f.params, vec![x]);
        match f.type_of(y).unwrap() {
            Type::Tensor(t) => assert_eq!(t.rank(), 2),
            Type::Tuple(_) => panic!("expected tensor type"),
        }
    }

    #[test]
    fn operator_references_are_untyped() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[4], DataType::F32);
        let x = f.param("x", ty);
        let y = f.call(OpKind::Relu, vec![x], ty);
        let op = match f.expressions[y] {
            Expr::Call { op, .. } => op,
            _ => panic!("expected call"),
        };
        assert!(matches!(
            f.type_of(op),
            Err(IrError::UntypedExpression { .. })
        ));
    }

    #[test]
    fn type_of_foreign_handle_is_rejected() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[4], DataType::F32);
        f.param("x", ty);

        let mut other = Function::new("other");
        let oty = other.tensor_type(&[4], DataType::F32);
        other.param("a", oty);
        let foreign = other.param("b", oty);

        assert!(matches!(
            f.type_of(foreign),
            Err(IrError::BadHandle { .. })
        ));
    }

    #[test]
    fn device_annotations() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[4], DataType::F32);
        let x = f.param("x", ty);
        f.annotate_device(x, DeviceType(4));
        assert_eq!(f.device_annotations.get(&x), Some(&DeviceType(4)));
    }
}
