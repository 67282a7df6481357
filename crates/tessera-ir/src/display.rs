//! Display implementations and text dump for debugging.

use std::fmt;

use crate::expr::Expr;
use crate::func::Function;
use crate::types::{DataType, Dim, ScalarKind, TensorType, Type};

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool")?,
            ScalarKind::Sint => write!(f, "i{}", self.bits)?,
            ScalarKind::Uint => write!(f, "u{}", self.bits)?,
            ScalarKind::Float => write!(f, "f{}", self.bits)?,
            ScalarKind::BFloat => write!(f, "bf{}", self.bits)?,
        }
        if self.lanes > 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Symbolic(name) => write!(f, "?{name}"),
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for dim in &self.shape {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.dtype)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(t) => write!(f, "{t}"),
            Self::Tuple(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Renders a function as indexed text lines, one per expression.
pub fn dump_function(func: &Function) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let name = func.name.as_deref().unwrap_or("<anon>");
    let _ = writeln!(out, "fn {name}({} params):", func.params.len());
    for (handle, expr) in func.expressions.iter() {
        let _ = write!(out, "  {handle:?} = ");
        match expr {
            Expr::Constant { data } => {
                let _ = write!(out, "const<{} bytes>", data.len());
            }
            Expr::Var { name } => {
                let _ = write!(out, "var %{name}");
            }
            Expr::Call { op, args } => {
                let callee = match func.expressions.try_get(*op) {
                    Some(Expr::Op(kind)) => kind.name().to_string(),
                    _ => format!("{op:?}"),
                };
                let _ = write!(out, "{callee}(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        let _ = write!(out, ", ");
                    }
                    let _ = write!(out, "{arg:?}");
                }
                let _ = write!(out, ")");
            }
            Expr::Tuple { fields } => {
                let _ = write!(out, "tuple{fields:?}");
            }
            Expr::TupleGetItem { tuple, index } => {
                let _ = write!(out, "{tuple:?}.{index}");
            }
            Expr::Let { var, value, body } => {
                let _ = write!(out, "let {var:?} = {value:?} in {body:?}");
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let _ = write!(out, "if {cond:?} then {then_branch:?} else {else_branch:?}");
            }
            Expr::GlobalVar { name } => {
                let _ = write!(out, "global @{name}");
            }
            Expr::Op(kind) => {
                let _ = write!(out, "op {}", kind.name());
            }
            Expr::Function(inner) => {
                let _ = write!(
                    out,
                    "fn-literal {}",
                    inner.name.as_deref().unwrap_or("<anon>")
                );
            }
        }
        if let Ok(ty) = func.type_of(handle) {
            let _ = write!(out, " : {ty}");
        }
        let _ = writeln!(out);
    }
    if let Some(body) = func.body {
        let _ = writeln!(out, "  return {body:?}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::OpKind;

    #[test]
    fn type_display() {
        let t = TensorType::with_dims(&[1, 64, 64, 4], DataType::F16);
        assert_eq!(t.to_string(), "tensor<1x64x64x4xf16>");

        let ty = Type::Tuple(vec![
            TensorType::with_dims(&[4], DataType::F32),
            TensorType::with_dims(&[8], DataType::U8),
        ]);
        assert_eq!(ty.to_string(), "(tensor<4xf32>, tensor<8xu8>)");
    }

    #[test]
    fn symbolic_dim_display() {
        let t = TensorType::new(
            vec![Dim::Symbolic("n".into()), Dim::Const(128)],
            DataType::F32,
        );
        assert_eq!(t.to_string(), "tensor<?nx128xf32>");
    }

    #[test]
    fn dump_contains_call_and_return() {
        let mut f = Function::new("main");
        let ty = f.tensor_type(&[1, 64], DataType::F32);
        let x = f.param("x", ty);
        let y = f.call(OpKind::Relu, vec![x], ty);
        f.body = Some(y);

        let text = dump_function(&f);
        assert!(text.contains("fn main"));
        assert!(text.contains("var %x"));
        assert!(text.contains("relu("));
        assert!(text.contains("return"));
    }
}
