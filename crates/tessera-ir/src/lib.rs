//! tessera intermediate representation.
//!
//! A functional, arena-based expression IR for tensor computation
//! graphs. Every value-producing node carries a statically resolved
//! tensor or tuple type; graph passes address nodes through typed
//! [`Handle`]s into the owning function's arena.

mod display;
mod error;
mod expr;
mod func;
mod handle;
mod types;

pub use display::dump_function;
pub use error::IrError;
pub use expr::{Expr, OpKind};
pub use func::Function;
pub use handle::{Arena, Handle};
pub use types::{DataType, DeviceType, Dim, ScalarKind, TensorType, Type, TypeInterner};
