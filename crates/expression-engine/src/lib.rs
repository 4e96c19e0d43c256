pub mod ast;
pub mod compiler;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;

pub use ast::FieldRef;
pub use compiler::{CompiledExpression, CompiledField, compile, single_reference};
pub use error::{ExpressionError, Result};
pub use functions::FunctionRegistry;
