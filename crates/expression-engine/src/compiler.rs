//! Turns expression text into a [`CompiledExpression`].
//!
//! Field references become positional slots, numbered in the order they
//! occur in the text; every occurrence gets its own slot, so a reference
//! written twice is resolved twice. Calls are bound to registry functions at
//! compile time, which is when unqualified names are qualified against the
//! default module.

use crate::{
    ast::{Expr, FieldRef},
    error::{ExpressionError, Result},
    eval::Node,
    functions::FunctionRegistry,
    parser,
};
use model::core::value::Value;
use std::fmt;
use tracing::debug;

#[derive(Clone)]
pub struct CompiledExpression {
    source: String,
    refs: Vec<FieldRef>,
    calls: Vec<String>,
    root: Node,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Field references, one per slot, in slot order.
    pub fn refs(&self) -> &[FieldRef] {
        &self.refs
    }

    /// Qualified names of the functions called, in call order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Evaluates against slot values ordered like [`Self::refs`].
    pub fn evaluate(&self, slots: &[Value]) -> Result<Value> {
        self.root.evaluate(slots)
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .field("refs", &self.refs)
            .field("calls", &self.calls)
            .finish()
    }
}

/// Compiles against the built-in functions.
pub fn compile(source: &str) -> Result<CompiledExpression> {
    compile_with(source, FunctionRegistry::standard())
}

pub fn compile_with(source: &str, registry: &FunctionRegistry) -> Result<CompiledExpression> {
    let mut compiler = Compiler {
        registry,
        refs: Vec::new(),
        calls: Vec::new(),
    };

    let root = match parser::parse(source)? {
        Some(expr) => compiler.lower(expr)?,
        None => Node::Literal(Value::Null),
    };

    debug!(
        expression = source,
        slots = compiler.refs.len(),
        calls = compiler.calls.len(),
        "Compiled expression"
    );

    Ok(CompiledExpression {
        source: source.to_string(),
        refs: compiler.refs,
        calls: compiler.calls,
        root,
    })
}

/// The reference, when the whole expression is one field reference.
pub fn single_reference(source: &str) -> Option<FieldRef> {
    match parser::parse(source) {
        Ok(Some(Expr::FieldRef(r))) => Some(r),
        _ => None,
    }
}

struct Compiler<'r> {
    registry: &'r FunctionRegistry,
    refs: Vec<FieldRef>,
    calls: Vec<String>,
}

impl Compiler<'_> {
    fn lower(&mut self, expr: Expr) -> Result<Node> {
        match expr {
            Expr::Literal(value) => Ok(Node::Literal(value)),
            Expr::FieldRef(field_ref) => {
                self.refs.push(field_ref);
                Ok(Node::Slot(self.refs.len() - 1))
            }
            Expr::Call { module, name, args } => {
                let (qualified, func) = self.registry.resolve(module.as_deref(), &name)?;
                self.calls.push(qualified.clone());
                let args = args
                    .into_iter()
                    .map(|arg| self.lower(arg))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Call {
                    name: qualified,
                    func,
                    args,
                })
            }
            Expr::Binary { left, op, right } => {
                let left = self.lower(*left)?;
                let right = self.lower(*right)?;
                Ok(Node::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                })
            }
            Expr::Unary { op, operand } => Ok(Node::Unary {
                op,
                operand: Box::new(self.lower(*operand)?),
            }),
        }
    }
}

/// Compiled form of one output field.
///
/// Text that does not compile still yields a field; evaluating it reports
/// the compile error for every row instead of failing the run.
#[derive(Debug, Clone)]
pub struct CompiledField {
    source: String,
    compiled: std::result::Result<CompiledExpression, ExpressionError>,
}

impl CompiledField {
    pub fn compile(source: &str) -> Self {
        CompiledField {
            source: source.to_string(),
            compiled: compile(source),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn error(&self) -> Option<&ExpressionError> {
        self.compiled.as_ref().err()
    }

    /// Slot references; empty when the text did not compile.
    pub fn refs(&self) -> &[FieldRef] {
        match &self.compiled {
            Ok(expr) => expr.refs(),
            Err(_) => &[],
        }
    }

    pub fn evaluate(&self, slots: &[Value]) -> Result<Value> {
        match &self.compiled {
            Ok(expr) => expr.evaluate(slots),
            Err(err) => Err(err.clone()),
        }
    }
}
