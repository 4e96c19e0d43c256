mod binary;

use crate::{
    ast::{BinaryOp, UnaryOp},
    error::{ExpressionError, Result},
    functions::FunctionImpl,
};
use binary::BinaryOpEvaluator;
use model::core::value::Value;
use tracing::trace;

/// Resolved expression tree: field references are slot indices and calls
/// carry their implementation.
#[derive(Clone)]
pub(crate) enum Node {
    Literal(Value),
    Slot(usize),
    Call {
        name: String,
        func: FunctionImpl,
        args: Vec<Node>,
    },
    Binary {
        left: Box<Node>,
        op: BinaryOp,
        right: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
}

fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Null => Ok(false),
        other => other.as_bool().ok_or_else(|| ExpressionError::TypeMismatch {
            expected: "boolean".to_string(),
            actual: other.data_type().to_string(),
        }),
    }
}

impl Node {
    pub fn evaluate(&self, slots: &[Value]) -> Result<Value> {
        match self {
            Node::Literal(value) => Ok(value.clone()),

            Node::Slot(index) => slots.get(*index).cloned().ok_or_else(|| {
                ExpressionError::InvalidValue(format!("no value supplied for argument {index}"))
            }),

            Node::Call { name, func, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(slots))
                    .collect::<Result<Vec<_>>>()?;
                func(&values).inspect_err(|err| trace!(function = %name, %err, "Call failed"))
            }

            Node::Binary {
                left,
                op: op @ (BinaryOp::And | BinaryOp::Or),
                right,
            } => {
                let l = truthy(&left.evaluate(slots)?)?;
                match (op, l) {
                    (BinaryOp::And, false) => Ok(Value::Boolean(false)),
                    (BinaryOp::Or, true) => Ok(Value::Boolean(true)),
                    _ => Ok(Value::Boolean(truthy(&right.evaluate(slots)?)?)),
                }
            }

            Node::Binary { left, op, right } => {
                let l = left.evaluate(slots)?;
                let r = right.evaluate(slots)?;
                BinaryOpEvaluator::new(&l, &r, *op).evaluate()
            }

            Node::Unary { op, operand } => {
                let value = operand.evaluate(slots)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Negate, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(
                        || ExpressionError::InvalidValue(format!("-{i} overflows")),
                    ),
                    (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Negate, other) => Err(ExpressionError::TypeMismatch {
                        expected: "number".to_string(),
                        actual: other.data_type().to_string(),
                    }),
                    (UnaryOp::Not, other) => Ok(Value::Boolean(!truthy(&other)?)),
                }
            }
        }
    }
}
