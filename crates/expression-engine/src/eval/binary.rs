use crate::{
    ast::BinaryOp,
    error::{ExpressionError, Result},
};
use model::core::value::Value;
use std::cmp::Ordering;

/// Binary operation evaluator that handles different value type combinations
pub(crate) struct BinaryOpEvaluator<'a> {
    left: &'a Value,
    right: &'a Value,
    op: BinaryOp,
}

impl<'a> BinaryOpEvaluator<'a> {
    pub fn new(left: &'a Value, right: &'a Value, op: BinaryOp) -> Self {
        Self { left, right, op }
    }

    pub fn evaluate(&self) -> Result<Value> {
        use Value::*;

        match (self.left, self.right) {
            (String(_), _) | (_, String(_)) if self.op == BinaryOp::Add => Ok(String(format!(
                "{}{}",
                self.left.as_text(),
                self.right.as_text()
            ))),
            (Null, Null) => Ok(self.eval_null_null()),
            (Null, _) | (_, Null) => Ok(self.eval_null_other()),
            (Int(l), Int(r)) => self.eval_int(*l, *r),
            (Int(_) | Float(_), Int(_) | Float(_)) => self.eval_float(),
            (String(l), String(r)) => self.eval_ordered(l.cmp(r)),
            (Boolean(l), Boolean(r)) => self.eval_boolean(*l, *r),
            (Date(l), Date(r)) => self.eval_ordered(l.cmp(r)),
            (Timestamp(l), Timestamp(r)) => self.eval_ordered(l.cmp(r)),
            _ => match self.op {
                BinaryOp::Equal => Ok(Boolean(false)),
                BinaryOp::NotEqual => Ok(Boolean(true)),
                _ => Err(self.unsupported()),
            },
        }
    }

    fn eval_int(&self, l: i64, r: i64) -> Result<Value> {
        use Value::*;
        let overflow = || ExpressionError::InvalidValue(format!("{l} {} {r} overflows", self.op.symbol()));

        match self.op {
            BinaryOp::Add => l.checked_add(r).map(Int).ok_or_else(overflow),
            BinaryOp::Subtract => l.checked_sub(r).map(Int).ok_or_else(overflow),
            BinaryOp::Multiply => l.checked_mul(r).map(Int).ok_or_else(overflow),
            BinaryOp::Divide => {
                if r == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                // Exact quotients stay integral.
                match l.checked_rem(r) {
                    Some(0) => l.checked_div(r).map(Int).ok_or_else(overflow),
                    _ => Ok(Float(l as f64 / r as f64)),
                }
            }
            BinaryOp::Modulo => {
                if r == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                l.checked_rem(r).map(Int).ok_or_else(overflow)
            }
            _ => self.eval_ordered(l.cmp(&r)),
        }
    }

    fn eval_float(&self) -> Result<Value> {
        use Value::*;
        let (Some(l), Some(r)) = (self.left.as_f64(), self.right.as_f64()) else {
            return Err(self.unsupported());
        };

        match self.op {
            BinaryOp::Add => Ok(Float(l + r)),
            BinaryOp::Subtract => Ok(Float(l - r)),
            BinaryOp::Multiply => Ok(Float(l * r)),
            BinaryOp::Divide | BinaryOp::Modulo if r == 0.0 => Err(ExpressionError::DivisionByZero),
            BinaryOp::Divide => Ok(Float(l / r)),
            BinaryOp::Modulo => Ok(Float(l % r)),
            BinaryOp::Equal => Ok(Boolean(nearly_equal(l, r))),
            BinaryOp::NotEqual => Ok(Boolean(!nearly_equal(l, r))),
            _ => match l.partial_cmp(&r) {
                Some(ord) => self.eval_ordered(ord),
                None => Err(ExpressionError::InvalidValue(format!("cannot compare {l} and {r}"))),
            },
        }
    }

    /// Comparison operators over an already computed ordering.
    fn eval_ordered(&self, ord: Ordering) -> Result<Value> {
        use Value::*;
        match self.op {
            BinaryOp::Equal => Ok(Boolean(ord == Ordering::Equal)),
            BinaryOp::NotEqual => Ok(Boolean(ord != Ordering::Equal)),
            BinaryOp::GreaterThan => Ok(Boolean(ord == Ordering::Greater)),
            BinaryOp::LessThan => Ok(Boolean(ord == Ordering::Less)),
            BinaryOp::GreaterOrEqual => Ok(Boolean(ord != Ordering::Less)),
            BinaryOp::LessOrEqual => Ok(Boolean(ord != Ordering::Greater)),
            _ => Err(self.unsupported()),
        }
    }

    fn eval_boolean(&self, l: bool, r: bool) -> Result<Value> {
        use Value::*;
        match self.op {
            BinaryOp::And => Ok(Boolean(l && r)),
            BinaryOp::Or => Ok(Boolean(l || r)),
            _ => self.eval_ordered(l.cmp(&r)),
        }
    }

    fn eval_null_null(&self) -> Value {
        use Value::*;
        match self.op {
            BinaryOp::Equal => Boolean(true),
            BinaryOp::NotEqual => Boolean(false),
            _ => Null,
        }
    }

    fn eval_null_other(&self) -> Value {
        use Value::*;
        match self.op {
            BinaryOp::Equal => Boolean(false),
            BinaryOp::NotEqual => Boolean(true),
            _ => Null,
        }
    }

    fn unsupported(&self) -> ExpressionError {
        ExpressionError::TypeMismatch {
            expected: format!("operands supported by '{}'", self.op.symbol()),
            actual: format!("{} and {}", self.left.data_type(), self.right.data_type()),
        }
    }
}

/// Equality within a few ulps, scaled to the operands' magnitude.
fn nearly_equal(l: f64, r: f64) -> bool {
    if l == r {
        return true;
    }
    let scale = l.abs().max(r.abs());
    (l - r).abs() <= scale * 4.0 * f64::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(l: Value, op: BinaryOp, r: Value) -> Result<Value> {
        BinaryOpEvaluator::new(&l, &r, op).evaluate()
    }

    #[test]
    fn integer_arithmetic() {
        assert_eq!(eval(Value::Int(2), BinaryOp::Add, Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(eval(Value::Int(6), BinaryOp::Divide, Value::Int(3)), Ok(Value::Int(2)));
        assert_eq!(
            eval(Value::Int(7), BinaryOp::Divide, Value::Int(2)),
            Ok(Value::Float(3.5))
        );
        assert_eq!(
            eval(Value::Int(1), BinaryOp::Divide, Value::Int(0)),
            Err(ExpressionError::DivisionByZero)
        );
        assert!(eval(Value::Int(i64::MAX), BinaryOp::Add, Value::Int(1)).is_err());
    }

    #[test]
    fn float_equality_scales_with_magnitude() {
        let sum = eval(Value::Float(0.1), BinaryOp::Add, Value::Float(0.2)).unwrap();
        assert_eq!(eval(sum, BinaryOp::Equal, Value::Float(0.3)), Ok(Value::Boolean(true)));
        assert_eq!(
            eval(Value::Float(1000.0), BinaryOp::Equal, Value::Float(1000.001)),
            Ok(Value::Boolean(false))
        );
        assert_eq!(
            eval(Value::Float(1e12), BinaryOp::NotEqual, Value::Float(1e12 + 1.0)),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            eval(Value::Float(0.0), BinaryOp::Equal, Value::Float(1e-300)),
            Ok(Value::Boolean(false))
        );
    }

    #[test]
    fn text_concatenation() {
        assert_eq!(
            eval(Value::String("lot ".into()), BinaryOp::Add, Value::Int(4)),
            Ok(Value::String("lot 4".into()))
        );
        assert_eq!(
            eval(Value::String("a".into()), BinaryOp::Add, Value::Null),
            Ok(Value::String("a".into()))
        );
    }

    #[test]
    fn nulls_propagate_through_arithmetic() {
        assert_eq!(eval(Value::Null, BinaryOp::Multiply, Value::Int(2)), Ok(Value::Null));
        assert_eq!(
            eval(Value::Null, BinaryOp::Equal, Value::Null),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn mismatched_types() {
        assert_eq!(
            eval(Value::Int(1), BinaryOp::Equal, Value::Boolean(true)),
            Ok(Value::Boolean(false))
        );
        assert!(matches!(
            eval(Value::Boolean(true), BinaryOp::Subtract, Value::Int(1)),
            Err(ExpressionError::TypeMismatch { .. })
        ));
    }
}
