use crate::{
    error::{ExpressionError, Result},
    functions::{expect_args, number_arg},
};
use model::core::value::Value;
use std::cmp::Ordering;

fn invalid(function: &str, message: String) -> ExpressionError {
    ExpressionError::InvalidValue(format!("{function}: {message}"))
}

/// Applies `f` to a numeric argument; nulls pass through.
fn unary_float(function: &str, args: &[Value], f: impl Fn(f64) -> Result<Value>) -> Result<Value> {
    expect_args(function, args, 1, 1)?;
    match number_arg(function, args, 0)? {
        Some(n) => f(n),
        None => Ok(Value::Null),
    }
}

fn float_to_int(function: &str, n: f64) -> Result<Value> {
    if !n.is_finite() || n.abs() >= i64::MAX as f64 {
        return Err(invalid(function, format!("{n} is out of integer range")));
    }
    Ok(Value::Int(n as i64))
}

pub fn eval_abs(args: &[Value]) -> Result<Value> {
    expect_args("abs", args, 1, 1)?;
    match &args[0] {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| invalid("abs", format!("{i} overflows"))),
        _ => unary_float("abs", args, |n| Ok(Value::Float(n.abs()))),
    }
}

fn extreme(function: &str, args: &[Value], wanted: Ordering) -> Result<Value> {
    expect_args(function, args, 1, usize::MAX)?;
    let mut best: Option<&Value> = None;
    for arg in args.iter().filter(|v| !v.is_null()) {
        best = match best {
            None => Some(arg),
            Some(current) => match arg.compare(current) {
                Some(ord) if ord == wanted => Some(arg),
                Some(_) => Some(current),
                None => {
                    return Err(ExpressionError::TypeMismatch {
                        expected: current.data_type().to_string(),
                        actual: arg.data_type().to_string(),
                    });
                }
            },
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

/// Smallest non-null argument.
pub fn eval_min(args: &[Value]) -> Result<Value> {
    extreme("min", args, Ordering::Less)
}

pub fn eval_max(args: &[Value]) -> Result<Value> {
    extreme("max", args, Ordering::Greater)
}

/// `round(x)` yields an integer, `round(x, digits)` a float.
pub fn eval_round(args: &[Value]) -> Result<Value> {
    expect_args("round", args, 1, 2)?;
    let Some(n) = number_arg("round", args, 0)? else {
        return Ok(Value::Null);
    };
    match number_arg("round", args, 1)? {
        None => float_to_int("round", n.round()),
        Some(digits) => {
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Float((n * factor).round() / factor))
        }
    }
}

pub fn eval_int(args: &[Value]) -> Result<Value> {
    expect_args("int", args, 1, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(*i)),
        other => match other.as_f64() {
            Some(n) => float_to_int("int", n.trunc()),
            None => Err(invalid("int", format!("cannot convert '{other}'"))),
        },
    }
}

pub fn eval_float(args: &[Value]) -> Result<Value> {
    expect_args("float", args, 1, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        other => other
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| invalid("float", format!("cannot convert '{other}'"))),
    }
}

pub fn eval_sqrt(args: &[Value]) -> Result<Value> {
    unary_float("sqrt", args, |n| {
        if n < 0.0 {
            return Err(invalid("sqrt", format!("negative input {n}")));
        }
        Ok(Value::Float(n.sqrt()))
    })
}

pub fn eval_pow(args: &[Value]) -> Result<Value> {
    expect_args("pow", args, 2, 2)?;
    match (number_arg("pow", args, 0)?, number_arg("pow", args, 1)?) {
        (Some(base), Some(exp)) => Ok(Value::Float(base.powf(exp))),
        _ => Ok(Value::Null),
    }
}

pub fn eval_floor(args: &[Value]) -> Result<Value> {
    unary_float("floor", args, |n| float_to_int("floor", n.floor()))
}

pub fn eval_ceil(args: &[Value]) -> Result<Value> {
    unary_float("ceil", args, |n| float_to_int("ceil", n.ceil()))
}

pub fn eval_log10(args: &[Value]) -> Result<Value> {
    unary_float("log10", args, |n| {
        if n <= 0.0 {
            return Err(invalid("log10", format!("non-positive input {n}")));
        }
        Ok(Value::Float(n.log10()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_and_round() {
        assert_eq!(eval_abs(&[Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(eval_abs(&[Value::Float(-1.5)]).unwrap(), Value::Float(1.5));
        assert_eq!(eval_round(&[Value::Float(2.6)]).unwrap(), Value::Int(3));
        assert_eq!(
            eval_round(&[Value::Float(2.345), Value::Int(1)]).unwrap(),
            Value::Float(2.3)
        );
    }

    #[test]
    fn test_min_max_skip_nulls() {
        let args = [Value::Int(3), Value::Null, Value::Float(1.5)];
        assert_eq!(eval_min(&args).unwrap(), Value::Float(1.5));
        assert_eq!(eval_max(&args).unwrap(), Value::Int(3));
        assert!(eval_max(&[Value::Int(1), Value::String("a".into())]).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval_int(&[Value::String("7.9".into())]).unwrap(), Value::Int(7));
        assert_eq!(eval_float(&[Value::Int(2)]).unwrap(), Value::Float(2.0));
        assert!(eval_int(&[Value::String("seven".into())]).is_err());
    }

    #[test]
    fn test_math_module() {
        assert_eq!(eval_sqrt(&[Value::Int(9)]).unwrap(), Value::Float(3.0));
        assert!(eval_sqrt(&[Value::Int(-1)]).is_err());
        assert_eq!(
            eval_pow(&[Value::Int(2), Value::Int(10)]).unwrap(),
            Value::Float(1024.0)
        );
        assert_eq!(eval_floor(&[Value::Float(-1.5)]).unwrap(), Value::Int(-2));
        assert_eq!(eval_ceil(&[Value::Float(1.2)]).unwrap(), Value::Int(2));
        let Value::Float(log) = eval_log10(&[Value::Int(1000)]).unwrap() else {
            panic!("expected float");
        };
        assert!((log - 3.0).abs() < 1e-12);
    }
}
