use crate::{
    error::{ExpressionError, Result},
    functions::{count_arg, expect_args, number_arg},
};
use model::core::value::Value;

/// Text argument; nulls read as the empty string.
fn text_arg(args: &[Value], index: usize) -> String {
    args.get(index).map(Value::as_text).unwrap_or_default()
}

fn map_text(function: &str, args: &[Value], f: impl Fn(&str) -> String) -> Result<Value> {
    expect_args(function, args, 1, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        other => Ok(Value::String(f(&other.as_text()))),
    }
}

pub fn eval_upper(args: &[Value]) -> Result<Value> {
    map_text("upper", args, str::to_uppercase)
}

pub fn eval_lower(args: &[Value]) -> Result<Value> {
    map_text("lower", args, str::to_lowercase)
}

pub fn eval_trim(args: &[Value]) -> Result<Value> {
    map_text("trim", args, |s| s.trim().to_string())
}

pub fn eval_len(args: &[Value]) -> Result<Value> {
    expect_args("len", args, 1, 1)?;
    Ok(Value::Int(args[0].text_len() as i64))
}

pub fn eval_str(args: &[Value]) -> Result<Value> {
    expect_args("str", args, 1, 1)?;
    Ok(Value::String(args[0].as_text()))
}

/// Concatenate multiple values into a string
pub fn eval_concat(args: &[Value]) -> Result<Value> {
    Ok(Value::String(args.iter().map(Value::as_text).collect()))
}

pub fn eval_left(args: &[Value]) -> Result<Value> {
    expect_args("left", args, 2, 2)?;
    let n = count_arg("left", args, 1)?;
    Ok(Value::String(text_arg(args, 0).chars().take(n).collect()))
}

pub fn eval_right(args: &[Value]) -> Result<Value> {
    expect_args("right", args, 2, 2)?;
    let n = count_arg("right", args, 1)?;
    let chars: Vec<char> = text_arg(args, 0).chars().collect();
    let start = chars.len().saturating_sub(n);
    Ok(Value::String(chars[start..].iter().collect()))
}

/// `mid(text, start, [length])` with a 1-based start.
pub fn eval_mid(args: &[Value]) -> Result<Value> {
    expect_args("mid", args, 2, 3)?;
    let start = count_arg("mid", args, 1)?;
    if start == 0 {
        return Err(ExpressionError::InvalidFunctionArgs {
            function: "mid".to_string(),
            message: "start position is 1-based".to_string(),
        });
    }
    let text = text_arg(args, 0);
    let skipped = text.chars().skip(start - 1);
    let result = if args.len() == 3 {
        skipped.take(count_arg("mid", args, 2)?).collect()
    } else {
        skipped.collect()
    };
    Ok(Value::String(result))
}

pub fn eval_replace(args: &[Value]) -> Result<Value> {
    expect_args("replace", args, 3, 3)?;
    let from = text_arg(args, 1);
    if from.is_empty() {
        return Ok(Value::String(text_arg(args, 0)));
    }
    Ok(Value::String(text_arg(args, 0).replace(&from, &text_arg(args, 2))))
}

fn padding(function: &str, args: &[Value]) -> Result<(String, usize, char)> {
    expect_args(function, args, 2, 3)?;
    let width = count_arg(function, args, 1)?;
    let fill = match args.get(2) {
        Some(v) => v.as_text().chars().next().ok_or_else(|| {
            ExpressionError::InvalidFunctionArgs {
                function: function.to_string(),
                message: "fill character is empty".to_string(),
            }
        })?,
        None => ' ',
    };
    Ok((text_arg(args, 0), width, fill))
}

pub fn eval_pad_left(args: &[Value]) -> Result<Value> {
    let (text, width, fill) = padding("pad_left", args)?;
    let missing = width.saturating_sub(text.chars().count());
    let mut padded: String = std::iter::repeat_n(fill, missing).collect();
    padded.push_str(&text);
    Ok(Value::String(padded))
}

pub fn eval_pad_right(args: &[Value]) -> Result<Value> {
    let (mut text, width, fill) = padding("pad_right", args)?;
    let missing = width.saturating_sub(text.chars().count());
    text.extend(std::iter::repeat_n(fill, missing));
    Ok(Value::String(text))
}

/// `iif(condition, when_true, when_false)`
pub fn eval_iif(args: &[Value]) -> Result<Value> {
    expect_args("iif", args, 3, 3)?;
    let condition = match &args[0] {
        Value::Null => false,
        v => v.as_bool().ok_or_else(|| ExpressionError::TypeMismatch {
            expected: "boolean condition for iif".to_string(),
            actual: v.data_type().to_string(),
        })?,
    };
    Ok(if condition { args[1].clone() } else { args[2].clone() })
}

/// First argument that is neither null nor empty text.
pub fn eval_coalesce(args: &[Value]) -> Result<Value> {
    Ok(args
        .iter()
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .cloned()
        .unwrap_or(Value::Null))
}

/// `format_number(value, decimals)` renders a fixed number of decimals.
pub fn eval_format_number(args: &[Value]) -> Result<Value> {
    expect_args("format_number", args, 1, 2)?;
    let decimals = if args.len() == 2 {
        count_arg("format_number", args, 1)?
    } else {
        0
    };
    match number_arg("format_number", args, 0)? {
        Some(n) => Ok(Value::String(format!("{n:.decimals$}"))),
        None => Ok(Value::Null),
    }
}
