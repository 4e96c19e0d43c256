use crate::{
    ast::{BinaryOp, Expr, FieldRef, UnaryOp},
    error::{ExpressionError, Result},
};
use model::core::value::Value;
use pest::{
    Parser,
    error::InputLocation,
    iterators::{Pair, Pairs},
};
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "grammar/expression.pest"]
pub struct ExpressionParser;

/// Parses expression text into an AST. Blank text parses to `None`.
pub fn parse(input: &str) -> Result<Option<Expr>> {
    let mut pairs = ExpressionParser::parse(Rule::program, input).map_err(|e| {
        let position = match e.location {
            InputLocation::Pos(p) => p,
            InputLocation::Span((start, _)) => start,
        };
        ExpressionError::Parse {
            message: e.variant.message().to_string(),
            position,
        }
    })?;

    let program = pairs.next().ok_or_else(|| parse_error("empty input", 0))?;
    program
        .into_inner()
        .find(|p| p.as_rule() == Rule::expression)
        .map(build_expression)
        .transpose()
}

fn parse_error(message: &str, position: usize) -> ExpressionError {
    ExpressionError::Parse {
        message: message.to_string(),
        position,
    }
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, position: usize) -> Result<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| parse_error("unexpected end of expression", position))
}

fn build_expression(pair: Pair<Rule>) -> Result<Expr> {
    let position = pair.as_span().start();
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            build_expression(next_pair(&mut inner, position)?)
        }
        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::comparison
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair),
        Rule::unary => build_unary(pair),
        _ => build_primary(pair),
    }
}

/// Folds `operand (op operand)*` to the left.
fn build_binary_chain(pair: Pair<Rule>) -> Result<Expr> {
    let position = pair.as_span().start();
    let mut inner = pair.into_inner();
    let mut left = build_expression(next_pair(&mut inner, position)?)?;

    while let Some(op_pair) = inner.next() {
        let op = binary_operator(&op_pair)?;
        let right = build_expression(next_pair(&mut inner, op_pair.as_span().end())?)?;
        left = Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn binary_operator(pair: &Pair<Rule>) -> Result<BinaryOp> {
    let op = match pair.as_str().to_lowercase().as_str() {
        "||" | "or" => BinaryOp::Or,
        "&&" | "and" => BinaryOp::And,
        "==" | "=" => BinaryOp::Equal,
        "!=" | "<>" => BinaryOp::NotEqual,
        ">" => BinaryOp::GreaterThan,
        "<" => BinaryOp::LessThan,
        ">=" => BinaryOp::GreaterOrEqual,
        "<=" => BinaryOp::LessOrEqual,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Subtract,
        "*" => BinaryOp::Multiply,
        "/" => BinaryOp::Divide,
        "%" => BinaryOp::Modulo,
        other => {
            return Err(parse_error(
                &format!("unknown operator: {other}"),
                pair.as_span().start(),
            ));
        }
    };
    Ok(op)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expr> {
    let mut ops = Vec::new();
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::op_unary => {
                let op = if inner.as_str() == "-" {
                    UnaryOp::Negate
                } else {
                    UnaryOp::Not
                };
                ops.push(op);
            }
            _ => operand = Some(build_expression(inner)?),
        }
    }

    let mut expr = operand.ok_or_else(|| parse_error("missing operand", 0))?;
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
        };
    }
    Ok(expr)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr> {
    let position = pair.as_span().start();
    match pair.as_rule() {
        Rule::lit_number => {
            let text = pair.as_str();
            let value = match text.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Float(
                    text.parse::<f64>()
                        .map_err(|_| parse_error(&format!("invalid number: {text}"), position))?,
                ),
            };
            Ok(Expr::Literal(value))
        }
        Rule::lit_string => {
            let text = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Expr::Literal(Value::String(text)))
        }
        Rule::lit_boolean => Ok(Expr::Literal(Value::Boolean(
            pair.as_str().eq_ignore_ascii_case("true"),
        ))),
        Rule::kw_null => Ok(Expr::Literal(Value::Null)),
        Rule::field_ref => build_field_ref(pair),
        Rule::fn_call => build_function_call(pair),
        Rule::expression => build_expression(pair),
        other => Err(parse_error(
            &format!("unexpected {other:?} in expression"),
            position,
        )),
    }
}

fn build_field_ref(pair: Pair<Rule>) -> Result<Expr> {
    let mut alias = String::new();
    let mut field = String::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ref_alias => alias = inner.as_str().to_string(),
            Rule::ref_field => field = inner.as_str().to_string(),
            _ => {}
        }
    }

    Ok(Expr::FieldRef(FieldRef { alias, field }))
}

fn build_function_call(pair: Pair<Rule>) -> Result<Expr> {
    let mut module = None;
    let mut name = String::new();
    let mut args = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::fn_name => match inner.as_str().split_once('.') {
                Some((m, n)) => {
                    module = Some(m.to_string());
                    name = n.to_string();
                }
                None => name = inner.as_str().to_string(),
            },
            Rule::expression => args.push(build_expression(inner)?),
            _ => {}
        }
    }

    Ok(Expr::Call { module, name, args })
}
