use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Parse error at position {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown function module: {0}")]
    UnknownModule(String),

    #[error("Invalid function arguments for {function}: {message}")]
    InvalidFunctionArgs { function: String, message: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ExpressionError>;
