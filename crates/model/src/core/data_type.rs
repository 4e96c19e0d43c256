use crate::{core::value::Value, error::ModelError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataType {
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Date,
    Timestamp,
    Char,
    VarChar,
    String,
    Null,
}

lazy_static! {
    static ref TYPE_NAME_MAP: HashMap<&'static str, DataType> = build_type_name_map();
}

impl DataType {
    pub fn from_name(type_name: &str) -> Result<Self, ModelError> {
        let normalized = type_name.trim().to_uppercase();
        TYPE_NAME_MAP
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Short => "SMALLINT",
            DataType::Int => "INTEGER",
            DataType::Long => "BIGINT",
            DataType::Float => "REAL",
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Char => "CHAR",
            DataType::VarChar => "VARCHAR",
            DataType::String => "TEXT",
            DataType::Null => "NULL",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Short | DataType::Int | DataType::Long)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DataType::Char | DataType::VarChar | DataType::String)
    }

    /// Default scalar substituted when a join produces no row for a field
    /// of this type.
    pub fn blank_value(&self) -> Value {
        match self {
            DataType::Short | DataType::Int | DataType::Long => Value::Int(0),
            DataType::Float | DataType::Double => Value::Float(0.0),
            DataType::Boolean => Value::Boolean(false),
            DataType::Char | DataType::VarChar | DataType::String => Value::String(String::new()),
            DataType::Date | DataType::Timestamp | DataType::Null => Value::Null,
        }
    }

    /// Parses a raw text cell into this type. Empty cells are `None`.
    pub fn parse_value(&self, cell: &str) -> Option<Value> {
        if cell.is_empty() {
            return None;
        }

        match self {
            DataType::Short => cell.parse::<i16>().ok().map(|v| Value::Int(v as i64)),
            DataType::Int => cell.parse::<i32>().ok().map(|v| Value::Int(v as i64)),
            DataType::Long => cell.parse::<i64>().ok().map(Value::Int),
            DataType::Float | DataType::Double => cell.parse::<f64>().ok().map(Value::Float),
            DataType::Boolean => match cell.to_lowercase().as_str() {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            },
            DataType::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d")
                .ok()
                .map(Value::Date),
            DataType::Timestamp => parse_timestamp(cell).map(Value::Timestamp),
            DataType::Char | DataType::VarChar | DataType::String => {
                Some(Value::String(cell.to_string()))
            }
            DataType::Null => None,
        }
    }

    /// Strict conversion of a value into this type. Blank text becomes
    /// `Null` for non-text types.
    pub fn convert(&self, value: &Value) -> Result<Value, ModelError> {
        if let Value::String(s) = value
            && !self.is_text()
            && s.trim().is_empty()
        {
            return Ok(Value::Null);
        }
        let coerced = self.coerce(value.clone());
        if coerced.is_null() || self.is_text() || coerced.data_type_matches(*self) {
            Ok(coerced)
        } else {
            Err(ModelError::Conversion {
                value: value.as_text(),
                target: self.name().to_string(),
            })
        }
    }

    /// Coerces an already-typed value into this type, falling back to the
    /// value itself when it cannot be represented.
    pub fn coerce(&self, value: Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        if self.is_text() {
            return match value {
                Value::String(_) => value,
                other => Value::String(other.as_text()),
            };
        }

        match value {
            Value::String(s) => self.parse_value(s.trim()).unwrap_or(Value::String(s)),
            Value::Float(f) if self.is_integer() && f.fract() == 0.0 => Value::Int(f as i64),
            Value::Int(i) if matches!(self, DataType::Float | DataType::Double) => {
                Value::Float(i as f64)
            }
            other => other,
        }
    }
}

fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(cell) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn build_type_name_map() -> HashMap<&'static str, DataType> {
    use DataType::*;

    let entries = [
        ("SMALLINT", Short),
        ("SHORT", Short),
        ("INT", Int),
        ("INTEGER", Int),
        ("BIGINT", Long),
        ("LONG", Long),
        ("REAL", Float),
        ("FLOAT", Float),
        ("DOUBLE", Double),
        ("NUMERIC", Double),
        ("DECIMAL", Double),
        ("BOOLEAN", Boolean),
        ("BOOL", Boolean),
        ("DATE", Date),
        ("TIMESTAMP", Timestamp),
        ("DATETIME", Timestamp),
        ("CHAR", Char),
        ("VARCHAR", VarChar),
        ("TEXT", String),
        ("STRING", String),
        ("NULL", Null),
    ];

    entries.into_iter().collect()
}
