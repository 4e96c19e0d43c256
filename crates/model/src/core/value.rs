use crate::core::data_type::DataType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, hash::Hash};

/// Scalar held by a staged cell, an expression result or an output record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Int(v) => v.hash(state),
            Float(v) => {
                // Hash the bits of the float to handle NaN and -0.0 correctly
                let bits = v.to_bits();
                bits.hash(state);
            }
            String(v) => v.hash(state),
            Boolean(v) => v.hash(state),
            Date(v) => v.hash(state),
            Timestamp(v) => v.hash(state),
            Null => {}
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::String(v) => v.trim().parse::<f64>().ok(),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Date(_) | Value::Timestamp(_) | Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Float(_) => None,
            Value::String(v) => v.trim().parse::<i64>().ok(),
            Value::Boolean(v) => Some(i64::from(*v)),
            Value::Date(_) | Value::Timestamp(_) | Value::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::String(v) => match v.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            Value::Boolean(v) => Some(*v),
            Value::Date(_) | Value::Timestamp(_) | Value::Null => None,
        }
    }

    /// Text rendering used when a value is written to a text-based table.
    /// `Null` renders as the empty string.
    pub fn as_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Boolean(v) => v.to_string(),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Timestamp(v) => v.to_rfc3339(),
            Value::Null => String::new(),
        }
    }

    /// Number of characters in the text rendering.
    pub fn text_len(&self) -> usize {
        match self {
            Value::String(v) => v.chars().count(),
            Value::Null => 0,
            other => other.as_text().chars().count(),
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Null, Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Canonical byte encoding used as a join key.
    ///
    /// Nulls never take part in an equi-join, so they have no key. Integral
    /// floats share the integer encoding so `1` and `1.0` join.
    pub fn join_key(&self) -> Option<Vec<u8>> {
        let key = match self {
            Value::Null => return None,
            Value::Int(v) => format!("n:{v}"),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                format!("n:{}", *v as i64)
            }
            Value::Float(v) => format!("f:{}", v.to_bits()),
            Value::String(v) => format!("s:{v}"),
            Value::Boolean(v) => format!("b:{}", u8::from(*v)),
            Value::Date(v) => format!("d:{v}"),
            Value::Timestamp(v) => format!("t:{}", v.to_rfc3339()),
        };
        Some(key.into_bytes())
    }

    /// Whether this value is a valid instance of `data_type`.
    pub fn data_type_matches(&self, data_type: DataType) -> bool {
        match self {
            Value::Int(_) => data_type.is_integer(),
            Value::Float(_) => matches!(data_type, DataType::Float | DataType::Double),
            Value::String(_) => data_type.is_text(),
            Value::Boolean(_) => data_type == DataType::Boolean,
            Value::Date(_) => data_type == DataType::Date,
            Value::Timestamp(_) => data_type == DataType::Timestamp,
            Value::Null => true,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Long,
            Value::Float(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Boolean(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Null => DataType::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_text()),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Value::from(*v),
            Value::Boolean(v) => serde_json::Value::from(*v),
            Value::Null => serde_json::Value::Null,
            other => serde_json::Value::String(other.as_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_float_joins_with_int() {
        assert_eq!(Value::Int(7).join_key(), Value::Float(7.0).join_key());
        assert_ne!(Value::Int(7).join_key(), Value::String("7".into()).join_key());
    }

    #[test]
    fn null_has_no_join_key() {
        assert!(Value::Null.join_key().is_none());
    }

    #[test]
    fn text_rendering() {
        assert_eq!(Value::Null.as_text(), "");
        assert_eq!(Value::Int(-3).as_text(), "-3");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Value::Date(date).as_text(), "2024-02-29");
        assert_eq!(Value::String("héllo".into()).text_len(), 5);
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert!(Value::Float(3.0).equal(&Value::Int(3)));
        assert_eq!(Value::Int(1).compare(&Value::String("1".into())), None);
    }
}
