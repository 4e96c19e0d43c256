use crate::core::{data_type::DataType, value::Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const ATTR_TYPE: &str = "type";
pub const ATTR_LENGTH: &str = "length";
pub const ATTR_DECIMALS: &str = "decimals";

/// Ordered, format-specific column metadata (type, length, decimals, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAttributes(IndexMap<String, Value>);

impl FieldAttributes {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn typed(data_type: DataType) -> Self {
        let mut attrs = Self::new();
        attrs.set_data_type(data_type);
        attrs
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Declared type; fields without one are treated as text.
    pub fn data_type(&self) -> DataType {
        self.0
            .get(ATTR_TYPE)
            .and_then(|v| match v {
                Value::String(name) => DataType::from_name(name).ok(),
                _ => None,
            })
            .unwrap_or(DataType::String)
    }

    pub fn set_data_type(&mut self, data_type: DataType) {
        self.0
            .insert(ATTR_TYPE.to_string(), Value::String(data_type.name().to_string()));
    }

    pub fn length(&self) -> Option<usize> {
        self.0
            .get(ATTR_LENGTH)
            .and_then(Value::as_i64)
            .and_then(|l| usize::try_from(l).ok())
    }

    pub fn set_length(&mut self, length: usize) {
        self.0
            .insert(ATTR_LENGTH.to_string(), Value::Int(length as i64));
    }

    pub fn decimals(&self) -> Option<usize> {
        self.0
            .get(ATTR_DECIMALS)
            .and_then(Value::as_i64)
            .and_then(|d| usize::try_from(d).ok())
    }
}

/// Descriptor of one column.
///
/// For output fields `value` holds the expression text; for input fields it
/// holds the reference token (`!alias.name!`) that pulls the column into an
/// expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub original_name: String,
    pub attributes: FieldAttributes,
    pub value: String,
}

impl Field {
    pub fn new(name: &str, attributes: FieldAttributes) -> Self {
        Field {
            name: name.to_string(),
            original_name: name.to_string(),
            attributes,
            value: String::new(),
        }
    }

    /// Input column of the table opened as `alias`.
    pub fn input(alias: &str, name: &str, attributes: FieldAttributes) -> Self {
        Field {
            value: Self::reference_token(alias, name),
            ..Self::new(name, attributes)
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn reference_token(alias: &str, name: &str) -> String {
        format!("!{alias}.{name}!")
    }

    pub fn data_type(&self) -> DataType {
        self.attributes.data_type()
    }

    pub fn blank_value(&self) -> Value {
        self.data_type().blank_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_field_carries_reference_token() {
        let field = Field::input("parcels", "OWNER", FieldAttributes::typed(DataType::VarChar));
        assert_eq!(field.value, "!parcels.OWNER!");
        assert_eq!(field.original_name, "OWNER");
        assert_eq!(field.data_type(), DataType::VarChar);
    }

    #[test]
    fn attributes_keep_insertion_order() {
        let mut attrs = FieldAttributes::typed(DataType::Double);
        attrs.set_length(12);
        attrs.insert(ATTR_DECIMALS, Value::Int(3));
        let keys: Vec<_> = attrs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![ATTR_TYPE, ATTR_LENGTH, ATTR_DECIMALS]);
        assert_eq!(attrs.length(), Some(12));
        assert_eq!(attrs.decimals(), Some(3));
    }

    #[test]
    fn untyped_field_is_text() {
        let field = Field::new("Note", FieldAttributes::new());
        assert_eq!(field.blank_value(), Value::String(String::new()));
    }
}
