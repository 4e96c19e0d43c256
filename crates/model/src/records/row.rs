use crate::core::{data_type::DataType, value::Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: Option<Value>,
    pub data_type: DataType,
}

/// Named values of one record, in the writing table's field order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowData {
    pub entity: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(entity: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .and_then(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.field_values
            .iter()
            .map(|f| f.value.clone().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let row = RowData::new(
            "out",
            vec![FieldValue {
                name: "Owner".into(),
                value: Some(Value::String("Ada".into())),
                data_type: DataType::VarChar,
            }],
        );
        assert_eq!(row.get_value("OWNER"), Value::String("Ada".into()));
        assert_eq!(row.get_value("missing"), Value::Null);
    }
}
