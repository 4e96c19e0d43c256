use crate::{
    cursor::JoinedRow,
    query::{JoinQuery, SlotSource},
    report::RowError,
};
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Row errors logged at warn level per field; later ones go to debug.
const WARN_PER_FIELD: usize = 5;

pub struct EvaluatedRow {
    pub record: RowData,
    pub errors: Vec<RowError>,
}

/// Computes output records from joined rows.
pub struct RowEvaluator {
    query: Arc<JoinQuery>,
    entity: String,
    warned: Vec<usize>,
}

impl RowEvaluator {
    pub fn new(query: Arc<JoinQuery>, entity: &str) -> Self {
        let fields = query.columns.len();
        RowEvaluator {
            query,
            entity: entity.to_string(),
            warned: vec![0; fields],
        }
    }

    /// Evaluates every output field. A field that fails is written as
    /// `Null` and reported; the rest of the row is unaffected.
    pub fn evaluate(&mut self, row: &JoinedRow, row_number: u64) -> EvaluatedRow {
        let mut values = Vec::with_capacity(self.query.columns.len());
        let mut errors = Vec::new();

        for (i, column) in self.query.columns.iter().enumerate() {
            let data_type = column.field.data_type();
            let result = slot_values(&column.slots, row)
                .and_then(|slots| column.field.compiled().evaluate(&slots).map_err(|e| e.to_string()))
                .and_then(|value| data_type.convert(&value).map_err(|e| e.to_string()));

            let value = match result {
                Ok(value) => value,
                Err(message) => {
                    let error = RowError {
                        row: row_number,
                        target_row: row.target_id,
                        field: column.field.name().to_string(),
                        message,
                    };
                    if self.warned[i] < WARN_PER_FIELD {
                        self.warned[i] += 1;
                        warn!(row = row_number, field = %error.field, error = %error.message, "Row error");
                    } else {
                        debug!(row = row_number, field = %error.field, error = %error.message, "Row error");
                    }
                    errors.push(error);
                    Value::Null
                }
            };

            values.push(FieldValue {
                name: column.field.name().to_string(),
                value: (!value.is_null()).then_some(value),
                data_type,
            });
        }

        EvaluatedRow {
            record: RowData::new(&self.entity, values),
            errors,
        }
    }
}

fn slot_values(slots: &[SlotSource], row: &JoinedRow) -> Result<Vec<Value>, String> {
    slots
        .iter()
        .map(|slot| match slot {
            SlotSource::Column {
                table,
                column,
                blank,
            } => Ok(match row.rows.get(*table).and_then(Option::as_ref) {
                Some(staged) => staged.get(*column).cloned().unwrap_or(Value::Null),
                None => blank.clone(),
            }),
            SlotSource::Unresolved(message) => Err(message.clone()),
        })
        .collect()
}
