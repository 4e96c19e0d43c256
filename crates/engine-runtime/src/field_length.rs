//! Widths for text output fields that copy a single input column.

use crate::error::EngineError;
use engine_core::{schema::OutputSchema, staging::StagingStore};
use expression_engine::single_reference;
use model::core::identifiers::Alias;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// New `length` for one output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLength {
    pub index: usize,
    pub name: String,
    pub length: usize,
}

/// Measures the longest staged text of every text field whose expression
/// is exactly one `!alias.field!` reference, and adds `padding`.
///
/// Every referenced alias must be staged; otherwise this fails with a
/// not-ready staging error so the caller can retry after conversion.
/// Fields referencing a column their alias does not have are skipped.
pub async fn detect_field_lengths(
    store: &StagingStore,
    schema: &OutputSchema,
    padding: usize,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<FieldLength>, EngineError> {
    let mut measured: HashMap<(Alias, usize), usize> = HashMap::new();
    let mut lengths = Vec::new();

    for (index, field) in schema.iter().enumerate() {
        if !field.data_type().is_text() {
            continue;
        }
        let Some(reference) = single_reference(field.expression()) else {
            continue;
        };

        let alias = Alias::new(reference.alias);
        let table = store.table(&alias)?;
        let Some(position) = table.position(&reference.field) else {
            debug!(field = field.name(), alias = %alias, "Referenced column not staged, skipping");
            continue;
        };

        let longest = match measured.get(&(alias.clone(), position)) {
            Some(longest) => *longest,
            None => {
                let longest = longest_text(store, &alias, position, chunk_size, cancel).await?;
                measured.insert((alias.clone(), position), longest);
                longest
            }
        };

        lengths.push(FieldLength {
            index,
            name: field.name().to_string(),
            length: longest + padding,
        });
    }

    info!(fields = lengths.len(), padding, "Field lengths detected");
    Ok(lengths)
}

async fn longest_text(
    store: &StagingStore,
    alias: &Alias,
    position: usize,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<usize, EngineError> {
    let mut longest = 0;
    let mut scanned = 0usize;

    for row in store.rows(alias)? {
        let (_, row) = row?;
        if let Some(value) = row.get(position) {
            longest = longest.max(value.text_len());
        }

        scanned += 1;
        if scanned % chunk_size.max(1) == 0 {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            tokio::task::yield_now().await;
        }
    }
    Ok(longest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::memory::MemoryTable;
    use engine_core::{
        schema::OutputField,
        staging::StagingConverter,
    };
    use model::core::{
        data_type::DataType,
        field::{Field, FieldAttributes},
        value::Value,
    };

    fn staged_names() -> StagingStore {
        let store = StagingStore::temporary().unwrap();
        let fields = vec![
            Field::new("name", FieldAttributes::typed(DataType::String)),
            Field::new("n", FieldAttributes::typed(DataType::Long)),
        ];
        let rows = ["Ann", "Bartholomew", ""]
            .iter()
            .enumerate()
            .map(|(i, s)| vec![Value::String(s.to_string()), Value::Int(i as i64 * 1000)])
            .collect();
        let mut source = MemoryTable::new("people", fields, rows);
        StagingConverter::new(&store, &Alias::new("p"), &mut source, 2)
            .unwrap()
            .run()
            .unwrap();
        store
    }

    fn text(name: &str, expr: &str) -> OutputField {
        OutputField::new(
            Field::new(name, FieldAttributes::typed(DataType::String)).with_value(expr),
            None,
        )
    }

    #[tokio::test]
    async fn single_references_get_longest_value_plus_padding() {
        let store = staged_names();
        let mut schema = OutputSchema::new();
        schema.add_field(text("name", "!p.name!"));
        schema.add_field(text("label", "upper(!p.name!)"));
        schema.add_field(text("n_text", "!p.n!"));
        schema.add_field(OutputField::new(
            Field::new("n", FieldAttributes::typed(DataType::Long)).with_value("!p.n!"),
            None,
        ));

        let lengths = detect_field_lengths(&store, &schema, 2, 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            lengths,
            vec![
                FieldLength {
                    index: 0,
                    name: "name".into(),
                    length: 13
                },
                FieldLength {
                    index: 2,
                    name: "n_text".into(),
                    length: 6
                },
            ]
        );
    }

    #[tokio::test]
    async fn unstaged_alias_is_not_ready() {
        let store = staged_names();
        let mut schema = OutputSchema::new();
        schema.add_field(text("other", "!q.name!"));

        let err = detect_field_lengths(&store, &schema, 0, 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_ready());
    }
}
