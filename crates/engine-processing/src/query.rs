//! Resolved join plan over the staging store.
//!
//! Building a query pins everything a run needs: the staged table of every
//! alias in the join tree, a built key index for every join and, for every
//! output field, where each of its expression slots reads from.

use crate::{
    cursor::{JoinedCursor, RestrictedCursor, RowCursor, TargetCursor},
    error::ExecutionError,
};
use engine_core::{
    join_graph::JoinGraph,
    schema::{OutputField, OutputSchema},
    staging::{IndexBuilder, JoinIndex, StagingStore, StagingTable},
};
use model::core::{field::Field, identifiers::Alias, value::Value};
use std::{fmt::Write, sync::Arc};
use tracing::{debug, info};

/// Where one expression slot takes its value from.
#[derive(Debug, Clone)]
pub(crate) enum SlotSource {
    /// Column of the alias at `table`; `blank` stands in when the join
    /// produced no row for that alias.
    Column {
        table: usize,
        column: usize,
        blank: Value,
    },
    /// The reference names nothing in the join tree.
    Unresolved(String),
}

pub(crate) struct JoinStep {
    pub(crate) child: usize,
    pub(crate) parent: usize,
    pub(crate) parent_column: usize,
    pub(crate) index: JoinIndex,
    pub(crate) inner: bool,
}

pub(crate) struct OutputColumn {
    pub(crate) field: OutputField,
    pub(crate) slots: Vec<SlotSource>,
}

pub struct JoinQuery {
    pub(crate) store: StagingStore,
    pub(crate) aliases: Vec<Alias>,
    pub(crate) tables: Vec<StagingTable>,
    pub(crate) steps: Vec<JoinStep>,
    pub(crate) columns: Vec<OutputColumn>,
    plan: String,
}

impl JoinQuery {
    /// Resolves the join tree and output schema against staged data,
    /// building any missing join key index on the way.
    pub fn build(
        graph: &JoinGraph,
        schema: &OutputSchema,
        store: &StagingStore,
        index_chunk: usize,
    ) -> Result<Self, ExecutionError> {
        let target = graph.target().ok_or(ExecutionError::NoTarget)?;
        let aliases = graph.joined_aliases_depth_first(None);
        let tables = aliases
            .iter()
            .map(|alias| store.table(alias))
            .collect::<Result<Vec<_>, _>>()?;
        let position = |alias: &Alias| aliases.iter().position(|a| a == alias);

        let mut plan = target.to_string();
        let mut steps = Vec::new();
        for join in graph.joins() {
            let (Some(child), Some(parent)) = (position(&join.child), position(&join.parent)) else {
                continue;
            };
            let parent_column = column_of(&tables[parent], &join.parent_field)?;

            IndexBuilder::new(store, &join.child, &join.child_field, index_chunk)?.run()?;
            let index = JoinIndex::open(store, &join.child, &join.child_field)?;

            let _ = write!(
                plan,
                " {} {} ON {}.{} = {}.{}",
                if join.inner { "JOIN" } else { "LEFT JOIN" },
                join.child,
                join.child,
                join.child_field,
                join.parent,
                join.parent_field
            );
            steps.push(JoinStep {
                child,
                parent,
                parent_column,
                index,
                inner: join.inner,
            });
        }

        let columns = schema
            .iter()
            .map(|field| OutputColumn {
                slots: field
                    .refs()
                    .iter()
                    .map(|r| resolve_slot(&aliases, &tables, &r.alias, &r.field))
                    .collect(),
                field: field.clone(),
            })
            .collect();

        info!(plan = %plan, fields = schema.len(), "Join query built");

        Ok(JoinQuery {
            store: store.clone(),
            aliases,
            tables,
            steps,
            columns,
            plan,
        })
    }

    pub fn target(&self) -> &Alias {
        &self.aliases[0]
    }

    /// Aliases in join order, target first.
    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    /// Human-readable join plan.
    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn target_row_count(&self) -> u64 {
        self.tables[0].row_count
    }

    /// Output field descriptors, in output order.
    pub fn output_fields(&self) -> Vec<Field> {
        self.columns.iter().map(|c| c.field.field.clone()).collect()
    }

    pub fn targets(&self) -> Result<TargetCursor, ExecutionError> {
        Ok(TargetCursor::new(self.store.rows(self.target())?))
    }

    pub fn joined(self: &Arc<Self>) -> Result<JoinedCursor, ExecutionError> {
        Ok(JoinedCursor::new(
            self.clone(),
            self.store.rows(self.target())?,
        ))
    }

    /// Cursor over the rows to write, with its total when known.
    ///
    /// With `restrict`, fan-out is collapsed to one row per target row and
    /// the total is the target row count. Otherwise the total comes from a
    /// counting pass over the join.
    pub fn cursor(self: &Arc<Self>, restrict: bool) -> Result<(RowCursor, Option<u64>), ExecutionError> {
        if restrict {
            let cursor = RestrictedCursor::new(self.targets()?, self.joined()?);
            return Ok((RowCursor::Restricted(cursor), Some(self.target_row_count())));
        }

        let mut total = 0;
        for row in self.joined()? {
            row?;
            total += 1;
        }
        debug!(rows = total, "Counted joined rows");
        Ok((RowCursor::Joined(self.joined()?), Some(total)))
    }
}

fn column_of(table: &StagingTable, field: &str) -> Result<usize, ExecutionError> {
    table.position(field).ok_or_else(|| {
        ExecutionError::Staging(engine_core::error::StagingError::UnknownField {
            alias: table.alias.to_string(),
            field: field.to_string(),
        })
    })
}

fn resolve_slot(aliases: &[Alias], tables: &[StagingTable], alias: &str, field: &str) -> SlotSource {
    // Aliases match case-insensitively like field names; an exact match wins
    // when two aliases differ only in case.
    let table = aliases
        .iter()
        .position(|a| a.as_str() == alias)
        .or_else(|| aliases.iter().position(|a| a.as_str().eq_ignore_ascii_case(alias)));
    let Some(table) = table else {
        return SlotSource::Unresolved(format!("'{alias}' is not part of the join"));
    };
    match tables[table].position(field) {
        Some(column) => SlotSource::Column {
            table,
            column,
            blank: tables[table].columns[column].field.blank_value(),
        },
        None => SlotSource::Unresolved(format!("'{alias}' has no field '{field}'")),
    }
}
