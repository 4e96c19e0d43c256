use super::{StagedRows, StagingStore, decode_row_id, index_marker_key, index_tree_name};
use crate::error::StagingError;
use model::{
    core::{identifiers::Alias, value::Value},
    events::Progress,
};
use std::iter::Peekable;
use tracing::{debug, info};

const READY: &[u8] = b"ready";

fn key_prefix(key: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(key.len() + 4);
    prefix.extend_from_slice(&(key.len() as u32).to_be_bytes());
    prefix.extend_from_slice(key);
    prefix
}

fn entry_key(key: &[u8], row_id: u64) -> Vec<u8> {
    let mut entry = key_prefix(key);
    entry.extend_from_slice(&row_id.to_be_bytes());
    entry
}

fn resolve_column(
    store: &StagingStore,
    alias: &Alias,
    field: &str,
) -> Result<(usize, String), StagingError> {
    let table = store.table(alias)?;
    let position = table
        .position(field)
        .ok_or_else(|| StagingError::UnknownField {
            alias: alias.to_string(),
            field: field.to_string(),
        })?;
    Ok((position, table.columns[position].column.clone()))
}

/// Builds the join key index of one staged column, one chunk per `next()`.
///
/// Every row with a non-null key gets an entry, so a key shared by several
/// rows resolves to all of them. Once built the index is marked ready and a
/// later builder for the same column is a no-op that yields nothing.
pub struct IndexBuilder {
    store: StagingStore,
    alias: Alias,
    column: String,
    position: usize,
    tree: sled::Tree,
    rows: Option<Peekable<StagedRows>>,
    total: u64,
    indexed: u64,
    chunk_size: usize,
    noop: bool,
}

impl IndexBuilder {
    pub fn new(
        store: &StagingStore,
        alias: &Alias,
        field: &str,
        chunk_size: usize,
    ) -> Result<Self, StagingError> {
        let (position, column) = resolve_column(store, alias, field)?;
        let tree = store.open_tree(&index_tree_name(alias, &column))?;
        let ready = store.get_meta(&index_marker_key(alias, &column))?.is_some();

        let rows = if ready {
            debug!(alias = %alias, column = %column, "Index already built");
            None
        } else {
            tree.clear()?;
            info!(alias = %alias, column = %column, "Index build started");
            Some(store.rows(alias)?.peekable())
        };

        Ok(IndexBuilder {
            store: store.clone(),
            alias: alias.clone(),
            column,
            position,
            tree,
            rows,
            total: store.row_count(alias)?,
            indexed: 0,
            chunk_size: chunk_size.max(1),
            noop: ready,
        })
    }

    /// True when the index existed before this builder was created.
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn run(mut self) -> Result<(), StagingError> {
        while let Some(progress) = self.next() {
            progress?;
        }
        Ok(())
    }

    fn step(&mut self, rows: &mut Peekable<StagedRows>) -> Result<bool, StagingError> {
        let mut batch = sled::Batch::default();
        let mut taken = 0;

        while taken < self.chunk_size {
            let Some(next) = rows.next() else { break };
            let (row_id, row) = next?;
            taken += 1;
            if let Some(key) = row.get(self.position).and_then(Value::join_key) {
                batch.insert(entry_key(&key, row_id), sled::IVec::default());
            }
        }

        self.tree.apply_batch(batch)?;
        self.indexed += taken as u64;

        Ok(rows.peek().is_none())
    }

    fn finish(&self) -> Result<(), StagingError> {
        self.store
            .put_meta(&index_marker_key(&self.alias, &self.column), READY)?;
        info!(alias = %self.alias, column = %self.column, rows = self.indexed, "Index build finished");
        Ok(())
    }
}

impl Iterator for IndexBuilder {
    type Item = Result<Progress, StagingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut rows = self.rows.take()?;

        let result = self.step(&mut rows).and_then(|done| {
            if done {
                self.finish()?;
                Ok(Progress::Fraction(1.0))
            } else {
                self.rows = Some(rows);
                Ok(Progress::fraction(self.indexed, self.total))
            }
        });

        Some(result)
    }
}

/// Read side of a built join key index.
#[derive(Clone)]
pub struct JoinIndex {
    tree: sled::Tree,
}

impl JoinIndex {
    /// Opens the index over `alias.field`; it must have been built.
    pub fn open(store: &StagingStore, alias: &Alias, field: &str) -> Result<Self, StagingError> {
        let (_, column) = resolve_column(store, alias, field)?;
        if store.get_meta(&index_marker_key(alias, &column))?.is_none() {
            return Err(StagingError::MissingTable(index_tree_name(alias, &column)));
        }
        Ok(JoinIndex {
            tree: store.open_tree(&index_tree_name(alias, &column))?,
        })
    }

    /// Row ids holding `value`, in staging order. Null never matches.
    pub fn lookup(&self, value: &Value) -> Result<Vec<u64>, StagingError> {
        let Some(key) = value.join_key() else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        for entry in self.tree.scan_prefix(key_prefix(&key)) {
            let (entry, _) = entry?;
            if let Some(id) = decode_row_id(&entry) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Most recently staged row holding `value`.
    pub fn lookup_last(&self, value: &Value) -> Result<Option<u64>, StagingError> {
        Ok(self.lookup(value)?.pop())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
