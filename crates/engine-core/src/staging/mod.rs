//! Scratch store holding one staging table per alias.
//!
//! Each table is a sled tree of rows keyed by a big-endian row id, so
//! iteration follows insertion order. Table descriptions, index markers and
//! row counts live in a shared `meta` tree. The store is wiped whenever it
//! is opened: staged data never outlives the engine that produced it.

pub mod converter;
pub mod index;

use crate::error::StagingError;
use model::core::{field::Field, identifiers::Alias, value::Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub use converter::StagingConverter;
pub use index::{IndexBuilder, JoinIndex};

const META_TREE: &str = "meta";

/// Staged values of one row, in table column order.
pub type StagedRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedColumn {
    /// Input field as reported by the adapter.
    pub field: Field,
    /// Namespaced column name, `alias_fieldname`.
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    pub alias: Alias,
    pub columns: Vec<StagedColumn>,
    pub row_count: u64,
    pub complete: bool,
}

impl StagingTable {
    fn new(alias: &Alias, fields: &[Field]) -> Self {
        let mut columns: Vec<StagedColumn> = Vec::with_capacity(fields.len());
        for field in fields {
            let base = column_name(alias.as_str(), &field.name);
            let mut column = base.clone();
            let mut n = 2;
            while columns.iter().any(|c| c.column == column) {
                column = format!("{base}_{n}");
                n += 1;
            }
            columns.push(StagedColumn {
                field: field.clone(),
                column,
            });
        }

        StagingTable {
            alias: alias.clone(),
            columns,
            row_count: 0,
            complete: false,
        }
    }

    /// Column position of an input field, matched case-insensitively.
    pub fn position(&self, field_name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.field.name.eq_ignore_ascii_case(field_name))
    }

    pub fn column(&self, field_name: &str) -> Option<&StagedColumn> {
        self.position(field_name).map(|i| &self.columns[i])
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.columns.iter().map(|c| &c.field)
    }
}

/// `alias_fieldname`, lowercased with every non-alphanumeric character
/// replaced by `_`.
pub fn column_name(alias: &str, field: &str) -> String {
    format!("{alias}_{field}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn rows_tree_name(alias: &Alias) -> String {
    format!("rows:{alias}")
}

fn table_key(alias: &Alias) -> String {
    format!("table:{alias}")
}

pub(crate) fn index_tree_name(alias: &Alias, column: &str) -> String {
    format!("idx:{alias}:{column}")
}

pub(crate) fn index_marker_key(alias: &Alias, column: &str) -> String {
    format!("index:{alias}:{column}")
}

#[derive(Clone)]
pub struct StagingStore {
    db: sled::Db,
}

impl StagingStore {
    /// Opens the store at `path`, discarding anything a previous run left.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StagingError> {
        let db = sled::open(path.as_ref())?;
        let store = Self { db };
        store.wipe()?;
        info!(path = %path.as_ref().display(), "Opened staging store");
        Ok(store)
    }

    /// Store backed by a temporary directory removed on drop.
    pub fn temporary() -> Result<Self, StagingError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn wipe(&self) -> Result<(), StagingError> {
        for name in self.db.tree_names() {
            if name.as_ref() != b"__sled__default" {
                self.db.drop_tree(name)?;
            }
        }
        self.db.clear()?;
        Ok(())
    }

    fn meta(&self) -> Result<sled::Tree, StagingError> {
        Ok(self.db.open_tree(META_TREE)?)
    }

    pub(crate) fn rows_tree(&self, alias: &Alias) -> Result<sled::Tree, StagingError> {
        Ok(self.db.open_tree(rows_tree_name(alias))?)
    }

    pub(crate) fn open_tree(&self, name: &str) -> Result<sled::Tree, StagingError> {
        Ok(self.db.open_tree(name)?)
    }

    pub(crate) fn get_meta(&self, key: &str) -> Result<Option<sled::IVec>, StagingError> {
        Ok(self.meta()?.get(key)?)
    }

    pub(crate) fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StagingError> {
        self.meta()?.insert(key, value)?;
        Ok(())
    }

    /// Starts a fresh, empty table for `alias`, replacing any earlier one.
    pub fn create_table(&self, alias: &Alias, fields: &[Field]) -> Result<StagingTable, StagingError> {
        self.drop_table(alias)?;
        let table = StagingTable::new(alias, fields);
        self.save_table(&table)?;
        debug!(alias = %alias, columns = table.columns.len(), "Created staging table");
        Ok(table)
    }

    pub(crate) fn save_table(&self, table: &StagingTable) -> Result<(), StagingError> {
        let bytes = bincode::serialize(table)?;
        self.put_meta(&table_key(&table.alias), &bytes)
    }

    /// Table description, complete or not.
    pub fn table_info(&self, alias: &Alias) -> Result<Option<StagingTable>, StagingError> {
        match self.get_meta(&table_key(alias))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The fully staged table for `alias`.
    pub fn table(&self, alias: &Alias) -> Result<StagingTable, StagingError> {
        match self.table_info(alias)? {
            Some(table) if table.complete => Ok(table),
            _ => Err(StagingError::MissingTable(alias.to_string())),
        }
    }

    pub fn is_staged(&self, alias: &Alias) -> bool {
        self.table(alias).is_ok()
    }

    /// Removes the table, its rows and every index built over it.
    pub fn drop_table(&self, alias: &Alias) -> Result<(), StagingError> {
        let meta = self.meta()?;
        let Some(bytes) = meta.remove(table_key(alias))? else {
            return Ok(());
        };
        let table: StagingTable = bincode::deserialize(&bytes)?;

        for col in &table.columns {
            meta.remove(index_marker_key(alias, &col.column))?;
            self.db.drop_tree(index_tree_name(alias, &col.column))?;
        }
        self.db.drop_tree(rows_tree_name(alias))?;
        debug!(alias = %alias, "Dropped staging table");
        Ok(())
    }

    pub(crate) fn insert_rows(
        &self,
        alias: &Alias,
        first_id: u64,
        rows: &[StagedRow],
    ) -> Result<(), StagingError> {
        let tree = self.rows_tree(alias)?;
        let mut batch = sled::Batch::default();
        for (offset, row) in rows.iter().enumerate() {
            let id = first_id + offset as u64;
            batch.insert(id.to_be_bytes().to_vec(), bincode::serialize(row)?);
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    pub fn row(&self, alias: &Alias, row_id: u64) -> Result<Option<StagedRow>, StagingError> {
        match self.rows_tree(alias)?.get(row_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Staged rows of `alias` in row id order.
    pub fn rows(&self, alias: &Alias) -> Result<StagedRows, StagingError> {
        Ok(StagedRows {
            inner: self.rows_tree(alias)?.iter(),
        })
    }

    /// Number of staged rows; only complete tables have one.
    pub fn row_count(&self, alias: &Alias) -> Result<u64, StagingError> {
        Ok(self.table(alias)?.row_count)
    }

    pub fn flush(&self) -> Result<(), StagingError> {
        self.db.flush()?;
        Ok(())
    }
}

pub(crate) fn decode_row_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Iterator over `(row_id, row)` pairs of one staging table.
pub struct StagedRows {
    inner: sled::Iter,
}

impl Iterator for StagedRows {
    type Item = Result<(u64, StagedRow), StagingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(StagingError::from).and_then(|(key, value)| {
            let id = decode_row_id(&key).ok_or_else(|| {
                StagingError::Codec(Box::new(bincode::ErrorKind::Custom(
                    "malformed row id".to_string(),
                )))
            })?;
            Ok((id, bincode::deserialize(&value)?))
        }))
    }
}
