//! A directory of delimited files read as one multi-table container.

use crate::{
    error::AdapterError,
    file::csv::{settings::CsvSettings, source::CsvSource},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const TABLE_EXTENSIONS: &[&str] = &["csv", "txt", "tsv"];

pub struct CsvDirectory {
    path: PathBuf,
    tables: Vec<(String, PathBuf)>,
}

impl CsvDirectory {
    pub fn open(path: &Path) -> Result<Self, AdapterError> {
        if !path.is_dir() {
            return Err(AdapterError::InvalidFormat(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let mut tables = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            if !entry_path.is_file() {
                continue;
            }
            let Some(ext) = entry_path.extension().map(|e| e.to_string_lossy().to_lowercase())
            else {
                continue;
            };
            if !TABLE_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            if let Some(stem) = entry_path.file_stem() {
                tables.push((stem.to_string_lossy().to_string(), entry_path.clone()));
            }
        }
        tables.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(CsvDirectory {
            path: path.to_path_buf(),
            tables,
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Path of `table`, matched case-insensitively.
    pub fn table_path(&self, table: &str) -> Option<&Path> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, path)| path.as_path())
    }

    /// Opens one member table. Without a name the caller gets the list of
    /// available tables to choose from.
    pub fn open_table(&self, table: Option<&str>) -> Result<CsvSource, AdapterError> {
        let Some(table) = table else {
            return Err(AdapterError::NeedsTableSelection {
                path: self.path.display().to_string(),
                tables: self.table_names(),
            });
        };

        let path = self
            .table_path(table)
            .ok_or_else(|| AdapterError::TableNotFound {
                path: self.path.display().to_string(),
                table: table.to_string(),
            })?;

        let settings = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("tsv")) {
            CsvSettings::default().with_delimiter('\t')
        } else {
            CsvSettings::default()
        };
        CsvSource::open(path, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableSource;

    fn container() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("roads.csv"), "id\n1\n").unwrap();
        fs::write(dir.path().join("Parcels.tsv"), "id\tarea\n1\t2.5\n").unwrap();
        fs::write(dir.path().join("readme.md"), "skip").unwrap();
        dir
    }

    #[test]
    fn open_without_table_lists_choices() {
        let dir = container();
        let container = CsvDirectory::open(dir.path()).unwrap();
        match container.open_table(None) {
            Err(AdapterError::NeedsTableSelection { tables, .. }) => {
                assert_eq!(tables, vec!["Parcels".to_string(), "roads".to_string()])
            }
            other => panic!("unexpected: {:?}", other.map(|s| s.name().to_string())),
        }
    }

    #[test]
    fn opens_named_member() {
        let dir = container();
        let container = CsvDirectory::open(dir.path()).unwrap();
        let source = container.open_table(Some("parcels")).unwrap();
        assert_eq!(source.fields().len(), 2);

        assert!(matches!(
            container.open_table(Some("lakes")),
            Err(AdapterError::TableNotFound { .. })
        ));
    }
}
