use crate::{error::AdapterError, file::csv::settings::CsvSettings, table::TableSink};
use model::{core::field::Field, records::row::RowData};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Write handle producing one delimited text file.
///
/// The file is only created once the fields are declared, so opening a sink
/// over an existing file leaves it untouched until the caller commits.
pub struct CsvSink {
    name: String,
    path: PathBuf,
    settings: CsvSettings,
    overwrite: bool,
    fields: Vec<Field>,
    writer: Option<csv::Writer<File>>,
    closed: bool,
}

impl CsvSink {
    pub fn create(path: &Path, settings: CsvSettings, overwrite: bool) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        CsvSink {
            name,
            path: path.to_path_buf(),
            settings,
            overwrite,
            fields: Vec::new(),
            writer: None,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, AdapterError> {
        if self.closed {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| AdapterError::InvalidMode("fields must be set before records".into()))
    }
}

/// First free `<path>.bak`, `<path>.bak1`, `<path>.bak2`, ...
fn backup_path(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_string_lossy().to_string();
    let mut candidate = PathBuf::from(format!("{base}.bak"));
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}.bak{n}"));
        n += 1;
    }
    candidate
}

impl TableSink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn backup(&mut self) -> Result<Option<String>, AdapterError> {
        if !self.exists() {
            return Ok(None);
        }
        let target = backup_path(&self.path);
        fs::rename(&self.path, &target)?;
        info!(from = %self.path.display(), to = %target.display(), "Backed up existing file");
        Ok(Some(target.display().to_string()))
    }

    fn set_fields(&mut self, fields: &[Field]) -> Result<(), AdapterError> {
        if self.closed {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        if self.exists() && !self.overwrite {
            return Err(AdapterError::TableExists(self.path.display().to_string()));
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.settings.delimiter as u8)
            .from_path(&self.path)?;
        if self.settings.has_headers {
            writer.write_record(fields.iter().map(|f| f.name.as_str()))?;
        }

        self.fields = fields.to_vec();
        self.writer = Some(writer);
        debug!(path = %self.path.display(), columns = fields.len(), "CSV sink ready");
        Ok(())
    }

    fn add_record(&mut self, record: &RowData) -> Result<(), AdapterError> {
        let cells: Vec<String> = record.values().map(|v| v.as_text()).collect();
        self.writer()?.write_record(&cells)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), AdapterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        let _ = TableSink::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::{
            data_type::DataType,
            field::FieldAttributes,
            value::Value,
        },
        records::row::FieldValue,
    };

    fn row(values: &[(&str, Value)]) -> RowData {
        RowData::new(
            "out",
            values
                .iter()
                .map(|(name, value)| FieldValue {
                    name: name.to_string(),
                    value: Some(value.clone()),
                    data_type: value.data_type(),
                })
                .collect(),
        )
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::new("id", FieldAttributes::typed(DataType::Long)),
            Field::new("owner", FieldAttributes::typed(DataType::String)),
        ]
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = CsvSink::create(&path, CsvSettings::default(), false);
        sink.set_fields(&fields()).unwrap();
        sink.add_record(&row(&[("id", Value::Int(1)), ("owner", Value::Null)]))
            .unwrap();
        sink.close().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "id,owner\n1,\n");
    }

    #[test]
    fn existing_file_needs_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "old\n").unwrap();

        let mut sink = CsvSink::create(&path, CsvSettings::default(), false);
        assert!(matches!(
            sink.set_fields(&fields()),
            Err(AdapterError::TableExists(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\n");

        let mut sink = CsvSink::create(&path, CsvSettings::default(), true);
        sink.set_fields(&fields()).unwrap();
        sink.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "id,owner\n");
    }

    #[test]
    fn backups_take_next_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");

        fs::write(&path, "a\n").unwrap();
        let mut sink = CsvSink::create(&path, CsvSettings::default(), false);
        let first = sink.backup().unwrap().unwrap();
        assert!(first.ends_with("t.csv.bak"));

        fs::write(&path, "b\n").unwrap();
        let second = sink.backup().unwrap().unwrap();
        assert!(second.ends_with("t.csv.bak1"));
        assert!(!sink.exists());
        assert_eq!(sink.backup().unwrap(), None);
    }

    #[test]
    fn records_before_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::create(&dir.path().join("o.csv"), CsvSettings::default(), false);
        assert!(matches!(
            sink.add_record(&row(&[("id", Value::Int(1))])),
            Err(AdapterError::InvalidMode(_))
        ));
    }
}
