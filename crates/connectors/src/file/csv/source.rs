use crate::{
    error::AdapterError,
    file::csv::{
        metadata::{infer_fields, reader},
        settings::CsvSettings,
    },
    table::{CloseHandle, Record, RecordIter, TableSource, guard_records},
};
use model::core::{data_type::DataType, field::Field, value::Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read handle over one delimited text file.
pub struct CsvSource {
    name: String,
    path: PathBuf,
    settings: CsvSettings,
    fields: Vec<Field>,
    record_count: Option<u64>,
    consumed: bool,
    handle: CloseHandle,
}

impl CsvSource {
    pub fn open(path: &Path, settings: CsvSettings) -> Result<Self, AdapterError> {
        let fields = infer_fields(path, &settings)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        info!(table = %name, path = %path.display(), columns = fields.len(), "Opened CSV source");
        Ok(CsvSource {
            name,
            path: path.to_path_buf(),
            settings,
            fields,
            record_count: None,
            consumed: false,
            handle: CloseHandle::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.handle.is_closed() {
            return Err(AdapterError::FileClosed(self.name.clone()));
        }
        Ok(())
    }
}

fn parse_record(record: &csv::StringRecord, types: &[DataType]) -> Record {
    types
        .iter()
        .enumerate()
        .map(|(i, data_type)| {
            let cell = record.get(i).unwrap_or("").trim();
            if cell.is_empty() {
                return Value::Null;
            }
            // Cells beyond the inference sample may not fit the inferred type.
            data_type
                .parse_value(cell)
                .unwrap_or_else(|| Value::String(cell.to_string()))
        })
        .collect()
}

impl TableSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn record_count(&mut self) -> Result<Option<u64>, AdapterError> {
        self.ensure_open()?;
        if let Some(count) = self.record_count {
            return Ok(Some(count));
        }

        let mut rdr = reader(&self.path, &self.settings)?;
        let mut count = 0u64;
        let mut record = csv::StringRecord::new();
        while rdr.read_record(&mut record)? {
            count += 1;
        }

        debug!(table = %self.name, count, "Counted CSV records");
        self.record_count = Some(count);
        Ok(Some(count))
    }

    fn records(&mut self) -> Result<RecordIter, AdapterError> {
        self.ensure_open()?;
        if self.consumed {
            return Err(AdapterError::Exhausted(self.name.clone()));
        }
        self.consumed = true;

        let types: Vec<DataType> = self.fields.iter().map(Field::data_type).collect();
        let rows = reader(&self.path, &self.settings)?
            .into_records()
            .map(move |result| {
                result
                    .map(|record| parse_record(&record, &types))
                    .map_err(AdapterError::from)
            });

        Ok(guard_records(&self.name, rows, self.handle.clone()))
    }

    fn close_handle(&self) -> CloseHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, io::Write};

    fn write_csv(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn reads_typed_records_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "parcels.csv", &["id,owner", "1,Ada", "2,"]);

        let mut source = CsvSource::open(&path, CsvSettings::default()).unwrap();
        assert_eq!(source.name(), "parcels");
        assert_eq!(source.record_count().unwrap(), Some(2));

        let rows: Vec<Record> = source.records().unwrap().map(Result::unwrap).collect();
        assert_eq!(rows[0], vec![Value::Int(1), Value::String("Ada".into())]);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Null]);

        assert!(matches!(source.records(), Err(AdapterError::Exhausted(_))));
    }

    #[test]
    fn closing_mid_stream_surfaces_file_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "t.csv", &["v", "1", "2", "3"]);

        let mut source = CsvSource::open(&path, CsvSettings::default()).unwrap();
        let mut rows = source.records().unwrap();
        assert!(rows.next().unwrap().is_ok());

        source.close();
        assert!(rows.next().unwrap().unwrap_err().is_file_closed());
        assert!(source.record_count().unwrap_err().is_file_closed());
    }

    #[test]
    fn off_sample_cells_fall_back_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "t.csv", &["v", "1", "2", "n/a"]);
        let settings = CsvSettings {
            sample_size: 2,
            ..CsvSettings::default()
        };

        let mut source = CsvSource::open(&path, settings).unwrap();
        let rows: Vec<Record> = source.records().unwrap().map(Result::unwrap).collect();
        assert_eq!(rows[2], vec![Value::String("n/a".into())]);
    }
}
