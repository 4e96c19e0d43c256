use crate::file::csv::{error::FileError, settings::CsvSettings, types::InferredType};
use model::core::{
    data_type::DataType,
    field::{Field, FieldAttributes},
};
use std::{fs::File, path::Path};
use tracing::debug;

/// Builds a reader over `path` with the delimiter and header rules of
/// `settings`.
pub fn reader(path: &Path, settings: &CsvSettings) -> Result<csv::Reader<File>, FileError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => FileError::NotFound(path.display().to_string()),
        _ => FileError::IoError(err),
    })?;

    Ok(csv::ReaderBuilder::new()
        .delimiter(settings.delimiter as u8)
        .has_headers(settings.has_headers)
        .flexible(true)
        .from_reader(file))
}

/// Reads the header row and samples up to `settings.sample_size` records to
/// infer each column's type. Text columns also get the longest sampled
/// width as their `length` attribute.
pub fn infer_fields(path: &Path, settings: &CsvSettings) -> Result<Vec<Field>, FileError> {
    let mut rdr = reader(path, settings)?;

    let headers: Vec<String> = if settings.has_headers {
        rdr.headers()?.iter().map(|h| h.trim().to_string()).collect()
    } else {
        Vec::new()
    };

    let mut inferred: Vec<InferredType> = vec![InferredType::default(); headers.len()];
    let mut widths: Vec<usize> = vec![0; headers.len()];
    let mut names = headers;

    for result in rdr.records().take(settings.sample_size) {
        let record = result?;
        while names.len() < record.len() {
            names.push(format!("column_{}", names.len() + 1));
            inferred.push(InferredType::default());
            widths.push(0);
        }
        for (i, cell) in record.iter().enumerate() {
            inferred[i].promote(cell);
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let fields = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let data_type = inferred[i].data_type();
            let mut attrs = FieldAttributes::typed(data_type);
            if data_type == DataType::String {
                attrs.set_length(widths[i].max(1));
            }
            Field::new(name, attrs)
        })
        .collect::<Vec<_>>();

    debug!(path = %path.display(), columns = fields.len(), "Inferred CSV fields");
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn infers_types_and_widths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "id,name,score,joined").unwrap();
        writeln!(file, "1,Ada,3.5,2024-01-02").unwrap();
        writeln!(file, "2,Grace Hopper,4,2024-03-04").unwrap();
        drop(file);

        let fields = infer_fields(&path, &CsvSettings::default()).unwrap();
        let types: Vec<_> = fields.iter().map(Field::data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Long, DataType::String, DataType::Double, DataType::Date]
        );
        assert_eq!(fields[1].attributes.length(), Some(12));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = infer_fields(&dir.path().join("nope.csv"), &CsvSettings::default()).unwrap_err();
        assert!(matches!(err, FileError::NotFound(_)));
    }
}
