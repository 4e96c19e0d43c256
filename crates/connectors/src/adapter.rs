use crate::{
    error::AdapterError,
    file::{
        container::CsvDirectory,
        csv::{settings::CsvSettings, sink::CsvSink, source::CsvSource},
    },
    table::{OpenMode, TableSink, TableSource},
};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Separates a container path from a member table: `data/::parcels`.
pub const TABLE_SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Tsv,
    Directory,
}

impl DataFormat {
    /// Picks the format from the path: directories are containers, files
    /// are matched on their extension.
    pub fn detect(path: &Path) -> Result<Self, AdapterError> {
        if path.is_dir() {
            return Ok(DataFormat::Directory);
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "txt" => Ok(DataFormat::Csv),
            "tsv" => Ok(DataFormat::Tsv),
            _ => Err(AdapterError::InvalidFormat(path.display().to_string())),
        }
    }

    pub fn settings(&self) -> CsvSettings {
        match self {
            DataFormat::Tsv => CsvSettings::default().with_delimiter('\t'),
            _ => CsvSettings::default(),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Directory => "directory",
        };
        f.write_str(name)
    }
}

/// Where a table lives: a file, or a member of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub path: PathBuf,
    pub table: Option<String>,
}

impl TableLocation {
    pub fn parse(location: &str) -> Self {
        match location.rsplit_once(TABLE_SEPARATOR) {
            Some((path, table)) if !table.is_empty() => TableLocation {
                path: PathBuf::from(path),
                table: Some(table.to_string()),
            },
            _ => TableLocation {
                path: PathBuf::from(location.trim_end_matches(TABLE_SEPARATOR)),
                table: None,
            },
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        TableLocation {
            path: path.into(),
            table: None,
        }
    }

    /// Same location, naming a member table.
    pub fn with_table(&self, table: &str) -> Self {
        TableLocation {
            path: self.path.clone(),
            table: Some(table.to_string()),
        }
    }
}

impl fmt::Display for TableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}{TABLE_SEPARATOR}{table}", self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Entry point from a location to a concrete table handle.
pub struct Adapter;

impl Adapter {
    pub fn open_source(location: &TableLocation) -> Result<Box<dyn TableSource>, AdapterError> {
        match DataFormat::detect(&location.path)? {
            DataFormat::Directory => {
                let container = CsvDirectory::open(&location.path)?;
                Ok(Box::new(container.open_table(location.table.as_deref())?))
            }
            format => {
                if location.table.is_some() {
                    return Err(AdapterError::InvalidFormat(format!(
                        "{format} file {} holds a single table",
                        location.path.display()
                    )));
                }
                Ok(Box::new(CsvSource::open(&location.path, format.settings())?))
            }
        }
    }

    /// Opens a write handle. Container members are written as `<table>.csv`
    /// inside the directory.
    pub fn open_sink(
        location: &TableLocation,
        mode: OpenMode,
    ) -> Result<Box<dyn TableSink>, AdapterError> {
        let OpenMode::Write { overwrite } = mode else {
            return Err(AdapterError::InvalidMode(format!(
                "{location} must be opened for writing"
            )));
        };

        let path = match &location.table {
            Some(table) => {
                let existing = CsvDirectory::open(&location.path)
                    .ok()
                    .and_then(|c| c.table_path(table).map(Path::to_path_buf));
                existing.unwrap_or_else(|| location.path.join(format!("{table}.csv")))
            }
            None => location.path.clone(),
        };

        let format = DataFormat::detect(&path)?;
        if format == DataFormat::Directory {
            return Err(AdapterError::InvalidFormat(format!(
                "{} is a directory; name a table with '{TABLE_SEPARATOR}'",
                path.display()
            )));
        }

        Ok(Box::new(CsvSink::create(&path, format.settings(), overwrite)))
    }

    pub fn open(location: &TableLocation, mode: OpenMode) -> Result<OpenTable, AdapterError> {
        match mode {
            OpenMode::Read => Ok(OpenTable::Read(Self::open_source(location)?)),
            OpenMode::Write { .. } => Ok(OpenTable::Write(Self::open_sink(location, mode)?)),
        }
    }
}

pub enum OpenTable {
    Read(Box<dyn TableSource>),
    Write(Box<dyn TableSink>),
}
