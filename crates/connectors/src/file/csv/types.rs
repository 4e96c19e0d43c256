use chrono::{DateTime, NaiveDate, NaiveDateTime};
use model::core::data_type::DataType;

/// Widening sequence used while sampling a column: a column starts at the
/// narrowest type and moves right until every sampled cell parses.
const CHAIN: &[DataType] = &[
    DataType::Long,
    DataType::Double,
    DataType::Boolean,
    DataType::Date,
    DataType::Timestamp,
    DataType::String,
];

fn can_parse(data_type: DataType, cell: &str) -> bool {
    match data_type {
        DataType::Long => cell.parse::<i64>().is_ok(),
        DataType::Double => cell.parse::<f64>().is_ok(),
        DataType::Boolean => matches!(cell.to_lowercase().as_str(), "true" | "false"),
        DataType::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok(),
        DataType::Timestamp => {
            DateTime::parse_from_rfc3339(cell).is_ok()
                || NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S").is_ok()
        }
        _ => true,
    }
}

/// Type of one column while it is being sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferredType {
    current: Option<DataType>,
}

impl InferredType {
    /// Widens the inferred type so `cell` fits. Empty cells carry no
    /// information and leave the type untouched.
    pub fn promote(&mut self, cell: &str) {
        let cell = cell.trim();
        if cell.is_empty() {
            return;
        }

        let start = self
            .current
            .and_then(|t| CHAIN.iter().position(|c| *c == t))
            .unwrap_or(0);

        let next = CHAIN[start..]
            .iter()
            .copied()
            .find(|t| can_parse(*t, cell))
            .unwrap_or(DataType::String);
        self.current = Some(next);
    }

    /// Final type; a column that never held a value is text.
    pub fn data_type(&self) -> DataType {
        self.current.unwrap_or(DataType::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(cells: &[&str]) -> DataType {
        let mut inferred = InferredType::default();
        for cell in cells {
            inferred.promote(cell);
        }
        inferred.data_type()
    }

    #[test]
    fn widens_along_chain() {
        assert_eq!(infer(&["1", "2", "3"]), DataType::Long);
        assert_eq!(infer(&["1", "2.5"]), DataType::Double);
        assert_eq!(infer(&["2024-01-01", "2024-02-01"]), DataType::Date);
        assert_eq!(infer(&["true", "FALSE"]), DataType::Boolean);
        assert_eq!(infer(&["1", "abc"]), DataType::String);
    }

    #[test]
    fn empty_cells_do_not_decide() {
        assert_eq!(infer(&["", "7", ""]), DataType::Long);
        assert_eq!(infer(&["", ""]), DataType::String);
    }

    #[test]
    fn never_narrows() {
        assert_eq!(infer(&["x", "1"]), DataType::String);
    }
}
