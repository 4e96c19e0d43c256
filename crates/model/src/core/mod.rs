pub mod data_type;
pub mod field;
pub mod identifiers;
pub mod value;
