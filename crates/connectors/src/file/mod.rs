pub mod container;
pub mod csv;
