pub mod output;

pub use output::{OutputField, OutputSchema};
