pub mod cursor;
pub mod error;
pub mod executor;
pub mod query;
pub mod report;
pub mod row;

pub use error::ExecutionError;
pub use executor::{ExecuteOptions, JoinExecutor, RunState};
pub use query::JoinQuery;
pub use report::{RowError, RunSummary};
