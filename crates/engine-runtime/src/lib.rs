pub mod engine;
pub mod error;
pub mod field_length;
pub mod queue;
pub mod sample;

pub use engine::{Engine, OutputTarget};
pub use error::{EngineError, TaskError};
pub use queue::{BackgroundTaskQueue, DrainReport, Task, TaskRunner, WorkerState};
