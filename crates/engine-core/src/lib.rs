pub mod error;
pub mod event_bus;
pub mod join_graph;
pub mod metrics;
pub mod progress;
pub mod schema;
pub mod staging;
