pub mod collector;
pub mod reduce;

pub use collector::{MetricsError, RunMetrics};
pub use reduce::{reduce, reduce_values};
