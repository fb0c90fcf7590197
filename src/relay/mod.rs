pub mod metrics;
pub mod relay_engine;

pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use relay_engine::{RelayEngine, SendOutcome};
