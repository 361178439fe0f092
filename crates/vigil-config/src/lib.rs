pub mod audit;
pub mod error;
pub mod loader;

pub use audit::{
    AuditConfig, OperationCheck, PollerConfig, ReportConfig, ReportFormat, RunConfig,
    TaggingConfig, TargetConfig, MAX_DEADLINE_SECONDS, MAX_LOOKBACK_HOURS,
    OPERATION_ABANDONED_CATEGORY, OPERATION_FAILED_CATEGORY, OPERATION_TIMEOUT_CATEGORY,
};
pub use error::ConfigError;
pub use loader::ConfigLoader;
