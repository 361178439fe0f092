pub mod finding;
pub mod metric;
pub mod operation;
pub mod report;
pub mod resource;
pub mod rule;

pub use finding::{max_severity, Finding, FindingSource, Severity};
pub use metric::{Datapoint, MetricSeries, Reduction, StatisticKind, TimeWindow};
pub use operation::{
    AsyncOperation, OperationError, OperationResult, OperationState, OperationStatus,
};
pub use report::{
    DataGap, GapReason, OperationSummary, Report, ResourceSection, TagAction, TagOutcome,
    TaggingSummary,
};
pub use resource::{Resource, ResourceFilter, ResourceRef};
pub use rule::{Comparator, MissingData, RuleTarget, ThresholdRule};
