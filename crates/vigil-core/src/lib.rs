//! Vigil 审计引擎
//!
//! 资源发现、指标归约、长时操作轮询、阈值评估、报告构建与可选的资源打标。

pub mod aggregator;
pub mod collector;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod poller;
pub mod provider;
pub mod render;
pub mod report;
pub mod signal;
pub mod tagger;

pub use aggregator::MetricAggregator;
pub use collector::{Described, Inventory, ResourceInventoryCollector};
pub use engine::AuditEngine;
pub use error::{ProviderError, Result, VigilError};
pub use evaluator::{parse_attribute, Assessment, ThresholdEvaluator};
pub use poller::{AsyncOperationPoller, PollerSettings};
pub use provider::{ProviderClient, SnapshotProvider};
pub use render::{overall_status, render, render_json, TextReport};
pub use report::{ReportBuilder, ReportHeader};
pub use signal::RunSignal;
pub use tagger::ResourceTagger;
