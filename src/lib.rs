pub mod aggregate;
pub mod config;
pub mod db;
pub mod distribution;
pub mod error;
pub mod models;
pub mod playbook;
pub mod report;
pub mod risk;
pub mod source;
pub mod store;

pub use aggregate::{group_by, AggregationResult, GroupStats};
pub use config::{AnalyticsConfig, ScorePolicy};
pub use error::{ConfigError, IngestionError};
pub use models::{CustomerRecord, RawRow, RiskCategory};
pub use playbook::{evaluate, CohortSummary, RetentionRule, RuleMatch, STANDARD_PLAYBOOK};
pub use report::{summary_metrics, top_risk, OrderBy, SummaryMetrics};
pub use risk::{ClassifiedRecord, RiskThresholds};
pub use store::RecordStore;
