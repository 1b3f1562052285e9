//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod automation_rule_repo;
pub mod event_repo;
pub mod metric_snapshot_repo;
pub mod rule_execution_repo;
pub mod rule_run_repo;

pub use automation_rule_repo::AutomationRuleRepo;
pub use event_repo::EventRepo;
pub use metric_snapshot_repo::MetricSnapshotRepo;
pub use rule_execution_repo::RuleExecutionRepo;
pub use rule_run_repo::RuleRunRepo;
