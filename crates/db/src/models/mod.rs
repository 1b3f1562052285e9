//! Row models and DTOs, one module per table.

pub mod automation_rule;
pub mod event;
pub mod execution_record;
pub mod metric_snapshot;
pub mod rule_run;
