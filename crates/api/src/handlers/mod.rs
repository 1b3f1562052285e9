pub mod automation_rules;
