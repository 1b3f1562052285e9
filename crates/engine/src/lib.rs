//! Execution engine for automation rules.
//!
//! [`Orchestrator`] runs one rule through
//! `Pending -> Evaluating -> Matching -> Executing -> Completed`, talking to
//! its collaborators only through the traits in [`ports`]. [`adapters`]
//! holds the Postgres, event-bus and HTTP implementations used in
//! production; tests substitute in-memory fakes.

pub mod adapters;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod ports;
pub mod rate_limit;
pub mod scheduler;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::{ClaimedRun, Collaborators, MatchPreview, Orchestrator, RunRequest};
pub use scheduler::RuleScheduler;
