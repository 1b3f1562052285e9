//! Pure domain logic for the ad automation rule engine.
//!
//! Everything in this crate is free of I/O so it can be shared by the
//! database layer, the execution engine, and the HTTP surface, and tested
//! with plain `#[test]` functions.

pub mod action;
pub mod condition;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod metrics;
pub mod rule;
pub mod run;
pub mod types;
