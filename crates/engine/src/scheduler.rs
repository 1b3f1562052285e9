//! Periodic evaluation of active rules.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::orchestrator::{Orchestrator, RunRequest};

/// Starts a scheduled run for every active rule on each tick.
///
/// Runs for different rules proceed concurrently; the orchestrator's claim
/// keeps a rule from overlapping with itself.
pub struct RuleScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl RuleScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Tick until `cancel` fires, then wait for in-flight runs to finish.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Rule scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut runs = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Rule scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(&mut runs).await {
                        Ok(started) => tracing::debug!(started, "Scheduler tick"),
                        Err(e) => tracing::error!(error = %e, "Failed to list active rules"),
                    }
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Scheduled run task panicked");
                    }
                }
            }
        }

        while runs.join_next().await.is_some() {}
        tracing::info!("Rule scheduler stopped");
    }

    /// Spawn one scheduled run per active rule. Returns how many were started.
    pub async fn tick(&self, runs: &mut JoinSet<()>) -> Result<usize, EngineError> {
        let rules = self.orchestrator.active_rules().await?;
        for rule in &rules {
            let orchestrator = Arc::clone(&self.orchestrator);
            let rule_id = rule.id;
            runs.spawn(async move {
                match orchestrator.run(RunRequest::scheduled(rule_id)).await {
                    Ok(_) => {}
                    Err(EngineError::AlreadyRunning(_)) => {
                        tracing::debug!(rule_id, "Rule still running, skipping this tick");
                    }
                    Err(e) => {
                        tracing::error!(rule_id, error = %e, "Scheduled run failed to start");
                    }
                }
            });
        }
        Ok(rules.len())
    }
}
