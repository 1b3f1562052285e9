mod support;

use std::sync::Arc;
use std::time::Duration;

use adpilot_core::rule::ExecutionStatus;
use adpilot_core::run::RunTrigger;
use adpilot_engine::RuleScheduler;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use support::*;

#[tokio::test]
async fn tick_runs_only_active_rules() {
    let h = Harness::new(turn_off_rule(1), vec![campaign("c1", 100.0, None)]);
    let mut paused_rule = turn_off_rule(2);
    paused_rule.is_active = false;
    h.rules.insert(paused_rule);

    let scheduler = RuleScheduler::new(Arc::clone(&h.orchestrator), Duration::from_secs(900));
    let mut runs = JoinSet::new();
    let started = scheduler.tick(&mut runs).await.unwrap();
    while runs.join_next().await.is_some() {}

    assert_eq!(started, 1);
    let reports = h.rules.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].rule_id, 1);
    assert_eq!(reports[0].trigger, RunTrigger::Scheduled);
    assert_eq!(h.rules.get(2).execution_status, ExecutionStatus::Idle);
}

#[tokio::test]
async fn rule_still_running_is_skipped_quietly() {
    let h = Harness::new(turn_off_rule(1), vec![campaign("c1", 100.0, None)]);
    h.rules.set_status(1, ExecutionStatus::Pending);

    let scheduler = RuleScheduler::new(Arc::clone(&h.orchestrator), Duration::from_secs(900));
    let mut runs = JoinSet::new();
    scheduler.tick(&mut runs).await.unwrap();
    while let Some(joined) = runs.join_next().await {
        joined.unwrap();
    }

    assert!(h.rules.reports().is_empty());
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn scheduler_stops_on_cancel() {
    let h = Harness::new(turn_off_rule(1), vec![campaign("c1", 100.0, None)]);
    let scheduler = RuleScheduler::new(Arc::clone(&h.orchestrator), Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(scheduler.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    handle.await.unwrap();

    // The first tick fires immediately.
    assert_eq!(h.rules.reports().len(), 1);
}
