use std::time::Duration;

use adpilot_core::action::CurrencyPolicy;

/// Engine configuration loaded from environment variables.
///
/// Shared by the API (manual runs) and the worker (scheduled runs).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum spacing between two Action Gateway calls for one account.
    pub action_pacing: Duration,
    /// Backoff schedule after a rate-limit response. Its length bounds the
    /// number of retries.
    pub rate_limit_retry_delays: Vec<Duration>,
    /// Scheduler tick.
    pub schedule_interval: Duration,
    /// A rule stuck in `pending` longer than this may be claimed again.
    pub stale_run_after: Duration,
    pub currency: CurrencyPolicy,
    pub gateway_url: String,
    pub gateway_token: Option<String>,
    /// External endpoint for run summaries. Unset disables forwarding.
    pub notify_webhook_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_pacing: Duration::from_millis(3000),
            rate_limit_retry_delays: [5, 15, 45].map(Duration::from_secs).to_vec(),
            schedule_interval: Duration::from_secs(900),
            stale_run_after: Duration::from_secs(1800),
            currency: CurrencyPolicy::for_code("KRW"),
            gateway_url: "http://localhost:8081".into(),
            gateway_token: None,
            notify_webhook_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `ACTION_PACING_MS`             | `3000`                  |
    /// | `RATE_LIMIT_RETRY_DELAYS_SECS` | `5,15,45`               |
    /// | `SCHEDULE_INTERVAL_SECS`       | `900`                   |
    /// | `STALE_RUN_SECS`               | `1800`                  |
    /// | `ACCOUNT_CURRENCY`             | `KRW`                   |
    /// | `MIN_DAILY_BUDGET`             | currency default        |
    /// | `AD_GATEWAY_URL`               | `http://localhost:8081` |
    /// | `AD_GATEWAY_TOKEN`             | unset                   |
    /// | `NOTIFY_WEBHOOK_URL`           | unset                   |
    pub fn from_env() -> Self {
        let action_pacing_ms: u64 = std::env::var("ACTION_PACING_MS")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("ACTION_PACING_MS must be a valid u64");

        let rate_limit_retry_delays = parse_delays(
            &std::env::var("RATE_LIMIT_RETRY_DELAYS_SECS").unwrap_or_else(|_| "5,15,45".into()),
        )
        .expect("RATE_LIMIT_RETRY_DELAYS_SECS must be a comma-separated list of seconds");

        let schedule_interval_secs: u64 = std::env::var("SCHEDULE_INTERVAL_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("SCHEDULE_INTERVAL_SECS must be a valid u64");

        let stale_run_secs: u64 = std::env::var("STALE_RUN_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()
            .expect("STALE_RUN_SECS must be a valid u64");

        let currency_code = std::env::var("ACCOUNT_CURRENCY").unwrap_or_else(|_| "KRW".into());
        let mut currency = CurrencyPolicy::for_code(&currency_code);
        if let Ok(raw) = std::env::var("MIN_DAILY_BUDGET") {
            let min: f64 = raw.parse().expect("MIN_DAILY_BUDGET must be a number");
            currency = currency.with_min_budget(min);
        }

        Self {
            action_pacing: Duration::from_millis(action_pacing_ms),
            rate_limit_retry_delays,
            schedule_interval: Duration::from_secs(schedule_interval_secs),
            stale_run_after: Duration::from_secs(stale_run_secs),
            currency,
            gateway_url: std::env::var("AD_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8081".into()),
            gateway_token: non_empty_var("AD_GATEWAY_TOKEN"),
            notify_webhook_url: non_empty_var("NOTIFY_WEBHOOK_URL"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `"5,15,45"` into a backoff schedule. An empty string disables retry.
pub fn parse_delays(raw: &str) -> Result<Vec<Duration>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| format!("'{s}' is not a whole number of seconds"))
        })
        .collect()
}
