use std::env;
use std::time::Duration;

/// Runtime tuning for the engine and its scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the scheduler wakes to drain due executions.
    pub tick_interval: Duration,
    /// Maximum executions claimed per drain batch.
    pub drain_limit: usize,
    /// Maximum batches drained in a single tick.
    pub max_batches_per_tick: usize,
    /// Concurrent executions processed at once.
    pub worker_count: usize,
    /// How long a claim on an execution is honored before another worker may
    /// reclaim it (crash recovery window).
    pub claim_ttl: Duration,
    /// Upper bound on a single delivery-provider call.
    pub delivery_timeout: Duration,
    /// Maximum steps one execution may advance inside a single claim.
    pub step_budget: u32,
    /// Retries when the contact store reports a mutation conflict.
    pub mutation_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            drain_limit: 10,
            max_batches_per_tick: 100,
            worker_count: 4,
            claim_ttl: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(30),
            step_budget: 25,
            mutation_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            tick_interval: Duration::from_secs(
                env::var("ENGINE_TICK_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            ),
            drain_limit: env::var("ENGINE_DRAIN_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(defaults.drain_limit),
            max_batches_per_tick: env::var("ENGINE_MAX_BATCHES_PER_TICK")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(defaults.max_batches_per_tick),
            worker_count: env::var("ENGINE_WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(defaults.worker_count),
            claim_ttl: Duration::from_secs(
                env::var("ENGINE_CLAIM_TTL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            ),
            delivery_timeout: Duration::from_secs(
                env::var("ENGINE_DELIVERY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            step_budget: env::var("ENGINE_STEP_BUDGET")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(defaults.step_budget),
            mutation_retries: env::var("ENGINE_MUTATION_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(defaults.mutation_retries),
        }
    }
}
