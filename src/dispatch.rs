// =============================================================================
// ExecutionDispatcher — publishes execution requests to the work queue
// =============================================================================
//
// The dispatcher task drains fired signals from the engine, resolves
// subscribers through the directory, and publishes one execution request per
// (user, strategy) match.  Publishes are independent: each runs in its own
// task with its own bounded retry schedule, so one unreachable subscriber
// publish never delays another and a dead queue never backs up into
// ingestion.  After the attempt limit is exhausted the trigger is dropped
// and logged.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::matcher::{match_subscriptions, DirectoryClient};
use crate::types::{ExecutionRequest, FiredSignal};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff schedule shared by queue publishes and
/// directory lookups.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max,
        }
    }

    /// Delay after the `attempt`-th failure (0-based): base, base*2, base*4,
    /// ... capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        self.base
            .checked_mul(factor as u32)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// HTTP publisher for the external execution work queue.
pub struct ExecutionDispatcher {
    http: reqwest::Client,
    queue_url: String,
    policy: RetryPolicy,
}

impl ExecutionDispatcher {
    pub fn new(queue_base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            queue_url: format!("{queue_base_url}/api/v1/queue/execution"),
            policy,
        }
    }

    async fn publish_once(&self, request: &ExecutionRequest, job_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "job": "trigger",
            "jobId": job_id,
            "data": request,
        });

        self.http
            .post(&self.queue_url)
            .json(&body)
            .send()
            .await
            .context("queue publish failed")?
            .error_for_status()
            .context("queue publish rejected")?;
        Ok(())
    }

    /// Publish one execution request with bounded retries.
    ///
    /// Returns `true` on success. On exhaustion the trigger is dropped and
    /// logged as such — dropped delivery is preferred over unbounded
    /// blocking.
    pub async fn publish_with_retry(&self, request: &ExecutionRequest) -> bool {
        // One job id across attempts so queue-side dedup sees retries as the
        // same job.
        let job_id = Uuid::new_v4().to_string();

        for attempt in 0..self.policy.max_attempts {
            match self.publish_once(request, &job_id).await {
                Ok(()) => {
                    info!(
                        strategy = %request.strategy_id,
                        user = %request.user_id,
                        direction = %request.direction,
                        "execution request published"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        strategy = %request.strategy_id,
                        user = %request.user_id,
                        attempt = attempt + 1,
                        error = %e,
                        "queue publish attempt failed"
                    );
                }
            }
            if attempt + 1 < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        error!(
            strategy = %request.strategy_id,
            user = %request.user_id,
            attempts = self.policy.max_attempts,
            "trigger dropped: queue unavailable"
        );
        false
    }
}

// ---------------------------------------------------------------------------
// Dispatcher loop
// ---------------------------------------------------------------------------

/// Drain fired signals, resolve subscribers, and fan out publishes.
pub async fn run_signal_dispatcher(
    state: Arc<AppState>,
    mut signals: mpsc::UnboundedReceiver<FiredSignal>,
    directory: DirectoryClient,
    dispatcher: Arc<ExecutionDispatcher>,
) {
    info!("signal dispatcher running");

    while let Some(fired) = signals.recv().await {
        let policy = dispatcher.policy.clone();

        // Directory lookup with the same bounded-backoff treatment as
        // publishes: transient, never fatal.
        let mut snapshot = None;
        for attempt in 0..policy.max_attempts {
            match directory
                .subscriptions_for_indicator(&fired.indicator_id)
                .await
            {
                Ok(users) => {
                    snapshot = Some(users);
                    break;
                }
                Err(e) => {
                    warn!(
                        indicator = %fired.indicator_id,
                        attempt = attempt + 1,
                        error = %e,
                        "directory lookup failed"
                    );
                }
            }
            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }
        let Some(snapshot) = snapshot else {
            error!(
                indicator = %fired.indicator_id,
                key = %fired.key,
                "trigger dropped: directory unavailable"
            );
            state.triggers_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let targets = match_subscriptions(&snapshot, &fired.key, &fired.indicator_id);
        if targets.is_empty() {
            debug!(
                indicator = %fired.indicator_id,
                key = %fired.key,
                "no subscribers for fired signal"
            );
            continue;
        }

        for target in targets {
            let request = ExecutionRequest {
                strategy_id: target.strategy_id,
                user_id: target.user_id,
                asset_symbol: fired.key.symbol.clone(),
                timeframe: fired.key.interval.clone(),
                indicator_name: fired.indicator_name.clone(),
                direction: fired.direction.as_wire().to_string(),
            };

            let dispatcher = dispatcher.clone();
            let state = state.clone();
            tokio::spawn(async move {
                if dispatcher.publish_with_retry(&request).await {
                    state.triggers_dispatched.fetch_add(1, Ordering::Relaxed);
                } else {
                    state.triggers_dropped.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    }

    warn!("signal dispatcher stopped: engine channel closed");
}
