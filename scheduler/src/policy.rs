//! Per-task retry policy for batch work against a rate-limited service.
//!
//! A thin layer over [`quarry_runtime::execute`]: the runtime owns the
//! attempt loop, this policy owns what the batch cares about — exponential
//! backoff tuned for a throttling provider, classification of failures into
//! rate-limited versus generic, controller reporting, and degraded-but-
//! non-failing completion when retries run out.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use quarry_runtime::{Backoff, NodeContext, RunOptions, execute};
use quarry_types::{Completion, TaskError};

use crate::controller::ConcurrencyController;

type Classifier = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;

/// Retry configuration for one class of batch task.
///
/// Defaults follow common client-SDK retry behavior: two retries, 500ms
/// initial delay doubling up to 8 seconds, down-jittered by up to 25%. A
/// `jitter_factor` of 0 makes delays deterministic (tests rely on that).
/// The default classifier treats errors tagged
/// [`ErrorCode::RateLimited`](quarry_types::ErrorCode) as throttling.
#[derive(Clone)]
pub struct AdaptiveRetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt_timeout: Option<Duration>,
    classifier: Classifier,
}

impl Default for AdaptiveRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
            attempt_timeout: None,
            classifier: Arc::new(TaskError::is_rate_limited),
        }
    }
}

impl AdaptiveRetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = cap;
        self
    }

    /// Down-jitter factor in `[0, 1]`: each delay is multiplied by a random
    /// value in `[1 - factor, 1]`.
    #[must_use]
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Time budget for each individual attempt.
    #[must_use]
    pub fn attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Replace the rate-limit classifier. The classifier decides which
    /// controller signal a failure produces, nothing more.
    #[must_use]
    pub fn classify_with(
        mut self,
        classifier: impl Fn(&TaskError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    fn classify(&self, error: &TaskError) -> bool {
        (self.classifier)(error)
    }

    /// The runtime-facing backoff: `min(base * 2^(attempt-1), max_delay)`,
    /// down-jittered.
    fn backoff(&self) -> Backoff {
        let base = self.base_delay;
        let cap = self.max_delay;
        let jitter_factor = self.jitter_factor;
        Backoff::Custom(Arc::new(move |attempt| {
            jittered_exponential(base, cap, jitter_factor, attempt)
        }))
    }
}

impl fmt::Debug for AdaptiveRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveRetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_factor", &self.jitter_factor)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

fn jittered_exponential(
    base: Duration,
    cap: Duration,
    jitter_factor: f64,
    attempt: u32,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let raw = match 2u32.checked_pow(exponent) {
        Some(factor) => base.saturating_mul(factor),
        None => cap,
    };
    let capped = raw.min(cap);
    if jitter_factor <= 0.0 {
        return capped;
    }
    let jitter = 1.0 - rand::random::<f64>() * jitter_factor;
    capped.mul_f64(jitter)
}

/// Execute one batch task under the adaptive policy.
///
/// Delegates the attempt loop to [`quarry_runtime::execute`]. Every failed
/// attempt reports to the controller before the next one starts —
/// `on_rate_limited` when the policy's classifier matches, `on_error`
/// otherwise — so the window reacts while the task is still retrying.
/// Terminal success reports `on_success` and yields `Verified`; exhaustion
/// reports the matching negative signal and yields `Degraded` with the
/// caller's fallback value. The batch never fails because one task ran out
/// of retries.
///
/// An aborted execution also degrades, but reports nothing: a local
/// cancellation says nothing about upstream health.
pub async fn execute_adaptive<S, I, T, F, Fut>(
    handler: F,
    input: I,
    state: S,
    fallback: T,
    controller: &Arc<ConcurrencyController>,
    policy: &AdaptiveRetryPolicy,
) -> Completion<T>
where
    S: Clone,
    I: Clone,
    F: Fn(I, NodeContext<S>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let reporter = Arc::clone(controller);
    let classifier = policy.classifier.clone();
    let mut options = RunOptions::new()
        .max_retries(policy.max_retries)
        .backoff(policy.backoff())
        .on_retry(move |event| {
            if classifier(event.error) {
                reporter.on_rate_limited();
            } else {
                reporter.on_error();
            }
        });
    if let Some(limit) = policy.attempt_timeout {
        options = options.timeout(limit);
    }

    match execute(handler, input, state, &options).await {
        Ok(value) => {
            controller.on_success();
            Completion::Verified(value)
        }
        Err(error) if error.is_aborted() => {
            tracing::warn!(error = %error, "task aborted; completing with fallback value");
            Completion::Degraded {
                value: fallback,
                error,
            }
        }
        Err(error) => {
            if policy.classify(&error) {
                controller.on_rate_limited();
            } else {
                controller.on_error();
            }
            tracing::warn!(error = %error, "task degraded after exhausting retries");
            Completion::Degraded {
                value: fallback,
                error,
            }
        }
    }
}
