//! The node execution primitive: one handler invocation wrapped with bounded
//! retries, a per-attempt timeout, backoff, and cooperative cancellation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use quarry_types::{Outcome, TaskError};

use crate::backoff::Backoff;

/// Context handed to each handler attempt.
///
/// `cancellation` is the attempt's derived token: it fires when the caller's
/// token fires or when the attempt times out, whichever comes first. Handlers
/// that fan work out (spawned tasks, remote calls) should pass it along and
/// observe it; cancellation is cooperative, never forced termination.
#[derive(Debug, Clone)]
pub struct NodeContext<S> {
    pub state: S,
    pub cancellation: CancellationToken,
}

impl<S> NodeContext<S> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// What an `on_retry` observer sees: the 0-based attempt that just failed
/// and its normalized error. Observers are side-effect-only (logging,
/// metrics, controller signals); they cannot influence the retry decision.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub attempt: u32,
    pub error: &'a TaskError,
}

type RetryHook = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Per-invocation configuration for [`execute`].
///
/// `max_retries` counts retries, not attempts: `max_retries = 2` allows three
/// invocations of the handler. The default is a single attempt, no timeout,
/// linear backoff, and no external cancellation.
#[derive(Clone, Default)]
pub struct RunOptions {
    max_retries: u32,
    timeout: Option<Duration>,
    backoff: Backoff,
    cancellation: Option<CancellationToken>,
    on_retry: Option<RetryHook>,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Time budget for each individual attempt, not the whole execution.
    #[must_use]
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Install a side-effect-only observer invoked before each retry.
    #[must_use]
    pub fn on_retry(mut self, hook: impl Fn(&RetryEvent<'_>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .field("cancellation", &self.cancellation.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Execute one unit of asynchronous work under retry, timeout, and
/// cancellation control.
///
/// The handler is invoked as `handler(input, context)` once per attempt, at
/// most `max_retries + 1` times, strictly sequentially. Each attempt races
/// the handler against the caller's cancellation token and the optional
/// per-attempt timeout; on either, the attempt's derived token is cancelled
/// so downstream work stops promptly, and the attempt future is dropped.
///
/// Never panics and never leaks timers: every path resolves to an
/// [`Outcome`], and all timers and derived tokens are released on return.
///
/// Terminal rules:
/// - handler success returns immediately;
/// - external cancellation is terminal for the whole execution
///   (code `Aborted`), whether it fires before the first attempt, during an
///   attempt, or during backoff;
/// - a timed-out attempt (code `Timeout`) and handler failures retry until
///   `max_retries` is exhausted, waiting `backoff.delay(next_attempt)`
///   between attempts.
pub async fn execute<S, I, T, F, Fut>(
    handler: F,
    input: I,
    state: S,
    options: &RunOptions,
) -> Outcome<T>
where
    S: Clone,
    I: Clone,
    F: Fn(I, NodeContext<S>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let external = options.cancellation.clone().unwrap_or_default();
    if external.is_cancelled() {
        return Err(TaskError::aborted("cancelled before first attempt"));
    }

    let execution_id = Uuid::new_v4();
    let mut attempt: u32 = 0;

    loop {
        let attempt_token = external.child_token();
        let context = NodeContext {
            state: state.clone(),
            cancellation: attempt_token.clone(),
        };

        let error = match run_attempt(
            handler(input.clone(), context),
            options.timeout,
            &external,
            &attempt_token,
        )
        .await
        {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_aborted() {
            return Err(error);
        }

        if attempt >= options.max_retries {
            tracing::debug!(
                execution_id = %execution_id,
                attempts = attempt + 1,
                error = %error,
                "node failed after exhausting retries"
            );
            return Err(error);
        }

        if let Some(hook) = &options.on_retry {
            hook(&RetryEvent {
                attempt,
                error: &error,
            });
        }

        let delay = options.backoff.delay(attempt + 1);
        tracing::debug!(
            execution_id = %execution_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            error = %error,
            "retrying node after failure"
        );

        tokio::select! {
            () = external.cancelled() => {
                return Err(TaskError::aborted("cancelled during backoff"));
            }
            () = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// Race one attempt against external cancellation and the optional timeout.
async fn run_attempt<T, Fut>(
    attempt: Fut,
    timeout: Option<Duration>,
    external: &CancellationToken,
    attempt_token: &CancellationToken,
) -> Outcome<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        () = external.cancelled() => Err(TaskError::aborted("cancellation requested")),
        outcome = bounded(attempt, timeout) => outcome,
    };

    if let Err(error) = &outcome
        && (error.is_aborted() || error.is_timeout())
    {
        // The attempt future is already dropped; this asks any work it
        // handed the derived token to stop as well.
        attempt_token.cancel();
    }

    outcome
}

async fn bounded<T, Fut>(attempt: Fut, timeout: Option<Duration>) -> Outcome<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result.map_err(|e| TaskError::normalize(&e)),
            Err(_) => Err(TaskError::timeout(format!(
                "attempt exceeded {}ms",
                limit.as_millis()
            ))),
        },
        None => attempt.await.map_err(|e| TaskError::normalize(&e)),
    }
}
