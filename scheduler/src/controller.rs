//! Adaptive concurrency window.
//!
//! The controller watches the stream of per-task outcomes and resizes the
//! number of tasks the scheduler may keep in flight: grow cautiously during
//! sustained success, shrink on failures, and contract sharply when the
//! upstream service starts throttling — a halved window avoids piling
//! retries onto a provider that is already shedding load.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;

/// Bounds for the concurrency window.
///
/// `min` is the floor the window never drops below (at least 1, so a batch
/// always makes progress), `max` the ceiling growth never exceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub initial: usize,
    pub min: usize,
    pub max: usize,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            initial: 4,
            min: 1,
            max: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowLimitsError {
    #[error("window minimum must be at least 1")]
    ZeroMin,
    #[error("window bounds must satisfy min <= initial <= max (min {min}, initial {initial}, max {max})")]
    OutOfOrder {
        min: usize,
        initial: usize,
        max: usize,
    },
}

/// Tunable reaction strengths for the window update rule.
///
/// The asymmetry is deliberate: growth is slow (one slot per success
/// streak), generic failure pulls back one slot, and throttling divides the
/// window outright.
#[derive(Debug, Clone, Copy)]
pub struct ControllerTuning {
    growth_threshold: u32,
    throttle_divisor: usize,
}

impl ControllerTuning {
    /// Values are clamped to sane floors: at least one success per growth
    /// step, and a divisor of at least 2 so throttling always contracts.
    #[must_use]
    pub fn new(growth_threshold: u32, throttle_divisor: usize) -> Self {
        Self {
            growth_threshold: growth_threshold.max(1),
            throttle_divisor: throttle_divisor.max(2),
        }
    }
}

impl Default for ControllerTuning {
    fn default() -> Self {
        Self {
            growth_threshold: 5,
            throttle_divisor: 2,
        }
    }
}

/// Read-only copy of the controller state, for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub window: usize,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct WindowState {
    window: usize,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

/// Tracks the target in-flight window from a stream of outcome signals.
///
/// The state is owned exclusively by the controller and mutated only through
/// [`on_success`](Self::on_success), [`on_error`](Self::on_error), and
/// [`on_rate_limited`](Self::on_rate_limited). All entry points take `&self`
/// and are safe to call from any task's completion path in any order; the
/// resulting window depends only on the multiset of signals received.
#[derive(Debug)]
pub struct ConcurrencyController {
    min: usize,
    max: usize,
    tuning: ControllerTuning,
    state: Mutex<WindowState>,
}

impl ConcurrencyController {
    pub fn new(limits: WindowLimits) -> Result<Self, WindowLimitsError> {
        Self::with_tuning(limits, ControllerTuning::default())
    }

    pub fn with_tuning(
        limits: WindowLimits,
        tuning: ControllerTuning,
    ) -> Result<Self, WindowLimitsError> {
        if limits.min == 0 {
            return Err(WindowLimitsError::ZeroMin);
        }
        if limits.min > limits.initial || limits.initial > limits.max {
            return Err(WindowLimitsError::OutOfOrder {
                min: limits.min,
                initial: limits.initial,
                max: limits.max,
            });
        }

        Ok(Self {
            min: limits.min,
            max: limits.max,
            tuning,
            state: Mutex::new(WindowState {
                window: limits.initial,
                consecutive_successes: 0,
                consecutive_failures: 0,
            }),
        })
    }

    /// Current window size: the number of tasks the scheduler may keep in
    /// flight at its next launch decision.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.lock().window
    }

    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        let state = self.lock();
        WindowSnapshot {
            window: state.window,
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// A task completed cleanly. Every `growth_threshold`-long success
    /// streak widens the window by one slot, capped at `max`.
    pub fn on_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        if state.consecutive_successes >= self.tuning.growth_threshold {
            state.consecutive_successes = 0;
            if state.window < self.max {
                state.window += 1;
                tracing::debug!(
                    window = state.window,
                    "widened concurrency window after sustained success"
                );
            }
        }
    }

    /// A task failed for a non-throttling reason. Narrows the window by one
    /// slot, floored at `min`.
    pub fn on_error(&self) {
        let mut state = self.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        if state.window > self.min {
            state.window -= 1;
            tracing::debug!(
                window = state.window,
                consecutive_failures = state.consecutive_failures,
                "narrowed concurrency window after failure"
            );
        }
    }

    /// The upstream service throttled us: divide the window, floored at
    /// `min`, and reset both streaks.
    pub fn on_rate_limited(&self) {
        let mut state = self.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures = 0;
        let contracted = (state.window / self.tuning.throttle_divisor).max(self.min);
        if contracted != state.window {
            state.window = contracted;
            tracing::debug!(
                window = state.window,
                "contracted concurrency window after rate limiting"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().expect("concurrency window lock poisoned")
    }
}
