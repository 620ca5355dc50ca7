//! Node execution runtime with unified retry, timeout, and cancellation.
//!
//! # Architecture
//!
//! Every resilient operation in Quarry — a single classification step or one
//! task inside a thousand-region batch — funnels through the same primitive:
//!
//! - [`execute`] - Runs one handler under [`RunOptions`]: bounded retries,
//!   an optional per-attempt timeout, a [`Backoff`] delay policy, and
//!   cooperative cancellation.
//! - [`NodeContext`] - Handed to each attempt; carries caller state and the
//!   attempt's derived cancellation token.
//! - [`Backoff`] - Fixed, linear (default), exponential-with-cap, or custom
//!   delay as a function of the 1-based attempt number.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. The caller's token and the per-attempt
//! timeout compose into one derived token per attempt whose cancellation is
//! the logical OR of its sources. Triggering the caller's token stops new
//! attempts, interrupts backoff waits, and cancels the in-flight attempt's
//! derived token; remote work is asked to stop, never forcibly terminated.
//!
//! # Error Handling
//!
//! [`execute`] never panics: every path resolves to an
//! [`Outcome`](quarry_types::Outcome), with handler failures normalized to
//! [`TaskError`](quarry_types::TaskError) and runtime-raised failures tagged
//! `Timeout` or `Aborted`.

mod backoff;
mod node;

pub use backoff::Backoff;
pub use node::{NodeContext, RetryEvent, RunOptions, execute};
pub use tokio_util::sync::CancellationToken;
