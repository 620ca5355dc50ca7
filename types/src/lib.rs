//! Core domain types for Quarry.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the normalized error shape every component speaks
//! ([`TaskError`]), the failure taxonomy ([`ErrorCode`]), and the units of
//! work the scheduler moves around ([`Task`], [`Outcome`], [`Completion`]).

mod error;
mod task;

pub use error::{ErrorCode, Fallback, TaskError};
pub use task::{Completion, Outcome, Task};
