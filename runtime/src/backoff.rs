//! Delay policies between retry attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes the delay before a given attempt, numbered from 1.
///
/// The default is linear: a fixed base multiplied by the attempt number.
/// `Custom` admits any function of the attempt number, including the
/// exponential-with-cap shape the batch policy uses.
#[derive(Clone)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `base * attempt`.
    Linear { base: Duration },
    /// `base * 2^(attempt - 1)`, capped.
    Exponential { base: Duration, cap: Duration },
    /// Arbitrary function of the 1-based attempt number.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Base delay for the default linear policy.
    pub const DEFAULT_BASE: Duration = Duration::from_millis(250);

    /// Delay to wait before `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base, cap } => match 2u32.checked_pow(attempt - 1) {
                Some(factor) => base.saturating_mul(factor).min(*cap),
                None => *cap,
            },
            Backoff::Custom(f) => f(attempt),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            base: Self::DEFAULT_BASE,
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Backoff::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Backoff::Exponential { base, cap } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("cap", cap)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
