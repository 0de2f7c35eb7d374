//! Retry policy for sink writes.
//!
//! The policy is data: attempt budget, exponential backoff shape, optional
//! jitter, and a classifier deciding which [`SinkError`]s are retryable. The
//! [`Producer`](crate::Producer) interprets it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::sink::SinkError;

type Classifier = Arc<dyn Fn(&SinkError) -> bool + Send + Sync>;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Bounded exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
    classifier: Classifier,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` sends in total (the first send
    /// counts). Values below 1 are raised to 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Growth factor between consecutive delays. Values below 1 are raised to 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            DEFAULT_MULTIPLIER
        };
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Overrides which errors are retried. The default retries
    /// [`SinkError::Transient`] only.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&SinkError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, error: &SinkError) -> bool {
        (self.classifier)(error)
    }

    /// Un-jittered delay after failed attempt number `attempt` (1-based):
    /// `min(initial * multiplier^(attempt - 1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let nanos = self.initial_backoff.as_nanos() as f64 * factor;
        let cap = self.max_backoff.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= cap {
            return self.max_backoff;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Delay to sleep after failed attempt `attempt`. With jitter enabled the
    /// delay is drawn uniformly from `[base / 2, base]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let half = base / 2;
        let spread = base - half;
        let extra = rand::thread_rng().gen_range(0..=spread.as_nanos() as u64);
        half + Duration::from_nanos(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
            classifier: Arc::new(SinkError::is_transient),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}
