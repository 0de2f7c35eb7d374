//! Resilient producer.
//!
//! [`Producer`] composes a [`Sink`] with an optional [`RetryPolicy`]. Without
//! a policy it is the bare sink: one attempt, any failure is terminal. With a
//! policy, retryable failures are re-sent after the policy's backoff until
//! the attempt budget runs out. Every send and every backoff sleep races the
//! cancellation token, so a force-stop unwinds mid-loop.

use std::sync::Arc;

use siphon_types::TargetOperation;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::sink::{Sink, SinkError};

/// Terminal outcome of a produce call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProduceError {
    /// The sink rejected the operation as non-retryable.
    #[error("permanent failure after {attempts} attempt(s): {source}")]
    Permanent { attempts: u32, source: SinkError },

    /// Every attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted { attempts: u32, source: SinkError },

    /// Cancelled before the sink confirmed. The operation may or may not have
    /// been applied.
    #[error("produce cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

/// A sink optionally wrapped in a retry policy.
#[derive(Clone)]
pub struct Producer {
    sink: Arc<dyn Sink>,
    retry: Option<RetryPolicy>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// A producer without retries.
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink, retry: None }
    }

    /// A producer that retries according to `policy`.
    pub fn with_retry(sink: Arc<dyn Sink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            retry: Some(policy),
        }
    }

    /// Builds either variant depending on whether a policy is present.
    pub fn from_parts(sink: Arc<dyn Sink>, retry: Option<RetryPolicy>) -> Self {
        Self { sink, retry }
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    /// Sends `operation`, retrying per policy. Returns the number of attempts
    /// it took on success.
    pub async fn produce(
        &self,
        operation: &TargetOperation,
        cancel: &CancellationToken,
    ) -> Result<u32, ProduceError> {
        let max_attempts = self.retry.as_ref().map_or(1, RetryPolicy::max_attempts);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ProduceError::Cancelled { attempts: attempt - 1 });
                }
                result = self.sink.send(operation) => result,
            };

            let error = match result {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(
                            destination = %operation.destination,
                            attempt,
                            "produce succeeded after retry"
                        );
                    }
                    return Ok(attempt);
                }
                Err(error) => error,
            };

            let Some(policy) = &self.retry else {
                return Err(if error.is_transient() {
                    ProduceError::Exhausted { attempts: attempt, source: error }
                } else {
                    ProduceError::Permanent { attempts: attempt, source: error }
                });
            };

            if !policy.is_retryable(&error) {
                return Err(ProduceError::Permanent {
                    attempts: attempt,
                    source: error,
                });
            }
            if attempt >= max_attempts {
                return Err(ProduceError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = policy.delay_for(attempt);
            warn!(
                destination = %operation.destination,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retryable sink error, backing off"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ProduceError::Cancelled { attempts: attempt });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
