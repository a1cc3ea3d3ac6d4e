//! Failure handling strategies

use crate::errors::FlowError;
use crate::types::FailureStrategy;
use std::time::Duration;
use tracing::{info, warn};

/// Failure handler trait
pub trait FailureHandler: Send + Sync {
    /// Decide what happens after `attempt` failed
    fn handle_failure(
        &self,
        step_id: &str,
        strategy: FailureStrategy,
        error: &FlowError,
        attempt: u32,
    ) -> FailureHandlerResult;

    fn calculate_backoff(&self, strategy: FailureStrategy, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureHandlerResult {
    /// Stop the run after reporting this step
    Abort,

    /// Report the step and move on
    Continue,

    /// Dispatch again after the backoff
    Retry { attempt: u32, backoff_ms: u64 },
}

#[derive(Debug, Default)]
pub struct DefaultFailureHandler;

impl DefaultFailureHandler {
    pub fn new() -> Self {
        Self
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn handle_failure(
        &self,
        step_id: &str,
        strategy: FailureStrategy,
        error: &FlowError,
        attempt: u32,
    ) -> FailureHandlerResult {
        match strategy {
            FailureStrategy::Abort => {
                warn!(step = step_id, %error, "step failed, aborting run");
                FailureHandlerResult::Abort
            }
            FailureStrategy::Continue => {
                warn!(step = step_id, %error, "step failed, continuing");
                FailureHandlerResult::Continue
            }
            FailureStrategy::Retry { max_attempts, .. } => {
                if attempt >= max_attempts {
                    warn!(step = step_id, attempt, %error, "retries exhausted, continuing");
                    return FailureHandlerResult::Continue;
                }
                let backoff = self.calculate_backoff(strategy, attempt);
                info!(
                    step = step_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "step failed, retrying"
                );
                FailureHandlerResult::Retry {
                    attempt: attempt + 1,
                    backoff_ms: backoff.as_millis() as u64,
                }
            }
        }
    }

    fn calculate_backoff(&self, strategy: FailureStrategy, attempt: u32) -> Duration {
        match strategy {
            FailureStrategy::Retry { backoff_ms, .. } => {
                // backoff_ms * 2^(attempt-1), capped at 10 s
                let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(backoff_ms.saturating_mul(multiplier).min(10_000))
            }
            _ => Duration::ZERO,
        }
    }
}
