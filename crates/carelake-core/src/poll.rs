//! Polling loop for submitted query executions.
//!
//! The service offers no completion callback, so every submission is
//! polled at a fixed interval until it reaches a terminal state or the
//! attempt budget runs out.

use std::time::Duration;

use crate::athena::QueryState;
use crate::service::{QueryHandle, QueryService, ServiceError, StartQuery};

/// Reason reported when a failed execution carries no state change reason.
pub const UNKNOWN_FAILURE_REASON: &str = "Unknown";

/// Polling cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Zero-interval variant for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts,
        }
    }
}

/// Terminal observation of a polled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled { reason: Option<String> },
    /// The execution was still QUEUED or RUNNING after the last allowed poll.
    TimedOut { attempts: u32 },
}

impl QueryOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Polls `handle` until terminal or until `max_attempts` checks have
/// been made. Performs at least one status check and never sleeps
/// after observing a terminal state.
pub async fn wait_for_completion(
    service: &dyn QueryService,
    handle: &QueryHandle,
    config: PollConfig,
) -> Result<QueryOutcome, ServiceError> {
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let status = service.execution_status(handle).await?;

        match status.state {
            QueryState::Succeeded => return Ok(QueryOutcome::Succeeded),
            QueryState::Failed => {
                return Ok(QueryOutcome::Failed {
                    reason: status
                        .reason
                        .unwrap_or_else(|| String::from(UNKNOWN_FAILURE_REASON)),
                });
            }
            QueryState::Cancelled => {
                return Ok(QueryOutcome::Cancelled {
                    reason: status.reason,
                });
            }
            QueryState::Queued | QueryState::Running => {
                if attempt < max_attempts {
                    tokio::time::sleep(config.interval).await;
                }
            }
        }
    }

    Ok(QueryOutcome::TimedOut {
        attempts: max_attempts,
    })
}

/// Submits a query and polls it to completion.
pub async fn run_to_completion(
    service: &dyn QueryService,
    request: StartQuery,
    config: PollConfig,
) -> Result<(QueryHandle, QueryOutcome), ServiceError> {
    let handle = service.start_query(request).await?;
    let outcome = wait_for_completion(service, &handle, config).await?;
    Ok((handle, outcome))
}
