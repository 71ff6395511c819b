use std::future::Future;
use std::time::{Duration, Instant};

use shared::{OrchestratorError, OrchestratorResult};
use tracing::debug;

/// How a bounded poll ended
#[derive(Debug)]
pub enum PollOutcome<T> {
    ReachedTarget(T),
    TimedOut {
        last_observed: Option<T>,
        attempts: u32,
        elapsed: Duration,
    },
    /// The probe itself failed; polling stops at the first error
    TransportFailed(OrchestratorError),
}

impl<T: std::fmt::Debug> PollOutcome<T> {
    pub fn is_reached(&self) -> bool {
        matches!(self, PollOutcome::ReachedTarget(_))
    }

    /// Collapse into a result. Timeouts become `OrchestratorError::Timeout`
    /// naming `waiting_for`.
    pub fn into_result(self, waiting_for: &str) -> OrchestratorResult<T> {
        match self {
            PollOutcome::ReachedTarget(value) => Ok(value),
            PollOutcome::TimedOut {
                last_observed,
                attempts,
                elapsed,
            } => Err(OrchestratorError::Timeout(format!(
                "timed out after {:?} ({} attempts) waiting for {}, last observed {:?}",
                elapsed, attempts, waiting_for, last_observed
            ))),
            PollOutcome::TransportFailed(e) => Err(e),
        }
    }
}

/// Probe, check, sleep, until the target is seen or the deadline passes
#[derive(Debug, Clone, Copy)]
pub struct BoundedPoll {
    pub interval: Duration,
    pub deadline: Duration,
}

impl BoundedPoll {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub async fn run<T, F, Fut, P>(&self, mut probe: F, is_target: P) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
        T: std::fmt::Debug,
        P: Fn(&T) -> bool,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_observed = None;

        loop {
            attempts += 1;
            match probe().await {
                Ok(value) if is_target(&value) => return PollOutcome::ReachedTarget(value),
                Ok(value) => {
                    debug!(attempt = attempts, "Poll target not reached yet: {:?}", value);
                    last_observed = Some(value);
                }
                Err(e) => return PollOutcome::TransportFailed(e),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                return PollOutcome::TimedOut {
                    last_observed,
                    attempts,
                    elapsed,
                };
            }

            tokio::time::sleep(self.interval.min(self.deadline - elapsed)).await;
        }
    }
}
