//! Status polling until a job reaches `COMPLETED` or `ERROR`.
//!
//! Each iteration issues exactly one status query and looks at nothing but
//! the status tag. Non-terminal tags put the loop to sleep according to the
//! [`PollPolicy`]; a failed query ends the loop with that error.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::{BackoffMode, PollingConfig};
use crate::transport::JobTransport;
use crate::types::{JobError, JobHandle, JobResult, JobStatus};

/// Default delay between two status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Multiply the delay by `factor` after every pending answer, up to `max_interval`.
    Exponential { factor: u32, max_interval: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
    /// Overall deadline; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::Fixed,
            timeout: None,
        }
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        let backoff = match config.backoff {
            BackoffMode::Fixed => Backoff::Fixed,
            BackoffMode::Exponential => Backoff::Exponential {
                factor: 2,
                max_interval: Duration::from_secs(config.max_interval_secs),
            },
        };

        Self {
            interval: Duration::from_secs(config.interval_secs),
            backoff,
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl PollPolicy {
    /// Delay to wait after the `attempt`-th pending answer (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max_interval } => self
                .interval
                .saturating_mul(factor.saturating_pow(attempt))
                .min(max_interval),
        }
    }
}

/// Query `handle` until the server reports a terminal state.
///
/// Returns only `JobStatus::Completed` or `JobStatus::Error`. With a timeout,
/// the last sleep is shortened to end on the deadline and one final query is
/// made there before giving up with `PollTimedOut`.
pub async fn poll_until_terminal(
    transport: &dyn JobTransport,
    handle: &JobHandle,
    policy: &PollPolicy,
) -> JobResult<JobStatus> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let status = transport.get_status(handle).await?;
        if status.is_terminal() {
            info!("Job {} reached {} after {} queries", handle, status, attempt + 1);
            return Ok(status);
        }

        let mut delay = policy.delay(attempt);
        if let Some(timeout) = policy.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(JobError::PollTimedOut {
                    handle: handle.clone(),
                    waited_secs: elapsed.as_secs(),
                });
            }
            delay = delay.min(timeout - elapsed);
        }

        debug!("Job {} is {}, next query in {:?}", handle, status, delay);
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
