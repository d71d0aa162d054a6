use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::cancel::CancellationToken;

/// Shortest pause between probes, so a zero interval never spins.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Result of a single probe of remote state.
#[derive(Debug)]
pub enum PollResult<T, E> {
    Ready(T),
    NotYet,
    Failed(E),
}

/// How a polling loop ended.
#[derive(Debug)]
pub enum Outcome<T, E> {
    Ready(T),
    TimedOut { elapsed: Duration, attempts: u32 },
    Failed(E),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    /// Doubles the interval after every attempt, never exceeding `max_interval`.
    Exponential { max_interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(interval: Duration, max_interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            backoff: Backoff::Exponential { max_interval },
        }
    }

    /// Delay before the next probe; `attempt` is 1 after the first probe.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max_interval } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.interval
                    .checked_mul(factor)
                    .unwrap_or(max_interval)
                    .min(max_interval)
            }
        };
        delay.max(MIN_DELAY)
    }
}

/// Bounded, cancellable polling primitive shared by every wait step.
#[derive(Clone, Default)]
pub struct ConvergencePoller {
    cancel: CancellationToken,
}

impl ConvergencePoller {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Invokes `check` until it reports Ready or Failed, the policy timeout
    /// elapses, or the cancellation token fires.
    pub fn poll_until<T, E, F>(&self, operation: &str, policy: &PollPolicy, mut check: F) -> Outcome<T, E>
    where
        F: FnMut() -> PollResult<T, E>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                debug!("[poll] {} cancelled before attempt {}", operation, attempt + 1);
                return Outcome::Cancelled;
            }

            attempt += 1;
            debug!("[poll] {} attempt {}", operation, attempt);

            match check() {
                PollResult::Ready(value) => {
                    debug!(
                        "[poll] {} ready after {}ms (attempt {})",
                        operation,
                        started.elapsed().as_millis(),
                        attempt
                    );
                    return Outcome::Ready(value);
                }
                PollResult::Failed(err) => {
                    warn!("[poll] {} failed on attempt {}", operation, attempt);
                    return Outcome::Failed(err);
                }
                PollResult::NotYet => {
                    let elapsed = started.elapsed();
                    if elapsed >= policy.timeout {
                        warn!(
                            "[poll] {} timed out after {}ms (attempt {})",
                            operation,
                            elapsed.as_millis(),
                            attempt
                        );
                        return Outcome::TimedOut {
                            elapsed,
                            attempts: attempt,
                        };
                    }

                    let remaining = policy.timeout.saturating_sub(elapsed);
                    let delay = policy.delay(attempt).min(remaining);
                    debug!(
                        "[poll] {} not ready, waiting {}ms ({}ms remaining)",
                        operation,
                        delay.as_millis(),
                        remaining.as_millis()
                    );
                    if self.cancel.wait_timeout(delay) {
                        debug!("[poll] {} cancelled while waiting", operation);
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }
}
