//! Bounded-duration polling of remote calls.
//!
//! [`poll_until`] drives one remote operation until it reports a result, the
//! error table says the outcome is terminal, or the deadline passes. Every
//! remote call of the engine goes through it with a [`PollConfig`] taken
//! from the run's [`Cadence`].

pub mod classify;

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::remote::RemoteError;

pub use classify::{Benign, ErrorTable, Rule, STANDARD, TRACKING, Verdict};

/// Wall-clock ceiling of a single polling loop.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval and deadline of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

/// Polling intervals per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Stack status tracking after create, update or delete.
    pub stack_status: Duration,
    /// Lookups and other single calls of the state machine.
    pub run: Duration,
    /// Submitting create, update or delete.
    pub submit: Duration,
    /// Changeset creation tracking.
    pub change_set: Duration,
    pub deadline: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            stack_status: Duration::from_secs(5),
            run: Duration::from_secs(10),
            submit: Duration::from_secs(15),
            change_set: Duration::from_secs(30),
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl Cadence {
    /// Same interval at every call site.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            stack_status: interval,
            run: interval,
            submit: interval,
            change_set: interval,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn stack_status(&self) -> PollConfig {
        self.config(self.stack_status)
    }

    pub fn run(&self) -> PollConfig {
        self.config(self.run)
    }

    pub fn submit(&self) -> PollConfig {
        self.config(self.submit)
    }

    pub fn change_set(&self) -> PollConfig {
        self.config(self.change_set)
    }

    fn config(&self, interval: Duration) -> PollConfig {
        PollConfig {
            interval,
            deadline: self.deadline,
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Terminal outcome of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    /// The remote reported an error the table maps to an expected outcome.
    Benign(Benign, RemoteError),
}

impl<T> Polled<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Polled::Ready(value) => Some(value),
            Polled::Benign(..) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{label}: {error}")]
    Remote { label: String, error: RemoteError },

    #[error("{label}: remote API calls exceeded time budget")]
    DeadlineExceeded { label: String },
}

impl PollError {
    /// The remote error, if the loop ended on one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            PollError::Remote { error, .. } => Some(error),
            PollError::DeadlineExceeded { .. } => None,
        }
    }
}

/// Invoke `op` until it is ready, a terminal error occurs or the deadline
/// elapses. The first attempt is immediate.
pub fn poll_until<T>(
    config: PollConfig,
    label: &str,
    table: &ErrorTable,
    mut op: impl FnMut() -> Result<Poll<T>, RemoteError>,
) -> Result<Polled<T>, PollError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op() {
            Ok(Poll::Ready(value)) => return Ok(Polled::Ready(value)),
            Ok(Poll::Pending) => {}
            Err(error) => match table.classify(&error) {
                Verdict::Retry => {
                    tracing::warn!(
                        "{}: retrying after {} (attempt {})",
                        label,
                        error,
                        attempt
                    );
                }
                Verdict::Benign(kind) => {
                    tracing::debug!("{}: {:?} ({})", label, kind, error.message);
                    return Ok(Polled::Benign(kind, error));
                }
                Verdict::Fatal => {
                    return Err(PollError::Remote {
                        label: label.to_string(),
                        error,
                    });
                }
            },
        }

        let elapsed = started.elapsed();
        if elapsed >= config.deadline {
            return Err(PollError::DeadlineExceeded {
                label: label.to_string(),
            });
        }
        std::thread::sleep(config.interval.min(config.deadline - elapsed));
    }
}

/// Retry a single remote call under the same rules as [`poll_until`].
pub fn retry_call<T>(
    config: PollConfig,
    label: &str,
    table: &ErrorTable,
    mut op: impl FnMut() -> Result<T, RemoteError>,
) -> Result<Polled<T>, PollError> {
    poll_until(config, label, table, || op().map(Poll::Ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            deadline: Duration::from_secs(5),
        }
    }

    #[test]
    fn default_cadence_matches_call_sites() {
        let cadence = Cadence::default();
        assert_eq!(cadence.stack_status().interval, Duration::from_secs(5));
        assert_eq!(cadence.run().interval, Duration::from_secs(10));
        assert_eq!(cadence.submit().interval, Duration::from_secs(15));
        assert_eq!(cadence.change_set().interval, Duration::from_secs(30));
        assert_eq!(cadence.run().deadline, DEFAULT_DEADLINE);
    }

    #[test]
    fn first_attempt_is_immediate() {
        let config = PollConfig {
            interval: Duration::from_secs(60),
            deadline: DEFAULT_DEADLINE,
        };
        let started = Instant::now();
        let result = poll_until(config, "api", &STANDARD, || Ok(Poll::Ready(7)));
        assert_eq!(result.unwrap(), Polled::Ready(7));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn transient_errors_are_retried_until_ready() {
        let mut attempts = 0;
        let result = poll_until(fast(), "api", &STANDARD, || {
            attempts += 1;
            match attempts {
                1 => Err(RemoteError::throttling()),
                2 => Err(RemoteError::request("connection reset")),
                3 => Ok(Poll::Pending),
                _ => Ok(Poll::Ready("done")),
            }
        });
        assert_eq!(result.unwrap(), Polled::Ready("done"));
        assert_eq!(attempts, 4);
    }

    #[test]
    fn benign_errors_end_the_loop() {
        let result: Result<Polled<()>, _> = retry_call(fast(), "api", &TRACKING, || {
            Err(RemoteError::validation("Stack with id api does not exist"))
        });
        match result.unwrap() {
            Polled::Benign(Benign::Absent, error) => {
                assert!(error.message.contains("does not exist"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn fatal_errors_keep_code_and_message() {
        let result: Result<Polled<()>, _> = retry_call(fast(), "api", &STANDARD, || {
            Err(RemoteError::new("AccessDenied", "not authorized"))
        });
        let error = result.unwrap_err();
        assert_eq!(error.to_string(), "api: AccessDenied: not authorized");
        assert_eq!(error.remote().map(|e| e.code.as_str()), Some("AccessDenied"));
    }

    #[test]
    fn deadline_stops_pending_loop() {
        let config = PollConfig {
            interval: Duration::from_millis(2),
            deadline: Duration::from_millis(20),
        };
        let mut attempts = 0;
        let result: Result<Polled<()>, _> = poll_until(config, "api", &STANDARD, || {
            attempts += 1;
            Ok(Poll::Pending)
        });
        let error = result.unwrap_err();
        assert!(matches!(error, PollError::DeadlineExceeded { .. }));
        assert!(error.to_string().contains("remote API calls exceeded time budget"));
        assert!(attempts > 1);
    }
}
