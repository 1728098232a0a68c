//! Stack status tracking after a create, update or delete was submitted.

use thiserror::Error;

use crate::remote::StackClient;
use crate::retry::{Benign, Poll, PollConfig, PollError, Polled, TRACKING, poll_until};

pub const ROLLBACK_COMPLETE: &str = "ROLLBACK_COMPLETE";

/// Reads of the pre-submit status that are ignored before it is taken as final.
const STALE_READS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn complete_status(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE_COMPLETE",
            Operation::Update => "UPDATE_COMPLETE",
            Operation::Delete => "DELETE_COMPLETE",
        }
    }

    /// Terminal statuses that mean this operation did not go through.
    fn failed_statuses(&self) -> &'static [&'static str] {
        match self {
            Operation::Create => &[ROLLBACK_COMPLETE, "ROLLBACK_FAILED", "CREATE_FAILED"],
            Operation::Update => &[
                "UPDATE_ROLLBACK_COMPLETE",
                "UPDATE_ROLLBACK_FAILED",
                "UPDATE_FAILED",
            ],
            Operation::Delete => &["DELETE_FAILED"],
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Stack {stack} ended in {status}: {reason}")]
    Failed {
        stack: String,
        status: String,
        reason: String,
    },

    #[error("Stack {stack} disappeared during {operation}")]
    Vanished { stack: String, operation: &'static str },

    #[error(transparent)]
    Poll(#[from] PollError),
}

impl TrackError {
    /// Final remote status, when tracking ended on a failed status.
    pub fn final_status(&self) -> Option<&str> {
        match self {
            TrackError::Failed { status, .. } => Some(status),
            _ => None,
        }
    }
}

enum Phase {
    Pending,
    Complete,
    Failed,
}

fn phase(status: &str, operation: Operation) -> Phase {
    if status == operation.complete_status() {
        Phase::Complete
    } else if operation.failed_statuses().contains(&status) {
        Phase::Failed
    } else {
        Phase::Pending
    }
}

fn gone(stack: &str, operation: Operation) -> Result<(), TrackError> {
    match operation {
        Operation::Delete => Ok(()),
        _ => Err(TrackError::Vanished {
            stack: stack.to_string(),
            operation: operation.as_str(),
        }),
    }
}

/// Poll a stack until `operation` completes, fails, or the deadline passes.
///
/// Each status change is logged once. A reason reported while the stack
/// rolls back is kept and preferred over the terminal status's own reason.
///
/// `before` is the status read before the operation was submitted. Until the
/// stack reports a different status, up to [`STALE_READS`] reads of it are
/// treated as pending.
pub fn track(
    stacks: &dyn StackClient,
    config: PollConfig,
    stack: &str,
    operation: Operation,
    before: Option<&str>,
    quiet: bool,
) -> Result<(), TrackError> {
    let mut last_status: Option<String> = None;
    let mut rollback_reason: Option<String> = None;
    let mut moved = before.is_none();
    let mut stale_reads = 0;

    let polled = poll_until(config, stack, &TRACKING, || {
        let Some(state) = stacks.describe_stack(stack)? else {
            return Ok(Poll::Ready(gone(stack, operation)));
        };

        if last_status.as_deref() != Some(state.status.as_str()) {
            if quiet {
                tracing::debug!("{}: {}", stack, state.status);
            } else {
                tracing::info!("{}: {}", stack, state.status);
            }
            last_status = Some(state.status.clone());
        }

        if !moved {
            if before == Some(state.status.as_str()) && stale_reads < STALE_READS {
                stale_reads += 1;
                return Ok(Poll::Pending);
            }
            moved = true;
        }

        Ok(match phase(&state.status, operation) {
            Phase::Pending => {
                if state.status.ends_with("ROLLBACK_IN_PROGRESS")
                    && let Some(reason) = &state.reason
                {
                    rollback_reason = Some(reason.clone());
                }
                Poll::Pending
            }
            Phase::Complete => Poll::Ready(Ok(())),
            Phase::Failed => Poll::Ready(Err(TrackError::Failed {
                stack: stack.to_string(),
                reason: rollback_reason
                    .clone()
                    .or(state.reason)
                    .unwrap_or_else(|| "no reason reported".to_string()),
                status: state.status,
            })),
        })
    })?;

    match polled {
        Polled::Ready(result) => result,
        Polled::Benign(Benign::Absent, _) => gone(stack, operation),
        Polled::Benign(_, error) => Err(TrackError::Poll(PollError::Remote {
            label: stack.to_string(),
            error,
        })),
    }
}
