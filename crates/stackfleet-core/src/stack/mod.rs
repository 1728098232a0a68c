//! Per-stack state machine.
//!
//! A stack job is driven through upload, validation and the existence
//! check, then created, updated through the changeset protocol, or deleted,
//! and finally tracked until the control plane settles.

pub mod changeset;
pub mod runner;
pub mod status;
pub mod upload;

use std::fmt;
use std::path::PathBuf;

use crate::manifest::StackSpec;

pub use changeset::{ChangeSetOutcome, ChangeSetResult, DiffStatus, change_set_name};
pub use runner::{StackRunner, Target};
pub use status::{Operation, TrackError};
pub use upload::PreparedTemplate;

/// Run-scoped values a region worker hands to one stack job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackContext {
    pub region: String,
    pub run_uid: String,
    /// Templates bucket of the region.
    pub bucket: String,
    /// Position of the stack in its region, used to order results.
    pub order: usize,
    /// Directory relative template paths are resolved against.
    pub template_root: PathBuf,
    /// Run-wide service role, used when the stack names none.
    pub role_arn: Option<String>,
    /// Log progress at debug level, for stacks running side by side.
    pub quiet: bool,
}

/// One unit of work for a stack worker.
#[derive(Debug, Clone)]
pub struct StackJob<'a> {
    pub spec: &'a StackSpec,
    pub ctx: StackContext,
}

impl StackJob<'_> {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Service role of the stack, falling back to the run-wide one.
    pub fn role_arn(&self) -> Option<&str> {
        self.spec
            .role_arn
            .as_deref()
            .or(self.ctx.role_arn.as_deref())
    }
}

/// How a stack job ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOutcome {
    Created,
    Updated,
    /// Only the stack policy was pushed; resources were already current.
    PolicyUpdated,
    Unchanged,
    /// Another operation was in flight, nothing was submitted.
    Busy(String),
    Deleted,
    AlreadyAbsent,
}

impl fmt::Display for StackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackOutcome::Created => write!(f, "created"),
            StackOutcome::Updated => write!(f, "updated"),
            StackOutcome::PolicyUpdated => write!(f, "stack policy updated"),
            StackOutcome::Unchanged => write!(f, "no changes"),
            StackOutcome::Busy(message) => write!(f, "skipped: {}", message),
            StackOutcome::Deleted => write!(f, "deleted"),
            StackOutcome::AlreadyAbsent => write!(f, "not present"),
        }
    }
}

/// Progress line: info for a stack running alone, debug when quiet.
pub(crate) fn progress(quiet: bool, message: fmt::Arguments<'_>) {
    if quiet {
        tracing::debug!("{}", message);
    } else {
        tracing::info!("{}", message);
    }
}
