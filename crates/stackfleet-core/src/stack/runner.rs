//! Drives stack jobs through the deploy, delete and diff flows.

use anyhow::Context;

use super::changeset::{ChangeSetOutcome, ChangeSetResult, change_set_name, run_change_set};
use super::status::{Operation, ROLLBACK_COMPLETE, track};
use super::upload::{PreparedTemplate, Uploader};
use super::{StackJob, StackOutcome, progress};
use crate::remote::{
    Capability, ChangeSetKind, ChangeSetRequest, Parameter, RegionSession, StackClient,
    StackRequest, TemplateSource,
};
use crate::retry::{Benign, Cadence, Polled, STANDARD, TRACKING, retry_call};
use crate::template::PolicyDocument;
use crate::values::ValuesStore;

/// Status of a stack that only exists to hold a never executed changeset.
const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// Everything needed to create or update one stack.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
    pub policy: PolicyDocument,
    pub role_arn: Option<String>,
    pub change_set_name: String,
    pub quiet: bool,
}

impl Target {
    fn change_set_request(&self, kind: ChangeSetKind) -> ChangeSetRequest {
        ChangeSetRequest {
            stack_name: self.name.clone(),
            change_set_name: self.change_set_name.clone(),
            kind,
            template: self.template.clone(),
            parameters: self.parameters.clone(),
            capabilities: self.capabilities.clone(),
            role_arn: self.role_arn.clone(),
        }
    }

    fn stack_request(&self, stack_policy: Option<String>) -> StackRequest {
        StackRequest {
            stack_name: self.name.clone(),
            template: self.template.clone(),
            parameters: self.parameters.clone(),
            capabilities: self.capabilities.clone(),
            stack_policy,
            role_arn: self.role_arn.clone(),
        }
    }
}

/// Capabilities acknowledged for a template.
pub fn capabilities(serverless: bool) -> Vec<Capability> {
    let mut capabilities = vec![Capability::NamedIam];
    if serverless {
        capabilities.push(Capability::AutoExpand);
    }
    capabilities
}

/// Runs stack jobs of one region against its session.
pub struct StackRunner<'a> {
    session: &'a RegionSession,
    values: &'a ValuesStore,
    cadence: Cadence,
    bootstrap_stack: &'a str,
}

impl<'a> StackRunner<'a> {
    pub fn new(
        session: &'a RegionSession,
        values: &'a ValuesStore,
        cadence: Cadence,
        bootstrap_stack: &'a str,
    ) -> Self {
        Self {
            session,
            values,
            cadence,
            bootstrap_stack,
        }
    }

    fn stacks(&self) -> &dyn StackClient {
        self.session.stacks.as_ref()
    }

    /// Bring a stack to its desired action: create, update, or delete.
    pub fn deploy(&self, job: &StackJob<'_>) -> anyhow::Result<StackOutcome> {
        if job.spec.action.is_delete() {
            self.prepare(job)?;
            let status = self.lookup(job.name())?;
            return self.delete_existing(job, status);
        }

        let parameters = self.resolve_parameters(job)?;
        let prepared = self.prepare(job)?;
        let status = self.lookup(job.name())?;

        let target = self.target(job, &prepared, parameters);
        match status {
            Some(status) => self.update(&target, &status),
            None => self.create(&target),
        }
    }

    /// Delete a stack without touching its template.
    pub fn delete(&self, job: &StackJob<'_>) -> anyhow::Result<StackOutcome> {
        let status = self.lookup(job.name())?;
        self.delete_existing(job, status)
    }

    /// Preview what deploying the stack would change.
    pub fn diff(&self, job: &StackJob<'_>) -> anyhow::Result<ChangeSetResult> {
        let parameters = self.resolve_parameters(job)?;
        let prepared = self.prepare(job)?;
        let kind = if self.exists(job.name())? {
            ChangeSetKind::Update
        } else {
            ChangeSetKind::Create
        };

        let target = self.target(job, &prepared, parameters);
        let request = target.change_set_request(kind);
        match run_change_set(self.stacks(), &self.cadence, &request, &target.policy)? {
            ChangeSetOutcome::Ready(result) => Ok(result),
            ChangeSetOutcome::Busy(message) => {
                tracing::warn!("{}: {}", job.name(), message);
                Ok(ChangeSetResult::unknown(message))
            }
        }
    }

    /// Create the target stack, or update it when it already exists.
    pub fn converge(&self, target: &Target) -> anyhow::Result<StackOutcome> {
        match self.lookup(&target.name)? {
            Some(status) => self.update(target, &status),
            None => self.create(target),
        }
    }

    /// Whether the stack exists. A stack held in review by an unexecuted
    /// changeset does not count.
    pub fn exists(&self, stack: &str) -> anyhow::Result<bool> {
        Ok(self.lookup(stack)?.is_some())
    }

    /// Current status of an existing stack, `None` when it does not exist or
    /// is held in review.
    fn lookup(&self, stack: &str) -> anyhow::Result<Option<String>> {
        let polled = retry_call(self.cadence.run(), stack, &TRACKING, || {
            self.stacks().describe_stack(stack)
        })
        .with_context(|| format!("Failed to look up stack {}", stack))?;

        match polled {
            Polled::Ready(Some(state)) if state.status != REVIEW_IN_PROGRESS => {
                Ok(Some(state.status))
            }
            Polled::Ready(_) | Polled::Benign(Benign::Absent, _) => Ok(None),
            Polled::Benign(_, error) => {
                anyhow::bail!("Failed to look up stack {}: {}", stack, error.message)
            }
        }
    }

    fn resolve_parameters(&self, job: &StackJob<'_>) -> anyhow::Result<Vec<Parameter>> {
        self.values
            .resolve_parameters(&job.ctx.region, job.name(), &job.spec.parameters)
    }

    fn prepare(&self, job: &StackJob<'_>) -> anyhow::Result<PreparedTemplate> {
        let uploader = Uploader {
            session: self.session,
            cadence: &self.cadence,
            bootstrap_stack: self.bootstrap_stack,
        };
        let prepared = uploader.prepare(job.spec, &job.ctx)?;

        let validated = retry_call(self.cadence.run(), job.name(), &STANDARD, || {
            self.stacks().validate_template(&prepared.url)
        })
        .with_context(|| format!("Template validation failed for stack {}", job.name()))?;
        settle(validated, || {
            format!("Template validation failed for stack {}", job.name())
        })?;

        Ok(prepared)
    }

    fn target(
        &self,
        job: &StackJob<'_>,
        prepared: &PreparedTemplate,
        parameters: Vec<Parameter>,
    ) -> Target {
        Target {
            name: job.name().to_string(),
            template: TemplateSource::Url(prepared.url.clone()),
            parameters,
            capabilities: capabilities(prepared.serverless),
            policy: job.spec.stack_policy.clone(),
            role_arn: job.role_arn().map(str::to_string),
            change_set_name: change_set_name(&job.ctx.run_uid, job.name()),
            quiet: job.ctx.quiet,
        }
    }

    fn create(&self, target: &Target) -> anyhow::Result<StackOutcome> {
        let name = target.name.as_str();
        progress(
            target.quiet,
            format_args!("Stack {} doesn't exist, creating a new one", name),
        );

        let policy = if target.policy.is_trivial() {
            None
        } else {
            Some(target.policy.to_json()?)
        };
        let request = target.stack_request(policy);
        let submitted = retry_call(self.cadence.submit(), name, &STANDARD, || {
            self.stacks().create_stack(&request)
        })
        .with_context(|| format!("Failed to create stack {}", name))?;
        settle(submitted, || format!("Failed to create stack {}", name))?;

        match track(
            self.stacks(),
            self.cadence.stack_status(),
            name,
            Operation::Create,
            None,
            target.quiet,
        ) {
            Ok(()) => {
                progress(target.quiet, format_args!("Stack {} create complete", name));
                Ok(StackOutcome::Created)
            }
            Err(error) if error.final_status() == Some(ROLLBACK_COMPLETE) => {
                tracing::warn!("Stack {} rolled back, deleting it", name);
                if let Err(cleanup) = self.remove(
                    name,
                    target.role_arn.as_deref(),
                    ROLLBACK_COMPLETE,
                    target.quiet,
                ) {
                    tracing::warn!(
                        "Failed to delete rolled back stack {}: {:#}",
                        name,
                        cleanup
                    );
                }
                Err(anyhow::Error::new(error).context(format!("Failed to create stack {}", name)))
            }
            Err(error) => Err(error).with_context(|| format!("Failed to create stack {}", name)),
        }
    }

    fn update(&self, target: &Target, status: &str) -> anyhow::Result<StackOutcome> {
        let name = target.name.as_str();
        progress(
            target.quiet,
            format_args!("Stack {} exists, checking for updates", name),
        );

        let request = target.change_set_request(ChangeSetKind::Update);
        let changes =
            match run_change_set(self.stacks(), &self.cadence, &request, &target.policy)? {
                ChangeSetOutcome::Ready(result) => result,
                ChangeSetOutcome::Busy(message) => {
                    tracing::warn!("{}: {}", name, message);
                    return Ok(StackOutcome::Busy(message));
                }
            };

        if changes.policy_changed {
            progress(
                target.quiet,
                format_args!("Stack policy of {} changed, updating it first", name),
            );
            let body = target.policy.to_json()?;
            let pushed = retry_call(self.cadence.submit(), name, &STANDARD, || {
                self.stacks().set_stack_policy(name, &body)
            })
            .with_context(|| format!("Failed to set stack policy of {}", name))?;
            settle(pushed, || format!("Failed to set stack policy of {}", name))?;
        }

        if changes.changes.is_empty() && !changes.force_update {
            progress(
                target.quiet,
                format_args!("No resource changes detected for stack {}, skipping update", name),
            );
            return Ok(if changes.policy_changed {
                StackOutcome::PolicyUpdated
            } else {
                StackOutcome::Unchanged
            });
        }

        progress(
            target.quiet,
            format_args!(
                "{} resource change(s) detected for stack {}, updating",
                changes.changes.len(),
                name
            ),
        );
        let request = target.stack_request(None);
        let submitted = retry_call(self.cadence.submit(), name, &STANDARD, || {
            self.stacks().update_stack(&request)
        })
        .with_context(|| format!("Failed to update stack {}", name))?;
        match submitted {
            Polled::Ready(()) => {}
            Polled::Benign(Benign::NoChanges, _) => return Ok(StackOutcome::Unchanged),
            Polled::Benign(Benign::StackBusy, error) => {
                tracing::warn!("{}: {}", name, error.message);
                return Ok(StackOutcome::Busy(error.message));
            }
            Polled::Benign(Benign::Absent, error) => {
                anyhow::bail!("Failed to update stack {}: {}", name, error.message)
            }
        }

        track(
            self.stacks(),
            self.cadence.stack_status(),
            name,
            Operation::Update,
            Some(status),
            target.quiet,
        )
        .with_context(|| format!("Failed to update stack {}", name))?;
        progress(target.quiet, format_args!("Stack {} update complete", name));
        Ok(StackOutcome::Updated)
    }

    fn delete_existing(
        &self,
        job: &StackJob<'_>,
        status: Option<String>,
    ) -> anyhow::Result<StackOutcome> {
        let Some(status) = status else {
            tracing::info!(
                "Stack {} does not exist in region {}",
                job.name(),
                job.ctx.region
            );
            return Ok(StackOutcome::AlreadyAbsent);
        };
        self.remove(job.name(), job.role_arn(), &status, job.ctx.quiet)
    }

    fn remove(
        &self,
        name: &str,
        role_arn: Option<&str>,
        status: &str,
        quiet: bool,
    ) -> anyhow::Result<StackOutcome> {
        let submitted = retry_call(self.cadence.submit(), name, &STANDARD, || {
            self.stacks().delete_stack(name, role_arn)
        })
        .with_context(|| format!("Failed to delete stack {}", name))?;
        settle(submitted, || format!("Failed to delete stack {}", name))?;

        track(
            self.stacks(),
            self.cadence.stack_status(),
            name,
            Operation::Delete,
            Some(status),
            quiet,
        )
        .with_context(|| format!("Failed to delete stack {}", name))?;
        progress(quiet, format_args!("Stack {} delete complete", name));
        Ok(StackOutcome::Deleted)
    }
}

/// A benign outcome where a plain success was required is an error.
fn settle<T>(polled: Polled<T>, context: impl FnOnce() -> String) -> anyhow::Result<T> {
    match polled {
        Polled::Ready(value) => Ok(value),
        Polled::Benign(_, error) => anyhow::bail!("{}: {}", context(), error.message),
    }
}
