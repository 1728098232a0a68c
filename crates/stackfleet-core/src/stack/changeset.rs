//! Changeset diff protocol, shared by updates and dry-run diffs.
//!
//! A changeset is created, tracked until the control plane has computed it,
//! read, and deleted again. The stack policy comparison runs alongside so
//! callers learn about policy-only changes too.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::remote::{
    ChangeSetDescription, ChangeSetKind, ChangeSetRequest, RemoteError, ResourceChange,
    StackClient,
};
use crate::retry::{Benign, Cadence, Poll, Polled, STANDARD, Verdict, poll_until, retry_call};
use crate::template::PolicyDocument;

/// Outcome of a diff for one stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    #[default]
    Success,
    Failed,
    Unknown,
}

/// What a changeset reports for one stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetResult {
    #[serde(rename = "Status")]
    pub status: DiffStatus,

    #[serde(rename = "StatusReason", default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Resource changes in the order the control plane listed them.
    #[serde(rename = "Resources", default)]
    pub changes: Vec<ResourceChange>,

    #[serde(rename = "StackPolicyChange", default)]
    pub policy_changed: bool,

    /// The changeset listed nothing, yet the update must still be applied.
    #[serde(rename = "ForceStackUpdate", default)]
    pub force_update: bool,
}

impl ChangeSetResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: DiffStatus::Failed,
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: DiffStatus::Unknown,
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Applying the template would change something.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || self.force_update || self.policy_changed
    }

    /// Worth reporting in a diff: a change, or a diff that did not succeed.
    pub fn is_reportable(&self) -> bool {
        self.has_changes() || self.status != DiffStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetOutcome {
    Ready(ChangeSetResult),
    /// The stack has an operation in flight; the message is the remote one.
    Busy(String),
}

/// Deterministic changeset name for a run and stack.
pub fn change_set_name(run_uid: &str, stack: &str) -> String {
    format!("changeset-{}-{}", run_uid, stack)
}

fn reports_no_changes(reason: &str) -> bool {
    STANDARD.classify(&RemoteError::validation(reason)) == Verdict::Benign(Benign::NoChanges)
}

/// Run the changeset protocol for `request`.
///
/// The changeset is deleted afterwards whatever the outcome; a failed
/// cleanup is only logged.
pub fn run_change_set(
    stacks: &dyn StackClient,
    cadence: &Cadence,
    request: &ChangeSetRequest,
    desired_policy: &PolicyDocument,
) -> anyhow::Result<ChangeSetOutcome> {
    let stack = request.stack_name.as_str();

    let policy_changed = match request.kind {
        ChangeSetKind::Update => policy_differs(stacks, cadence, stack, desired_policy)?,
        ChangeSetKind::Create => false,
    };

    let created = retry_call(cadence.run(), stack, &STANDARD, || {
        stacks.create_change_set(request)
    })
    .with_context(|| format!("Failed to create changeset for stack {}", stack))?;

    match created {
        Polled::Ready(()) => {}
        Polled::Benign(Benign::StackBusy, error) => {
            return Ok(ChangeSetOutcome::Busy(error.message));
        }
        Polled::Benign(_, error) => {
            tracing::debug!("{}: {}", stack, error.message);
            return Ok(ChangeSetOutcome::Ready(ChangeSetResult {
                policy_changed,
                ..ChangeSetResult::default()
            }));
        }
    }

    let result = await_change_set(stacks, cadence, request).map(|mut result| {
        result.policy_changed = policy_changed;
        ChangeSetOutcome::Ready(result)
    });

    let cleanup = retry_call(cadence.run(), stack, &STANDARD, || {
        stacks.delete_change_set(stack, &request.change_set_name)
    });
    if let Err(e) = cleanup {
        tracing::warn!(
            "Failed to delete changeset {} of stack {}: {}",
            request.change_set_name,
            stack,
            e
        );
    }

    result
}

fn policy_differs(
    stacks: &dyn StackClient,
    cadence: &Cadence,
    stack: &str,
    desired: &PolicyDocument,
) -> anyhow::Result<bool> {
    if desired.is_trivial() {
        return Ok(false);
    }
    let applied = retry_call(cadence.run(), stack, &STANDARD, || {
        stacks.get_stack_policy(stack)
    })
    .with_context(|| format!("Failed to read stack policy of {}", stack))?
    .ready()
    .flatten()
    .unwrap_or_default();

    let applied = PolicyDocument::parse(&applied)
        .with_context(|| format!("Applied stack policy of {} is not valid JSON", stack))?;
    desired.differs_from(&applied)
}

fn await_change_set(
    stacks: &dyn StackClient,
    cadence: &Cadence,
    request: &ChangeSetRequest,
) -> anyhow::Result<ChangeSetResult> {
    let stack = request.stack_name.as_str();
    let described = poll_until(cadence.change_set(), stack, &STANDARD, || {
        let description = stacks.describe_change_set(stack, &request.change_set_name)?;
        Ok(match description.status.as_str() {
            "CREATE_COMPLETE" | "FAILED" => Poll::Ready(description),
            _ => Poll::Pending,
        })
    })
    .with_context(|| format!("Failed to describe changeset for stack {}", stack))?;

    let description = match described {
        Polled::Ready(description) => description,
        Polled::Benign(_, error) => {
            anyhow::bail!("Changeset for stack {} failed: {}", stack, error.message)
        }
    };
    interpret(stack, description)
}

fn interpret(stack: &str, description: ChangeSetDescription) -> anyhow::Result<ChangeSetResult> {
    let reason = description.reason.unwrap_or_default();
    if description.status == "FAILED" {
        if reports_no_changes(&reason) {
            return Ok(ChangeSetResult {
                reason,
                ..ChangeSetResult::default()
            });
        }
        anyhow::bail!("Changeset for stack {} failed: {}", stack, reason);
    }

    Ok(ChangeSetResult {
        force_update: description.changes.is_empty(),
        changes: description.changes,
        reason,
        ..ChangeSetResult::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::{
        Call, FakeCloud, Op, complete_change_set, pending_change_set, resource_change,
    };
    use crate::remote::TemplateSource;
    use std::time::Duration;

    fn cadence() -> Cadence {
        Cadence::uniform(Duration::from_millis(1)).with_deadline(Duration::from_secs(5))
    }

    fn request(stack: &str, kind: ChangeSetKind) -> ChangeSetRequest {
        ChangeSetRequest {
            stack_name: stack.to_string(),
            change_set_name: change_set_name("run-1", stack),
            kind,
            template: TemplateSource::Url("https://tpl".to_string()),
            parameters: Vec::new(),
            capabilities: Vec::new(),
            role_arn: None,
        }
    }

    fn ready(outcome: ChangeSetOutcome) -> ChangeSetResult {
        match outcome {
            ChangeSetOutcome::Ready(result) => result,
            ChangeSetOutcome::Busy(message) => panic!("unexpected busy: {message}"),
        }
    }

    #[test]
    fn name_is_namespaced_by_run() {
        assert_eq!(change_set_name("abc", "api"), "changeset-abc-api");
    }

    #[test]
    fn no_changes_reason_is_success_without_force() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("api", ChangeSetKind::Update),
                &PolicyDocument::default(),
            )
            .unwrap(),
        );
        assert_eq!(result.status, DiffStatus::Success);
        assert!(result.changes.is_empty());
        assert!(!result.force_update);
        assert!(!result.has_changes());
    }

    #[test]
    fn empty_complete_changeset_forces_update() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");
        cloud.script_change_set("api", vec![complete_change_set(Vec::new())]);

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("api", ChangeSetKind::Update),
                &PolicyDocument::default(),
            )
            .unwrap(),
        );
        assert!(result.force_update);
        assert!(result.changes.is_empty());
    }

    #[test]
    fn changes_keep_remote_order() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");
        cloud.script_change_set(
            "api",
            vec![
                pending_change_set(),
                complete_change_set(vec![
                    resource_change("Queue", "AWS::SQS::Queue", "Modify"),
                    resource_change("Bucket", "AWS::S3::Bucket", "Add"),
                ]),
            ],
        );

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("api", ChangeSetKind::Update),
                &PolicyDocument::default(),
            )
            .unwrap(),
        );
        let ids: Vec<_> = result.changes.iter().map(|c| c.logical_id.as_str()).collect();
        assert_eq!(ids, vec!["Queue", "Bucket"]);
        assert!(!result.force_update);
    }

    #[test]
    fn other_failures_are_fatal_and_still_cleaned_up() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");
        cloud.script_change_set(
            "api",
            vec![ChangeSetDescription {
                status: "FAILED".to_string(),
                reason: Some("Template format error".to_string()),
                changes: Vec::new(),
            }],
        );

        let err = run_change_set(
            &cloud,
            &cadence(),
            &request("api", ChangeSetKind::Update),
            &PolicyDocument::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Template format error"));
        assert_eq!(
            cloud.count(|call| matches!(call, Call::DeleteChangeSet { .. })),
            1
        );
    }

    #[test]
    fn busy_stack_is_reported_without_error() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_IN_PROGRESS");
        cloud.fail(
            Op::CreateChangeSet,
            RemoteError::validation(
                "Stack:arn:aws:cloudformation:stack/api is in UPDATE_IN_PROGRESS state and can not be updated.",
            ),
        );

        let outcome = run_change_set(
            &cloud,
            &cadence(),
            &request("api", ChangeSetKind::Update),
            &PolicyDocument::default(),
        )
        .unwrap();
        assert!(matches!(outcome, ChangeSetOutcome::Busy(_)));
        assert_eq!(
            cloud.count(|call| matches!(call, Call::DeleteChangeSet { .. })),
            0
        );
    }

    #[test]
    fn policy_change_is_detected_for_updates() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("api", ChangeSetKind::Update),
                &PolicyDocument::allow_all_updates(),
            )
            .unwrap(),
        );
        assert!(result.policy_changed);
        assert!(result.has_changes());
    }

    #[test]
    fn applied_policy_equal_to_desired_is_no_change() {
        let cloud = FakeCloud::new();
        cloud.seed_stack("api", "UPDATE_COMPLETE");
        let desired = PolicyDocument::allow_all_updates();
        cloud.seed_policy("api", &desired.to_json().unwrap());

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("api", ChangeSetKind::Update),
                &desired,
            )
            .unwrap(),
        );
        assert!(!result.policy_changed);
    }

    #[test]
    fn create_changesets_skip_the_policy_lookup() {
        let cloud = FakeCloud::new();
        cloud.script_change_set(
            "fresh",
            vec![complete_change_set(vec![resource_change(
                "Table",
                "AWS::DynamoDB::Table",
                "Add",
            )])],
        );

        let result = ready(
            run_change_set(
                &cloud,
                &cadence(),
                &request("fresh", ChangeSetKind::Create),
                &PolicyDocument::allow_all_updates(),
            )
            .unwrap(),
        );
        assert_eq!(result.changes.len(), 1);
        assert_eq!(
            cloud.count(|call| matches!(call, Call::GetStackPolicy(_))),
            0
        );
    }

    #[test]
    fn reportable_results() {
        assert!(!ChangeSetResult::default().is_reportable());
        assert!(ChangeSetResult::failed("boom").is_reportable());
        assert!(ChangeSetResult::unknown("busy").is_reportable());
    }
}
