//! In-memory control plane for tests.
//!
//! `FakeCloud` implements [`StackClient`] and [`ArtifactStore`] over a small
//! scripted state model and records every call, so tests can assert on the
//! exact sequence of remote operations the engine performed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::client::{
    ArtifactStore, Backend, ChangeSetDescription, ChangeSetKind, ChangeSetRequest, RegionSession,
    ResourceChange, StackClient, StackRequest, StackState,
};
use super::error::{CHANGE_SET_NOT_FOUND, RemoteError, RemoteResult};

pub const TEMPLATES_BUCKET: &str = "templates-bucket";
pub const SOURCE_BUCKET: &str = "source-bucket";

/// Reason reported by a changeset that found nothing to change.
pub const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes. Submit different information to create a change set.";

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeStack(String),
    ValidateTemplate(String),
    CreateChangeSet {
        stack: String,
        name: String,
        kind: ChangeSetKind,
    },
    DescribeChangeSet(String),
    DeleteChangeSet {
        stack: String,
        name: String,
    },
    CreateStack(String),
    UpdateStack(String),
    DeleteStack(String),
    GetStackPolicy(String),
    SetStackPolicy {
        stack: String,
        policy: String,
    },
    PhysicalResourceId {
        stack: String,
        logical_id: String,
    },
    Upload {
        bucket: String,
        key: String,
    },
}

/// Operations that can have errors injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    DescribeStack,
    ValidateTemplate,
    CreateChangeSet,
    DescribeChangeSet,
    DeleteChangeSet,
    CreateStack,
    UpdateStack,
    DeleteStack,
    GetStackPolicy,
    SetStackPolicy,
    PhysicalResourceId,
    Upload,
}

/// One observation of a stack's lifecycle, consumed per `describe_stack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Status(String, Option<String>),
    Gone,
}

impl Step {
    pub fn status(status: &str) -> Self {
        Step::Status(status.to_string(), None)
    }

    pub fn with_reason(status: &str, reason: &str) -> Self {
        Step::Status(status.to_string(), Some(reason.to_string()))
    }
}

/// Changeset description reporting that nothing changed.
pub fn no_change_set() -> ChangeSetDescription {
    ChangeSetDescription {
        status: "FAILED".to_string(),
        reason: Some(NO_CHANGES_REASON.to_string()),
        changes: Vec::new(),
    }
}

/// Completed changeset listing the given changes.
pub fn complete_change_set(changes: Vec<ResourceChange>) -> ChangeSetDescription {
    ChangeSetDescription {
        status: "CREATE_COMPLETE".to_string(),
        reason: None,
        changes,
    }
}

pub fn pending_change_set() -> ChangeSetDescription {
    ChangeSetDescription {
        status: "CREATE_IN_PROGRESS".to_string(),
        reason: None,
        changes: Vec::new(),
    }
}

pub fn resource_change(logical_id: &str, resource_type: &str, action: &str) -> ResourceChange {
    ResourceChange {
        logical_id: logical_id.to_string(),
        resource_type: resource_type.to_string(),
        action: action.to_string(),
        replacement: String::new(),
    }
}

#[derive(Debug)]
struct FakeStack {
    status: String,
    reason: Option<String>,
    timeline: VecDeque<Step>,
    policy: Option<String>,
    resources: HashMap<String, String>,
}

impl FakeStack {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            reason: None,
            timeline: VecDeque::new(),
            policy: None,
            resources: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    stacks: HashMap<String, FakeStack>,
    create_scripts: HashMap<String, Vec<Step>>,
    update_scripts: HashMap<String, Vec<Step>>,
    delete_scripts: HashMap<String, Vec<Step>>,
    change_set_scripts: HashMap<String, Vec<ChangeSetDescription>>,
    change_sets: HashMap<(String, String), VecDeque<ChangeSetDescription>>,
    errors: HashMap<Op, VecDeque<RemoteError>>,
    uploads: HashMap<(String, String), Vec<u8>>,
    calls: Vec<Call>,
}

/// Scripted in-memory control plane.
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<State>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control plane that already carries the bootstrap stack with its
    /// templates and source buckets.
    pub fn bootstrapped(bootstrap_stack: &str) -> Self {
        let cloud = Self::new();
        cloud.seed_stack(bootstrap_stack, "CREATE_COMPLETE");
        cloud.seed_resource(bootstrap_stack, "TemplatesS3Bucket", TEMPLATES_BUCKET);
        cloud.seed_resource(bootstrap_stack, "SourceS3Bucket", SOURCE_BUCKET);
        cloud
    }

    /// Every call sleeps for `latency`, which makes overlapping calls observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn seed_stack(&self, name: &str, status: &str) {
        self.state()
            .stacks
            .insert(name.to_string(), FakeStack::new(status));
    }

    pub fn seed_policy(&self, name: &str, policy: &str) {
        if let Some(stack) = self.state().stacks.get_mut(name) {
            stack.policy = Some(policy.to_string());
        }
    }

    pub fn seed_resource(&self, stack: &str, logical_id: &str, physical_id: &str) {
        if let Some(stack) = self.state().stacks.get_mut(stack) {
            stack
                .resources
                .insert(logical_id.to_string(), physical_id.to_string());
        }
    }

    /// Statuses observed after `create_stack` for this stack.
    pub fn script_create(&self, name: &str, steps: Vec<Step>) {
        self.state().create_scripts.insert(name.to_string(), steps);
    }

    pub fn script_update(&self, name: &str, steps: Vec<Step>) {
        self.state().update_scripts.insert(name.to_string(), steps);
    }

    pub fn script_delete(&self, name: &str, steps: Vec<Step>) {
        self.state().delete_scripts.insert(name.to_string(), steps);
    }

    /// Descriptions returned by successive `describe_change_set` calls for
    /// changesets of this stack. The last one repeats.
    pub fn script_change_set(&self, stack: &str, descriptions: Vec<ChangeSetDescription>) {
        self.state()
            .change_set_scripts
            .insert(stack.to_string(), descriptions);
    }

    /// Queue an error for the next call of `op`.
    pub fn fail(&self, op: Op, error: RemoteError) {
        self.state().errors.entry(op).or_default().push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn uploaded(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .uploads
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn upload_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .uploads
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.state().stacks.get(name).map(|s| s.status.clone())
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: Op, call: Call) -> RemoteResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state();
        state.calls.push(call);
        match state.errors.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn missing_stack(name: &str) -> RemoteError {
    RemoteError::validation(format!("Stack with id {name} does not exist"))
}

fn default_steps(first: &str, last: &str) -> Vec<Step> {
    vec![Step::status(first), Step::status(last)]
}

impl StackClient for FakeCloud {
    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Option<StackState>> {
        self.enter(Op::DescribeStack, Call::DescribeStack(stack_name.to_string()))?;
        let mut state = self.state();
        let step = match state.stacks.get_mut(stack_name) {
            Some(stack) => stack.timeline.pop_front(),
            None => return Ok(None),
        };
        if step == Some(Step::Gone) {
            state.stacks.remove(stack_name);
            return Ok(None);
        }
        let Some(stack) = state.stacks.get_mut(stack_name) else {
            return Ok(None);
        };
        if let Some(Step::Status(status, reason)) = step {
            stack.status = status;
            stack.reason = reason;
        }
        Ok(Some(StackState {
            name: stack_name.to_string(),
            status: stack.status.clone(),
            reason: stack.reason.clone(),
        }))
    }

    fn validate_template(&self, template_url: &str) -> RemoteResult<()> {
        self.enter(
            Op::ValidateTemplate,
            Call::ValidateTemplate(template_url.to_string()),
        )
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> RemoteResult<()> {
        self.enter(
            Op::CreateChangeSet,
            Call::CreateChangeSet {
                stack: request.stack_name.clone(),
                name: request.change_set_name.clone(),
                kind: request.kind,
            },
        )?;
        let mut state = self.state();
        let script = state
            .change_set_scripts
            .get(&request.stack_name)
            .cloned()
            .unwrap_or_else(|| vec![no_change_set()]);
        if request.kind == ChangeSetKind::Create && !state.stacks.contains_key(&request.stack_name)
        {
            state.stacks.insert(
                request.stack_name.clone(),
                FakeStack::new("REVIEW_IN_PROGRESS"),
            );
        }
        state.change_sets.insert(
            (
                request.stack_name.clone(),
                request.change_set_name.clone(),
            ),
            script.into(),
        );
        Ok(())
    }

    fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> RemoteResult<ChangeSetDescription> {
        self.enter(
            Op::DescribeChangeSet,
            Call::DescribeChangeSet(stack_name.to_string()),
        )?;
        let mut state = self.state();
        let key = (stack_name.to_string(), change_set_name.to_string());
        let Some(queue) = state.change_sets.get_mut(&key) else {
            return Err(RemoteError::new(
                CHANGE_SET_NOT_FOUND,
                format!("ChangeSet [{change_set_name}] does not exist"),
            ));
        };
        let description = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        description.ok_or_else(|| {
            RemoteError::new(CHANGE_SET_NOT_FOUND, "ChangeSet has no description")
        })
    }

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> RemoteResult<()> {
        self.enter(
            Op::DeleteChangeSet,
            Call::DeleteChangeSet {
                stack: stack_name.to_string(),
                name: change_set_name.to_string(),
            },
        )?;
        self.state()
            .change_sets
            .remove(&(stack_name.to_string(), change_set_name.to_string()));
        Ok(())
    }

    fn create_stack(&self, request: &StackRequest) -> RemoteResult<()> {
        self.enter(
            Op::CreateStack,
            Call::CreateStack(request.stack_name.clone()),
        )?;
        let mut state = self.state();
        if let Some(existing) = state.stacks.get(&request.stack_name)
            && existing.status != "REVIEW_IN_PROGRESS"
        {
            return Err(RemoteError::new(
                "AlreadyExistsException",
                format!("Stack [{}] already exists", request.stack_name),
            ));
        }
        let steps = state
            .create_scripts
            .get(&request.stack_name)
            .cloned()
            .unwrap_or_else(|| default_steps("CREATE_IN_PROGRESS", "CREATE_COMPLETE"));
        let mut stack = FakeStack::new("CREATE_IN_PROGRESS");
        stack.timeline = steps.into();
        stack.policy = request.stack_policy.clone();
        state.stacks.insert(request.stack_name.clone(), stack);
        Ok(())
    }

    fn update_stack(&self, request: &StackRequest) -> RemoteResult<()> {
        self.enter(
            Op::UpdateStack,
            Call::UpdateStack(request.stack_name.clone()),
        )?;
        let mut state = self.state();
        let steps = state
            .update_scripts
            .get(&request.stack_name)
            .cloned()
            .unwrap_or_else(|| default_steps("UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"));
        let Some(stack) = state.stacks.get_mut(&request.stack_name) else {
            return Err(missing_stack(&request.stack_name));
        };
        stack.status = "UPDATE_IN_PROGRESS".to_string();
        stack.timeline = steps.into();
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str, _role_arn: Option<&str>) -> RemoteResult<()> {
        self.enter(Op::DeleteStack, Call::DeleteStack(stack_name.to_string()))?;
        let mut state = self.state();
        let steps = state
            .delete_scripts
            .get(stack_name)
            .cloned()
            .unwrap_or_else(|| vec![Step::status("DELETE_IN_PROGRESS"), Step::Gone]);
        if let Some(stack) = state.stacks.get_mut(stack_name) {
            stack.status = "DELETE_IN_PROGRESS".to_string();
            stack.timeline = steps.into();
        }
        Ok(())
    }

    fn get_stack_policy(&self, stack_name: &str) -> RemoteResult<Option<String>> {
        self.enter(
            Op::GetStackPolicy,
            Call::GetStackPolicy(stack_name.to_string()),
        )?;
        self.state()
            .stacks
            .get(stack_name)
            .map(|stack| stack.policy.clone())
            .ok_or_else(|| missing_stack(stack_name))
    }

    fn set_stack_policy(&self, stack_name: &str, policy: &str) -> RemoteResult<()> {
        self.enter(
            Op::SetStackPolicy,
            Call::SetStackPolicy {
                stack: stack_name.to_string(),
                policy: policy.to_string(),
            },
        )?;
        let mut state = self.state();
        let stack = state
            .stacks
            .get_mut(stack_name)
            .ok_or_else(|| missing_stack(stack_name))?;
        stack.policy = Some(policy.to_string());
        Ok(())
    }

    fn physical_resource_id(&self, stack_name: &str, logical_id: &str) -> RemoteResult<String> {
        self.enter(
            Op::PhysicalResourceId,
            Call::PhysicalResourceId {
                stack: stack_name.to_string(),
                logical_id: logical_id.to_string(),
            },
        )?;
        let state = self.state();
        let stack = state
            .stacks
            .get(stack_name)
            .ok_or_else(|| missing_stack(stack_name))?;
        stack.resources.get(logical_id).cloned().ok_or_else(|| {
            RemoteError::validation(format!(
                "Resource {logical_id} does not exist for stack {stack_name}"
            ))
        })
    }
}

impl ArtifactStore for FakeCloud {
    fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> RemoteResult<()> {
        self.enter(
            Op::Upload,
            Call::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        )?;
        self.state()
            .uploads
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

/// Backend handing out one [`FakeCloud`] per region.
#[derive(Debug, Default)]
pub struct FakeBackend {
    regions: HashMap<String, Arc<FakeCloud>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: &str, cloud: Arc<FakeCloud>) -> Self {
        self.regions.insert(region.to_string(), cloud);
        self
    }
}

impl Backend for FakeBackend {
    fn connect(&self, region: &str) -> anyhow::Result<RegionSession> {
        let cloud = self
            .regions
            .get(region)
            .ok_or_else(|| anyhow::anyhow!("No credentials configured for region {}", region))?;
        Ok(RegionSession {
            region: region.to_string(),
            stacks: cloud.clone(),
            artifacts: cloud.clone(),
        })
    }
}
