//! Remote stack client and artifact store contracts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::RemoteResult;

/// A resolved stack parameter as sent to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

/// Capabilities acknowledged when creating or updating a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    NamedIam,
    AutoExpand,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
            Capability::AutoExpand => "CAPABILITY_AUTO_EXPAND",
        }
    }
}

/// Whether a changeset previews a brand new stack or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetKind {
    Create,
    Update,
}

impl ChangeSetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSetKind::Create => "CREATE",
            ChangeSetKind::Update => "UPDATE",
        }
    }
}

/// Where the control plane reads a template from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Url(String),
    Body(String),
}

#[derive(Debug, Clone)]
pub struct ChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub kind: ChangeSetKind,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
    pub role_arn: Option<String>,
}

/// Request body shared by stack create and update.
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
    /// Only honored on create; updates push the policy separately.
    pub stack_policy: Option<String>,
    pub role_arn: Option<String>,
}

/// One resource mutation listed by a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    #[serde(rename = "LogicalResourceId")]
    pub logical_id: String,
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Replacement", default, skip_serializing_if = "String::is_empty")]
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub status: String,
    pub reason: Option<String>,
    pub changes: Vec<ResourceChange>,
}

/// Current status of a stack as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackState {
    pub name: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Stack, changeset and policy operations of the control plane.
///
/// Every method performs exactly one remote call. Retrying and error
/// classification happen in the caller.
pub trait StackClient: Send + Sync {
    /// Describe a stack. `Ok(None)` when the control plane reports no such stack.
    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Option<StackState>>;

    fn validate_template(&self, template_url: &str) -> RemoteResult<()>;

    fn create_change_set(&self, request: &ChangeSetRequest) -> RemoteResult<()>;

    fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> RemoteResult<ChangeSetDescription>;

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> RemoteResult<()>;

    fn create_stack(&self, request: &StackRequest) -> RemoteResult<()>;

    fn update_stack(&self, request: &StackRequest) -> RemoteResult<()>;

    fn delete_stack(&self, stack_name: &str, role_arn: Option<&str>) -> RemoteResult<()>;

    /// Currently applied stack policy body, if any.
    fn get_stack_policy(&self, stack_name: &str) -> RemoteResult<Option<String>>;

    fn set_stack_policy(&self, stack_name: &str, policy: &str) -> RemoteResult<()>;

    fn physical_resource_id(&self, stack_name: &str, logical_id: &str) -> RemoteResult<String>;
}

/// Object storage used for templates and packaged function code.
pub trait ArtifactStore: Send + Sync {
    fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> RemoteResult<()>;
}

/// Region-scoped clients, shared read-only by every stack worker of a region.
#[derive(Clone)]
pub struct RegionSession {
    pub region: String,
    pub stacks: Arc<dyn StackClient>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl std::fmt::Debug for RegionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSession")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Opens region sessions. One session is established per region and run.
pub trait Backend: Send + Sync {
    fn connect(&self, region: &str) -> anyhow::Result<RegionSession>;
}
