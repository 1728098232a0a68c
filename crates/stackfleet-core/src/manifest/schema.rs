//! Manifest document schema
//!
//! Field names follow the manifest's PascalCase document format:
//!
//! ```json
//! {
//!   "Regions": [
//!     { "Name": "eu-west-1",
//!       "Stacks": [ { "StackName": "api", "TemplatePath": "api.json", "Action": "CREATE" } ] }
//!   ],
//!   "ParallelDeployment": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::template::PolicyDocument;

/// Root of a manifest document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Regions", default)]
    pub regions: Vec<Region>,

    /// Run regions concurrently and stacks of a region concurrently.
    #[serde(rename = "ParallelDeployment", default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Stacks", default)]
    pub stacks: Vec<StackSpec>,
}

/// Desired action for a stack. Create and update both mean "deploy".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StackAction {
    #[default]
    #[serde(alias = "create", alias = "Create")]
    Create,
    #[serde(alias = "update", alias = "Update")]
    Update,
    #[serde(alias = "delete", alias = "Delete")]
    Delete,
}

impl StackAction {
    pub fn is_delete(&self) -> bool {
        matches!(self, StackAction::Delete)
    }
}

/// One stack entry of a region. Immutable once the manifest is loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSpec {
    #[serde(rename = "StackName", default)]
    pub name: String,

    /// Template path relative to the manifest's directory, or absolute.
    #[serde(rename = "TemplatePath", default)]
    pub template_path: String,

    /// Pre-resolved template URL; skips packaging and upload.
    #[serde(rename = "TemplateUrl", default, skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,

    #[serde(rename = "Action", default)]
    pub action: StackAction,

    #[serde(rename = "StackPolicy", default)]
    pub stack_policy: PolicyDocument,

    /// Parameter name to literal value or `{{name}}` reference.
    #[serde(rename = "Parameters", default)]
    pub parameters: BTreeMap<String, String>,

    /// Service role for this stack; overrides the run-wide role.
    #[serde(rename = "RoleArn", default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

impl Manifest {
    /// Find a stack by region and name, with its position in the region.
    pub fn find_stack(&self, region: &str, name: &str) -> Option<(usize, &StackSpec)> {
        self.regions
            .iter()
            .find(|r| r.name == region)?
            .stacks
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == name)
    }

    pub fn stack_count(&self) -> usize {
        self.regions.iter().map(|r| r.stacks.len()).sum()
    }
}
