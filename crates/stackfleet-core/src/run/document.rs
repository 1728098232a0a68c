//! Diff output document.
//!
//! The document mirrors the manifest: regions holding stacks, each stack
//! annotated with what its changeset reported. Only stacks worth reviewing
//! are kept, and regions left without stacks are dropped.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::aggregate::RunReport;
use crate::manifest::{Manifest, StackAction};
use crate::stack::ChangeSetResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffDocument {
    #[serde(rename = "Regions")]
    pub regions: Vec<DiffRegion>,

    #[serde(rename = "ParallelDeployment")]
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRegion {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Stacks")]
    pub stacks: Vec<DiffStack>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStack {
    #[serde(rename = "StackName")]
    pub name: String,

    #[serde(rename = "TemplatePath", default, skip_serializing_if = "String::is_empty")]
    pub template_path: String,

    #[serde(rename = "DeploymentOrder")]
    pub order: usize,

    #[serde(rename = "Action")]
    pub action: StackAction,

    #[serde(rename = "Changes")]
    pub changes: ChangeSetResult,
}

impl DiffDocument {
    /// Build the document from a diff run. Failed stacks are kept with a
    /// `failed` status and their error as the reason.
    pub fn from_report(manifest: &Manifest, report: &RunReport<ChangeSetResult>) -> Self {
        let regions = report
            .regions
            .iter()
            .filter_map(|region| {
                let specs = manifest.regions.iter().find(|r| r.name == region.region);
                let mut stacks: Vec<DiffStack> = region
                    .stacks
                    .iter()
                    .filter_map(|stack| {
                        let changes = match &stack.outcome {
                            Ok(result) => result.clone(),
                            Err(reason) => ChangeSetResult::failed(reason.clone()),
                        };
                        if !changes.is_reportable() {
                            return None;
                        }
                        let spec = specs.and_then(|r| r.stacks.get(stack.order));
                        Some(DiffStack {
                            name: stack.name.clone(),
                            template_path: spec
                                .map(|s| s.template_path.clone())
                                .unwrap_or_default(),
                            order: stack.order,
                            action: spec.map(|s| s.action).unwrap_or_default(),
                            changes,
                        })
                    })
                    .collect();
                stacks.sort_by_key(|s| s.order);

                (!stacks.is_empty()).then(|| DiffRegion {
                    name: region.region.clone(),
                    stacks,
                })
            })
            .collect();

        Self {
            regions,
            parallel: manifest.parallel,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize diff document")
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write diff document: {}", path.display()))?;
        tracing::info!("Diff written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Region, StackSpec};
    use crate::remote::ResourceChange;
    use crate::run::aggregate::{RegionReport, StackReport};
    use crate::stack::DiffStatus;
    use tempfile::TempDir;

    fn manifest() -> Manifest {
        let stack = |name: &str| StackSpec {
            name: name.to_string(),
            template_path: format!("{name}.json"),
            ..StackSpec::default()
        };
        Manifest {
            regions: vec![
                Region {
                    name: "eu-west-1".to_string(),
                    stacks: vec![stack("a"), stack("b"), stack("c")],
                },
                Region {
                    name: "us-east-1".to_string(),
                    stacks: vec![stack("d")],
                },
            ],
            parallel: true,
        }
    }

    fn changed() -> ChangeSetResult {
        ChangeSetResult {
            changes: vec![ResourceChange {
                logical_id: "Queue".to_string(),
                resource_type: "AWS::SQS::Queue".to_string(),
                action: "Add".to_string(),
                replacement: String::new(),
            }],
            ..ChangeSetResult::default()
        }
    }

    fn report(name: &str, order: usize, outcome: Result<ChangeSetResult, String>) -> StackReport<ChangeSetResult> {
        StackReport {
            name: name.to_string(),
            order,
            outcome,
        }
    }

    #[test]
    fn keeps_changed_and_failed_stacks_only() {
        let run = RunReport {
            operation: "diff",
            regions: vec![
                RegionReport {
                    region: "eu-west-1".to_string(),
                    stacks: vec![
                        report("c", 2, Err("Template format error".to_string())),
                        report("a", 0, Ok(changed())),
                        report("b", 1, Ok(ChangeSetResult::default())),
                    ],
                    error: None,
                },
                RegionReport {
                    region: "us-east-1".to_string(),
                    stacks: vec![report("d", 0, Ok(ChangeSetResult::default()))],
                    error: None,
                },
            ],
        };

        let doc = DiffDocument::from_report(&manifest(), &run);

        assert_eq!(doc.regions.len(), 1);
        let names: Vec<&str> = doc.regions[0].stacks.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(doc.regions[0].stacks[0].template_path, "a.json");
        assert_eq!(doc.regions[0].stacks[1].changes.status, DiffStatus::Failed);
    }

    #[test]
    fn document_uses_manifest_field_names() {
        let run = RunReport {
            operation: "diff",
            regions: vec![RegionReport {
                region: "us-east-1".to_string(),
                stacks: vec![report("d", 0, Ok(changed()))],
                error: None,
            }],
        };
        let doc = DiffDocument::from_report(&manifest(), &run);
        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        assert_eq!(value["ParallelDeployment"], true);
        let stack = &value["Regions"][0]["Stacks"][0];
        assert_eq!(stack["StackName"], "d");
        assert_eq!(stack["Action"], "CREATE");
        assert_eq!(stack["Changes"]["Status"], "success");
        assert_eq!(stack["Changes"]["Resources"][0]["LogicalResourceId"], "Queue");
        assert_eq!(stack["Changes"]["ForceStackUpdate"], false);
    }

    #[test]
    fn write_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("diff.json");

        DiffDocument::default().write(&path).unwrap();

        let written: DiffDocument =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written.is_empty());
    }
}
