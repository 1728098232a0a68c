#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use stackfleet_core::manifest::{Manifest, Region, StackSpec};
use stackfleet_core::retry::Cadence;
use stackfleet_core::run::{RunOptions, RunReport};

pub const BOOTSTRAP: &str = "stackfleet-bootstrap";
pub const RUN_UID: &str = "run-1";

/// Temporary directory holding the templates of a test manifest.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>.json` with an empty resource section.
    pub fn template(&self, name: &str) -> &Self {
        std::fs::write(
            self.path().join(format!("{name}.json")),
            r#"{"Resources":{}}"#,
        )
        .unwrap();
        self
    }

    pub fn options(&self) -> RunOptions {
        options(self.path(), Duration::from_secs(5))
    }
}

pub fn options(root: &Path, deadline: Duration) -> RunOptions {
    let mut options = RunOptions::new(root);
    options.run_uid = RUN_UID.to_string();
    options.bootstrap_stack = BOOTSTRAP.to_string();
    options.cadence = Cadence::uniform(Duration::from_millis(1)).with_deadline(deadline);
    options.dispatch_interval = Duration::ZERO;
    options
}

pub fn stack(name: &str) -> StackSpec {
    StackSpec {
        name: name.to_string(),
        template_path: format!("{name}.json"),
        ..StackSpec::default()
    }
}

pub fn manifest(regions: &[(&str, &[&str])], parallel: bool) -> Manifest {
    Manifest {
        regions: regions
            .iter()
            .map(|(name, stacks)| Region {
                name: name.to_string(),
                stacks: stacks.iter().map(|s| stack(s)).collect(),
            })
            .collect(),
        parallel,
    }
}

/// Stack names of a region report, in report order.
pub fn stack_names<T>(report: &RunReport<T>, region: &str) -> Vec<String> {
    report
        .regions
        .iter()
        .find(|r| r.region == region)
        .map(|r| r.stacks.iter().map(|s| s.name.clone()).collect())
        .unwrap_or_default()
}
