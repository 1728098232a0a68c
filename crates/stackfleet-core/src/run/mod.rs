//! Two-level fan-out of a manifest: regions, then stacks within a region.
//!
//! Each region worker opens one session, resolves the region's templates
//! bucket once and runs the region's stacks through a second pool. Results
//! come back unordered and are put back into manifest order by
//! [`aggregate`].

pub mod aggregate;
pub mod document;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use crate::config::{DEFAULT_BOOTSTRAP_STACK, DEFAULT_WORKERS};
use crate::manifest::{Manifest, Region};
use crate::pool::{DEFAULT_DISPATCH_INTERVAL, WorkerPool};
use crate::remote::{Backend, RegionSession};
use crate::retry::{Cadence, Polled, STANDARD, retry_call};
use crate::stack::{ChangeSetResult, StackContext, StackJob, StackOutcome, StackRunner};
use crate::template::bootstrap::TEMPLATES_BUCKET_RESOURCE;
use crate::values::ValuesStore;

pub use aggregate::{RegionError, RegionReport, RunError, RunReport, StackReport};
pub use document::DiffDocument;

/// What a run does with each stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Deploy,
    Diff,
    Teardown,
}

impl Mode {
    /// Name used in failure messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Mode::Deploy => "deployment",
            Mode::Diff => "diff",
            Mode::Teardown => "delete",
        }
    }

    fn needs_bucket(&self) -> bool {
        !matches!(self, Mode::Teardown)
    }
}

/// Run-wide settings shared by every region and stack worker.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stack workers per region in parallel mode.
    pub workers: usize,
    pub role_arn: Option<String>,
    pub template_root: PathBuf,
    /// Namespaces uploaded templates and changeset names.
    pub run_uid: String,
    pub cadence: Cadence,
    pub dispatch_interval: Duration,
    pub bootstrap_stack: String,
}

impl RunOptions {
    pub fn new(template_root: impl Into<PathBuf>) -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            role_arn: None,
            template_root: template_root.into(),
            run_uid: Uuid::new_v4().to_string(),
            cadence: Cadence::default(),
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            bootstrap_stack: DEFAULT_BOOTSTRAP_STACK.to_string(),
        }
    }
}

/// Region workers for a manifest: one per region, or a single one when the
/// manifest runs serially.
pub fn region_workers(regions: usize, parallel: bool) -> usize {
    if parallel { regions.max(1) } else { 1 }
}

/// Stack workers per region.
pub fn stack_workers(configured: usize, parallel: bool) -> usize {
    if parallel { configured.max(1) } else { 1 }
}

pub struct Orchestrator<'a> {
    backend: &'a dyn Backend,
    values: &'a ValuesStore,
    options: RunOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(backend: &'a dyn Backend, values: &'a ValuesStore, options: RunOptions) -> Self {
        Self {
            backend,
            values,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Deploy every stack of the manifest.
    pub fn deploy(&self, manifest: &Manifest) -> RunReport<StackOutcome> {
        self.run(manifest, Mode::Deploy, manifest.parallel, |runner, job| {
            runner.deploy(job)
        })
    }

    /// Compute changesets for every stack. Regions and stacks always run
    /// side by side, whatever the manifest's parallel flag.
    pub fn diff(&self, manifest: &Manifest) -> RunReport<ChangeSetResult> {
        self.run(manifest, Mode::Diff, true, |runner, job| runner.diff(job))
    }

    /// Delete every stack of the manifest, whatever its action.
    pub fn teardown(&self, manifest: &Manifest) -> RunReport<StackOutcome> {
        self.run(manifest, Mode::Teardown, manifest.parallel, |runner, job| {
            runner.delete(job)
        })
    }

    /// Deploy one stack of the manifest.
    pub fn deploy_stack(
        &self,
        manifest: &Manifest,
        manifest_path: &Path,
        region: &str,
        name: &str,
    ) -> anyhow::Result<StackOutcome> {
        self.single(manifest, manifest_path, region, name, Mode::Deploy)
    }

    /// Delete one stack of the manifest.
    pub fn delete_stack(
        &self,
        manifest: &Manifest,
        manifest_path: &Path,
        region: &str,
        name: &str,
    ) -> anyhow::Result<StackOutcome> {
        self.single(manifest, manifest_path, region, name, Mode::Teardown)
    }

    fn single(
        &self,
        manifest: &Manifest,
        manifest_path: &Path,
        region: &str,
        name: &str,
        mode: Mode,
    ) -> anyhow::Result<StackOutcome> {
        let Some((order, spec)) = manifest.find_stack(region, name) else {
            anyhow::bail!(
                "{} stack from {} region was not found in manifest file {}",
                name,
                region,
                manifest_path.display()
            );
        };
        tracing::info!("Running {} of stack {} in region {}", mode.operation(), name, region);

        let session = self.backend.connect(region)?;
        let bucket = if mode.needs_bucket() {
            self.templates_bucket(&session)?
        } else {
            String::new()
        };
        let runner = self.runner(&session);
        let job = StackJob {
            spec,
            ctx: self.context(region, bucket, order, false),
        };

        let outcome = match mode {
            Mode::Teardown => runner.delete(&job),
            _ => runner.deploy(&job),
        };
        outcome.with_context(|| format!("{} failed for stack {} in region {}", mode.operation(), name, region))
    }

    fn run<T, F>(&self, manifest: &Manifest, mode: Mode, parallel: bool, step: F) -> RunReport<T>
    where
        T: Send,
        F: Fn(&StackRunner<'_>, &StackJob<'_>) -> anyhow::Result<T> + Sync,
    {
        let regions: Vec<&Region> = manifest.regions.iter().collect();
        let pool = WorkerPool::new(region_workers(regions.len(), parallel))
            .with_dispatch_interval(self.options.dispatch_interval);
        tracing::info!(
            "Starting {} of {} stack(s) in {} region(s)",
            mode.operation(),
            manifest.stack_count(),
            regions.len()
        );

        let completed = pool.run(regions, |region| {
            self.run_region(region, mode, parallel, &step)
        });
        aggregate::collect_run(mode.operation(), manifest, completed, |region| {
            region.name.as_str()
        })
    }

    fn run_region<T, F>(
        &self,
        region: &Region,
        mode: Mode,
        parallel: bool,
        step: &F,
    ) -> RegionReport<T>
    where
        T: Send,
        F: Fn(&StackRunner<'_>, &StackJob<'_>) -> anyhow::Result<T> + Sync,
    {
        tracing::info!("Region {}: {} stack(s)", region.name, region.stacks.len());

        let session = match self.backend.connect(&region.name) {
            Ok(session) => session,
            Err(e) => return RegionReport::setup_failed(&region.name, format!("{:#}", e)),
        };
        let bucket = if mode.needs_bucket() {
            match self.templates_bucket(&session) {
                Ok(bucket) => bucket,
                Err(e) => return RegionReport::setup_failed(&region.name, format!("{:#}", e)),
            }
        } else {
            String::new()
        };

        let runner = self.runner(&session);
        let jobs: Vec<StackJob<'_>> = region
            .stacks
            .iter()
            .enumerate()
            .map(|(order, spec)| StackJob {
                spec,
                ctx: self.context(&region.name, bucket.clone(), order, parallel),
            })
            .collect();

        let pool = WorkerPool::new(stack_workers(self.options.workers, parallel))
            .with_dispatch_interval(self.options.dispatch_interval);
        let completed = pool.run(jobs, |job| {
            let outcome = step(&runner, job);
            if outcome.is_ok() {
                tracing::info!("{} in region {}: done", job.name(), region.name);
            }
            outcome
        });
        aggregate::collect_region(mode.operation(), &region.name, completed)
    }

    fn runner<'s>(&'s self, session: &'s RegionSession) -> StackRunner<'s> {
        StackRunner::new(
            session,
            self.values,
            self.options.cadence,
            &self.options.bootstrap_stack,
        )
    }

    fn context(&self, region: &str, bucket: String, order: usize, quiet: bool) -> StackContext {
        StackContext {
            region: region.to_string(),
            run_uid: self.options.run_uid.clone(),
            bucket,
            order,
            template_root: self.options.template_root.clone(),
            role_arn: self.options.role_arn.clone(),
            quiet,
        }
    }

    /// Physical name of the templates bucket held by the bootstrap stack.
    fn templates_bucket(&self, session: &RegionSession) -> anyhow::Result<String> {
        let bootstrap = self.options.bootstrap_stack.as_str();
        let polled = retry_call(self.options.cadence.run(), bootstrap, &STANDARD, || {
            session
                .stacks
                .physical_resource_id(bootstrap, TEMPLATES_BUCKET_RESOURCE)
        })
        .with_context(|| {
            format!(
                "Failed to look up {} of stack {} in region {}",
                TEMPLATES_BUCKET_RESOURCE, bootstrap, session.region
            )
        })?;
        match polled {
            Polled::Ready(bucket) => Ok(bucket),
            Polled::Benign(_, error) => anyhow::bail!(
                "Failed to look up {} of stack {} in region {}: {}",
                TEMPLATES_BUCKET_RESOURCE,
                bootstrap,
                session.region,
                error.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_manifests_use_one_worker_per_level() {
        assert_eq!(region_workers(2, false), 1);
        assert_eq!(stack_workers(50, false), 1);
    }

    #[test]
    fn parallel_manifests_fan_out() {
        assert_eq!(region_workers(3, true), 3);
        assert_eq!(stack_workers(8, true), 8);
        assert_eq!(region_workers(0, true), 1);
    }

    #[test]
    fn operation_names() {
        assert_eq!(Mode::Deploy.operation(), "deployment");
        assert_eq!(Mode::Diff.operation(), "diff");
        assert_eq!(Mode::Teardown.operation(), "delete");
    }

    #[test]
    fn options_get_a_fresh_run_uid() {
        let a = RunOptions::new(".");
        let b = RunOptions::new(".");
        assert_ne!(a.run_uid, b.run_uid);
        assert_eq!(a.workers, DEFAULT_WORKERS);
    }
}
