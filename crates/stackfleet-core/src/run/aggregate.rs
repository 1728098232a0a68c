//! Folding of pool results into ordered reports and run-level errors.

use thiserror::Error;

use crate::manifest::Manifest;
use crate::pool::Completed;
use crate::stack::StackJob;

/// Why a region did not fully succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("failed to prepare region {region}: {reason}")]
    Setup { region: String, reason: String },

    #[error("{operation}s failed for stack(s) {} in region {region}", .stacks.join(", "))]
    Stacks {
        operation: &'static str,
        region: String,
        stacks: Vec<String>,
    },
}

/// Top-level failure of a run, naming every failed region in manifest order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed in region(s): {}", .regions.join(", "))]
pub struct RunError {
    pub operation: &'static str,
    pub regions: Vec<String>,
}

/// Result of one stack job. Errors are kept as their rendered chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReport<T> {
    pub name: String,
    pub order: usize,
    pub outcome: Result<T, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport<T> {
    pub region: String,
    /// One entry per submitted stack, in deployment order.
    pub stacks: Vec<StackReport<T>>,
    pub error: Option<RegionError>,
}

impl<T> RegionReport<T> {
    pub fn setup_failed(region: &str, reason: String) -> Self {
        Self {
            region: region.to_string(),
            stacks: Vec::new(),
            error: Some(RegionError::Setup {
                region: region.to_string(),
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport<T> {
    pub operation: &'static str,
    /// One entry per manifest region, in manifest order.
    pub regions: Vec<RegionReport<T>>,
}

impl<T> RunReport<T> {
    pub fn error(&self) -> Option<RunError> {
        let regions: Vec<String> = self
            .regions
            .iter()
            .filter(|r| r.error.is_some())
            .map(|r| r.region.clone())
            .collect();
        (!regions.is_empty()).then_some(RunError {
            operation: self.operation,
            regions,
        })
    }

    pub fn into_result(self) -> Result<Self, RunError> {
        match self.error() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Fold the completed stack jobs of one region into its report.
pub fn collect_region<T>(
    operation: &'static str,
    region: &str,
    completed: Vec<Completed<StackJob<'_>, anyhow::Result<T>>>,
) -> RegionReport<T> {
    let mut stacks: Vec<StackReport<T>> = completed
        .into_iter()
        .map(|done| {
            let outcome = match done.outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(format!("{:#}", error)),
                Err(error) => Err(error.to_string()),
            };
            if let Err(reason) = &outcome {
                tracing::error!("{} in region {}: {}", done.job.name(), region, reason);
            }
            StackReport {
                name: done.job.name().to_string(),
                order: done.job.ctx.order,
                outcome,
            }
        })
        .collect();
    stacks.sort_by_key(|s| s.order);

    let failed: Vec<String> = stacks
        .iter()
        .filter(|s| s.outcome.is_err())
        .map(|s| s.name.clone())
        .collect();
    let error = (!failed.is_empty()).then(|| RegionError::Stacks {
        operation,
        region: region.to_string(),
        stacks: failed,
    });

    RegionReport {
        region: region.to_string(),
        stacks,
        error,
    }
}

/// Fold region reports into the run report, restoring manifest order.
pub fn collect_run<J, T>(
    operation: &'static str,
    manifest: &Manifest,
    completed: Vec<Completed<J, RegionReport<T>>>,
    region_of: impl Fn(&J) -> &str,
) -> RunReport<T> {
    let mut regions: Vec<RegionReport<T>> = completed
        .into_iter()
        .map(|done| match done.outcome {
            Ok(report) => report,
            Err(error) => RegionReport::setup_failed(region_of(&done.job), error.to_string()),
        })
        .collect();
    regions.sort_by_key(|report| {
        manifest
            .regions
            .iter()
            .position(|r| r.name == report.region)
            .unwrap_or(usize::MAX)
    });

    for report in &regions {
        if let Some(error) = &report.error {
            tracing::error!("{}", error);
        }
    }

    RunReport { operation, regions }
}
