//! AWS adapter for the stackfleet engine.
//!
//! Implements the control plane contracts of `stackfleet_core::remote` on
//! CloudFormation and S3. The SDK is async; every call blocks the calling
//! worker thread on one runtime shared by all regions.

mod cloudformation;
mod error;
mod s3;

use std::sync::Arc;

use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use tokio::runtime::Runtime;

use stackfleet_core::remote::{Backend, RegionSession};

pub use cloudformation::CloudFormation;
pub use s3::S3Store;

/// Opens CloudFormation and S3 clients per region from the shared AWS
/// configuration chain, optionally pinned to a named profile.
pub struct AwsBackend {
    profile: Option<String>,
    runtime: Arc<Runtime>,
}

impl AwsBackend {
    pub fn new(profile: Option<String>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("stackfleet-aws")
            .build()
            .context("Failed to start the AWS client runtime")?;
        Ok(Self {
            profile,
            runtime: Arc::new(runtime),
        })
    }
}

impl Backend for AwsBackend {
    fn connect(&self, region: &str) -> anyhow::Result<RegionSession> {
        tracing::debug!(
            "Connecting to {} (profile: {})",
            region,
            self.profile.as_deref().unwrap_or("default")
        );
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        let config = self.runtime.block_on(loader.load());

        Ok(RegionSession {
            region: region.to_string(),
            stacks: Arc::new(CloudFormation::new(
                aws_sdk_cloudformation::Client::new(&config),
                self.runtime.clone(),
            )),
            artifacts: Arc::new(S3Store::new(
                aws_sdk_s3::Client::new(&config),
                self.runtime.clone(),
            )),
        })
    }
}
