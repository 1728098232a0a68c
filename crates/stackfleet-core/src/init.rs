//! Region bootstrap: the stack holding the buckets and service role every
//! other command relies on.

use anyhow::Context;
use uuid::Uuid;

use crate::remote::{Backend, TemplateSource};
use crate::retry::Cadence;
use crate::stack::runner::capabilities;
use crate::stack::{StackOutcome, StackRunner, Target, change_set_name};
use crate::template::{PolicyDocument, bootstrap};
use crate::values::ValuesStore;

/// Create the bootstrap stack in `region`, or update it to the current
/// template.
pub fn init_region(
    backend: &dyn Backend,
    region: &str,
    bootstrap_stack: &str,
    cadence: Cadence,
) -> anyhow::Result<StackOutcome> {
    let body = bootstrap::render()?;
    let session = backend.connect(region)?;
    let values = ValuesStore::new();
    let runner = StackRunner::new(&session, &values, cadence, bootstrap_stack);

    tracing::info!("Checking if {} already exists in {}", bootstrap_stack, region);
    let target = Target {
        name: bootstrap_stack.to_string(),
        template: TemplateSource::Body(body),
        parameters: Vec::new(),
        capabilities: capabilities(false),
        policy: PolicyDocument::allow_all_updates(),
        role_arn: None,
        change_set_name: change_set_name(&Uuid::new_v4().to_string(), bootstrap_stack),
        quiet: false,
    };

    runner
        .converge(&target)
        .with_context(|| format!("Failed to initialize region {}", region))
}
