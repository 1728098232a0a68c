//! [`StackClient`] on the CloudFormation API.

use std::future::Future;
use std::sync::Arc;

use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::types::{
    Capability as SdkCapability, ChangeSetType, Parameter as SdkParameter,
};
use tokio::runtime::Runtime;

use stackfleet_core::remote::error::VALIDATION_ERROR;
use stackfleet_core::remote::{
    Capability, ChangeSetDescription, ChangeSetRequest, Parameter, RemoteError, RemoteResult,
    ResourceChange, StackClient, StackRequest, StackState, TemplateSource,
};

use crate::error::remote_error;

pub struct CloudFormation {
    client: Client,
    runtime: Arc<Runtime>,
}

impl CloudFormation {
    pub fn new(client: Client, runtime: Arc<Runtime>) -> Self {
        Self { client, runtime }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

fn parameters(parameters: &[Parameter]) -> Vec<SdkParameter> {
    parameters
        .iter()
        .map(|p| {
            SdkParameter::builder()
                .parameter_key(&p.key)
                .parameter_value(&p.value)
                .build()
        })
        .collect()
}

fn capabilities(capabilities: &[Capability]) -> Vec<SdkCapability> {
    capabilities
        .iter()
        .map(|c| SdkCapability::from(c.as_str()))
        .collect()
}

fn split_template(template: &TemplateSource) -> (Option<String>, Option<String>) {
    match template {
        TemplateSource::Url(url) => (Some(url.clone()), None),
        TemplateSource::Body(body) => (None, Some(body.clone())),
    }
}

fn is_missing_stack(code: &str, message: &str) -> bool {
    code == VALIDATION_ERROR && message.contains("does not exist")
}

impl StackClient for CloudFormation {
    fn describe_stack(&self, stack_name: &str) -> RemoteResult<Option<StackState>> {
        let output = match self.block_on(
            self.client
                .describe_stacks()
                .stack_name(stack_name)
                .send(),
        ) {
            Ok(output) => output,
            Err(err) => {
                let error = remote_error(err);
                if is_missing_stack(&error.code, &error.message) {
                    return Ok(None);
                }
                return Err(error);
            }
        };

        Ok(output.stacks().first().map(|stack| StackState {
            name: stack.stack_name().unwrap_or(stack_name).to_string(),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: stack.stack_status_reason().map(str::to_string),
        }))
    }

    fn validate_template(&self, template_url: &str) -> RemoteResult<()> {
        self.block_on(
            self.client
                .validate_template()
                .template_url(template_url)
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn create_change_set(&self, request: &ChangeSetRequest) -> RemoteResult<()> {
        let (url, body) = split_template(&request.template);
        self.block_on(
            self.client
                .create_change_set()
                .stack_name(&request.stack_name)
                .change_set_name(&request.change_set_name)
                .change_set_type(ChangeSetType::from(request.kind.as_str()))
                .set_template_url(url)
                .set_template_body(body)
                .set_parameters(Some(parameters(&request.parameters)))
                .set_capabilities(Some(capabilities(&request.capabilities)))
                .set_role_arn(request.role_arn.clone())
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> RemoteResult<ChangeSetDescription> {
        let mut description = ChangeSetDescription {
            status: String::new(),
            reason: None,
            changes: Vec::new(),
        };
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .block_on(
                    self.client
                        .describe_change_set()
                        .stack_name(stack_name)
                        .change_set_name(change_set_name)
                        .set_next_token(next_token.take())
                        .send(),
                )
                .map_err(remote_error)?;

            description.status = output
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default();
            description.reason = output.status_reason().map(str::to_string);
            description.changes.extend(
                output
                    .changes()
                    .iter()
                    .filter_map(|change| change.resource_change())
                    .map(|change| ResourceChange {
                        logical_id: change.logical_resource_id().unwrap_or_default().to_string(),
                        resource_type: change.resource_type().unwrap_or_default().to_string(),
                        action: change
                            .action()
                            .map(|a| a.as_str().to_string())
                            .unwrap_or_default(),
                        replacement: change
                            .replacement()
                            .map(|r| r.as_str().to_string())
                            .unwrap_or_default(),
                    }),
            );

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => return Ok(description),
            }
        }
    }

    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> RemoteResult<()> {
        self.block_on(
            self.client
                .delete_change_set()
                .stack_name(stack_name)
                .change_set_name(change_set_name)
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn create_stack(&self, request: &StackRequest) -> RemoteResult<()> {
        let (url, body) = split_template(&request.template);
        self.block_on(
            self.client
                .create_stack()
                .stack_name(&request.stack_name)
                .set_template_url(url)
                .set_template_body(body)
                .set_parameters(Some(parameters(&request.parameters)))
                .set_capabilities(Some(capabilities(&request.capabilities)))
                .set_stack_policy_body(request.stack_policy.clone())
                .set_role_arn(request.role_arn.clone())
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn update_stack(&self, request: &StackRequest) -> RemoteResult<()> {
        let (url, body) = split_template(&request.template);
        self.block_on(
            self.client
                .update_stack()
                .stack_name(&request.stack_name)
                .set_template_url(url)
                .set_template_body(body)
                .set_parameters(Some(parameters(&request.parameters)))
                .set_capabilities(Some(capabilities(&request.capabilities)))
                .set_role_arn(request.role_arn.clone())
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn delete_stack(&self, stack_name: &str, role_arn: Option<&str>) -> RemoteResult<()> {
        self.block_on(
            self.client
                .delete_stack()
                .stack_name(stack_name)
                .set_role_arn(role_arn.map(str::to_string))
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn get_stack_policy(&self, stack_name: &str) -> RemoteResult<Option<String>> {
        let output = self
            .block_on(self.client.get_stack_policy().stack_name(stack_name).send())
            .map_err(remote_error)?;
        Ok(output.stack_policy_body().map(str::to_string))
    }

    fn set_stack_policy(&self, stack_name: &str, policy: &str) -> RemoteResult<()> {
        self.block_on(
            self.client
                .set_stack_policy()
                .stack_name(stack_name)
                .stack_policy_body(policy)
                .send(),
        )
        .map_err(remote_error)?;
        Ok(())
    }

    fn physical_resource_id(&self, stack_name: &str, logical_id: &str) -> RemoteResult<String> {
        let output = self
            .block_on(
                self.client
                    .describe_stack_resource()
                    .stack_name(stack_name)
                    .logical_resource_id(logical_id)
                    .send(),
            )
            .map_err(remote_error)?;
        physical_id(
            output
                .stack_resource_detail()
                .and_then(|detail| detail.physical_resource_id()),
            stack_name,
            logical_id,
        )
    }
}

/// A resource without a physical id has not been created yet.
fn physical_id(id: Option<&str>, stack_name: &str, logical_id: &str) -> RemoteResult<String> {
    match id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(RemoteError::validation(format!(
            "Resource {} of stack {} has no physical id",
            logical_id, stack_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackfleet_core::retry::{STANDARD, Verdict};

    #[test]
    fn only_missing_stack_validation_errors_mean_absent() {
        assert!(is_missing_stack(
            VALIDATION_ERROR,
            "Stack with id api does not exist"
        ));
        assert!(!is_missing_stack(VALIDATION_ERROR, "Template format error"));
        assert!(!is_missing_stack("Throttling", "does not exist"));
    }

    #[test]
    fn capabilities_use_wire_names() {
        let mapped = capabilities(&[Capability::NamedIam, Capability::AutoExpand]);
        assert_eq!(mapped[0].as_str(), "CAPABILITY_NAMED_IAM");
        assert_eq!(mapped[1].as_str(), "CAPABILITY_AUTO_EXPAND");
    }

    #[test]
    fn resource_without_physical_id_is_an_error() {
        assert_eq!(
            physical_id(Some("source-bucket-1a2b"), "bootstrap", "SourceBucket").unwrap(),
            "source-bucket-1a2b"
        );

        let error = physical_id(None, "bootstrap", "SourceBucket").unwrap_err();
        assert!(error.message.contains("SourceBucket"));
        assert_eq!(STANDARD.classify(&error), Verdict::Fatal);
        assert!(physical_id(Some(""), "bootstrap", "SourceBucket").is_err());
    }

    #[test]
    fn inline_bodies_are_not_sent_as_urls() {
        let (url, body) = split_template(&TemplateSource::Body("{}".to_string()));
        assert_eq!(url, None);
        assert_eq!(body.as_deref(), Some("{}"));
    }
}
