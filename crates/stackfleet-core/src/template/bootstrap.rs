//! Template of the per-region bootstrap stack.
//!
//! The bootstrap stack owns the two buckets every run uploads to and the
//! service role stack operations can assume.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::policy::{PolicyDocument, Statement};

/// Logical id of the bucket templates are uploaded to.
pub const TEMPLATES_BUCKET_RESOURCE: &str = "TemplatesS3Bucket";
/// Logical id of the bucket packaged function code is uploaded to.
pub const SOURCE_BUCKET_RESOURCE: &str = "SourceS3Bucket";
pub const SERVICE_ROLE_RESOURCE: &str = "CloudFormationServiceIamRole";
pub const SERVICE_POLICY_RESOURCE: &str = "CloudFormationServiceIamPolicy";

fn versioned_bucket() -> Value {
    json!({
        "Type": "AWS::S3::Bucket",
        "Properties": {
            "AccessControl": "BucketOwnerFullControl",
            "VersioningConfiguration": { "Status": "Enabled" }
        }
    })
}

fn assume_role_policy() -> PolicyDocument {
    PolicyDocument {
        statement: vec![Statement {
            sid: "AllowControlPlaneToAssumeRole".to_string(),
            effect: "Allow".to_string(),
            principal: Some(json!({ "Service": "cloudformation.amazonaws.com" })),
            action: Some(json!("sts:AssumeRole")),
            ..Statement::default()
        }],
        ..PolicyDocument::default()
    }
}

fn service_policy() -> PolicyDocument {
    PolicyDocument {
        statement: vec![Statement {
            sid: "AllowStackOperations".to_string(),
            effect: "Allow".to_string(),
            action: Some(json!(["*"])),
            resource: Some(json!("*")),
            ..Statement::default()
        }],
        ..PolicyDocument::default()
    }
}

/// Render the bootstrap template as a JSON body.
pub fn render() -> Result<String> {
    let template = json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": "stackfleet bootstrap resources",
        "Resources": {
            SOURCE_BUCKET_RESOURCE: versioned_bucket(),
            TEMPLATES_BUCKET_RESOURCE: versioned_bucket(),
            SERVICE_ROLE_RESOURCE: {
                "Type": "AWS::IAM::Role",
                "Properties": {
                    "AssumeRolePolicyDocument": assume_role_policy(),
                    "Path": "/"
                }
            },
            SERVICE_POLICY_RESOURCE: {
                "Type": "AWS::IAM::Policy",
                "Properties": {
                    "PolicyDocument": service_policy(),
                    "PolicyName": {
                        "Fn::Join": ["-", [{ "Ref": "AWS::StackName" }, SERVICE_POLICY_RESOURCE]]
                    },
                    "Roles": [{ "Ref": SERVICE_ROLE_RESOURCE }]
                }
            }
        },
        "Outputs": {
            "ServiceRoleArn": {
                "Value": { "Fn::GetAtt": [SERVICE_ROLE_RESOURCE, "Arn"] }
            }
        }
    });
    serde_json::to_string_pretty(&template).context("Failed to render bootstrap template")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_buckets_and_service_role() {
        let body: Value = serde_json::from_str(&render().unwrap()).unwrap();
        let resources = body["Resources"].as_object().unwrap();
        for id in [
            SOURCE_BUCKET_RESOURCE,
            TEMPLATES_BUCKET_RESOURCE,
            SERVICE_ROLE_RESOURCE,
            SERVICE_POLICY_RESOURCE,
        ] {
            assert!(resources.contains_key(id), "missing {id}");
        }
        assert_eq!(
            body["Resources"][SERVICE_ROLE_RESOURCE]["Properties"]["AssumeRolePolicyDocument"]
                ["Statement"][0]["Principal"]["Service"],
            "cloudformation.amazonaws.com"
        );
    }
}
