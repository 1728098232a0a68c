//! Stack policy documents.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An IAM-style policy document as attached to a stack.
///
/// Empty fields are omitted on serialization, so an empty document renders
/// as `{}`, the form the control plane uses for "no policy".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "Statement", default, skip_serializing_if = "Vec::is_empty")]
    pub statement: Vec<Statement>,
    #[serde(rename = "Version", default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(rename = "Effect", default, skip_serializing_if = "String::is_empty")]
    pub effect: String,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(rename = "Sid", default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
}

impl PolicyDocument {
    /// Policy allowing every update action on every resource.
    pub fn allow_all_updates() -> Self {
        Self {
            statement: vec![Statement {
                action: Some(Value::from("Update:*")),
                effect: "Allow".to_string(),
                principal: Some(Value::from("*")),
                resource: Some(Value::from("*")),
                ..Statement::default()
            }],
            ..Self::default()
        }
    }

    /// Parse a policy body returned by the control plane. A blank body is
    /// the empty document.
    pub fn parse(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(body).context("Failed to parse stack policy")
    }

    /// Canonical JSON rendering used for submission and comparison.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize stack policy")
    }

    /// True for the document that renders as `{}`.
    pub fn is_trivial(&self) -> bool {
        self.id.is_empty() && self.statement.is_empty() && self.version.is_empty()
    }

    /// Whether applying `self` over `applied` would change anything. A
    /// trivial desired policy never counts as a change.
    pub fn differs_from(&self, applied: &PolicyDocument) -> Result<bool> {
        if self.is_trivial() {
            return Ok(false);
        }
        Ok(self.to_json()? != applied.to_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_renders_as_empty_object() {
        assert_eq!(PolicyDocument::default().to_json().unwrap(), "{}");
        assert!(PolicyDocument::parse("").unwrap().is_trivial());
        assert!(PolicyDocument::parse("{}").unwrap().is_trivial());
    }

    #[test]
    fn formatting_differences_are_not_changes() {
        let desired = PolicyDocument::allow_all_updates();
        let applied = PolicyDocument::parse(
            r#"{
                "Statement": [
                    { "Resource": "*", "Principal": "*", "Effect": "Allow", "Action": "Update:*" }
                ]
            }"#,
        )
        .unwrap();
        assert!(!desired.differs_from(&applied).unwrap());
    }

    #[test]
    fn trivial_desired_policy_never_differs() {
        let applied = PolicyDocument::allow_all_updates();
        assert!(!PolicyDocument::default().differs_from(&applied).unwrap());
    }

    #[test]
    fn statement_changes_are_detected() {
        let desired = PolicyDocument::parse(
            r#"{"Statement":[{"Effect":"Deny","Action":"Update:Replace","Principal":"*","Resource":"LogicalResourceId/Database"}]}"#,
        )
        .unwrap();
        let applied = PolicyDocument::allow_all_updates();
        assert!(desired.differs_from(&applied).unwrap());
        assert!(desired.differs_from(&PolicyDocument::default()).unwrap());
    }
}
