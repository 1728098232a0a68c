//! Detection and rewriting of serverless templates.

use serde_json::Value;

pub const SERVERLESS_TRANSFORM: &str = "AWS::Serverless-2016-10-31";
pub const SERVERLESS_FUNCTION: &str = "AWS::Serverless::Function";

/// A template uses the serverless transform and declares at least one
/// serverless function.
pub fn is_serverless(template: &Value) -> bool {
    let transform = match template.get("Transform") {
        Some(Value::String(name)) => name == SERVERLESS_TRANSFORM,
        Some(Value::Array(names)) => names
            .iter()
            .any(|name| name.as_str() == Some(SERVERLESS_TRANSFORM)),
        _ => false,
    };
    transform && !functions(template).is_empty()
}

/// Logical ids of every serverless function, sorted.
pub fn functions(template: &Value) -> Vec<String> {
    let Some(resources) = template.get("Resources").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut names: Vec<String> = resources
        .iter()
        .filter(|(_, resource)| {
            resource.get("Type").and_then(Value::as_str) == Some(SERVERLESS_FUNCTION)
        })
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    names
}

/// Local code location of a function, if it is not already a remote URI.
pub fn local_code_uri<'a>(template: &'a Value, function: &str) -> Option<&'a str> {
    template
        .pointer(&format!("/Resources/{function}/Properties/CodeUri"))
        .and_then(Value::as_str)
        .filter(|uri| !uri.starts_with("s3://"))
}

/// Point a function's `CodeUri` at an uploaded object.
pub fn set_code_uri(template: &mut Value, function: &str, uri: &str) -> bool {
    match template.pointer_mut(&format!("/Resources/{function}/Properties")) {
        Some(Value::Object(properties)) => {
            properties.insert("CodeUri".to_string(), Value::from(uri));
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(transform: Value) -> Value {
        json!({
            "Transform": transform,
            "Resources": {
                "Worker": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": { "CodeUri": "src/worker", "Handler": "main" }
                },
                "Queue": { "Type": "AWS::SQS::Queue" }
            }
        })
    }

    #[test]
    fn detects_transform_with_functions() {
        assert!(is_serverless(&template(json!(SERVERLESS_TRANSFORM))));
        assert!(is_serverless(&template(json!([
            "AWS::LanguageExtensions",
            SERVERLESS_TRANSFORM
        ]))));
    }

    #[test]
    fn transform_without_functions_is_not_serverless() {
        let doc = json!({
            "Transform": SERVERLESS_TRANSFORM,
            "Resources": { "Queue": { "Type": "AWS::SQS::Queue" } }
        });
        assert!(!is_serverless(&doc));
        assert!(!is_serverless(&json!({ "Resources": {} })));
    }

    #[test]
    fn rewrites_code_uri() {
        let mut doc = template(json!(SERVERLESS_TRANSFORM));
        assert_eq!(functions(&doc), vec!["Worker".to_string()]);
        assert_eq!(local_code_uri(&doc, "Worker"), Some("src/worker"));

        assert!(set_code_uri(&mut doc, "Worker", "s3://source/lambda/1"));
        assert_eq!(local_code_uri(&doc, "Worker"), None);
        assert_eq!(
            doc.pointer("/Resources/Worker/Properties/Handler"),
            Some(&json!("main"))
        );
    }
}
