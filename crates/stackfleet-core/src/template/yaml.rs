//! YAML templates read as JSON documents, with short-form intrinsic
//! function tags (`!Ref`, `!GetAtt`, `!Sub`, ...) expanded to their long form.

use anyhow::{Context, anyhow};
use serde_json::{Map, Value, json};
use serde_yaml::Value as Yaml;

/// Parse a YAML template into the JSON document it stands for.
pub fn parse(raw: &[u8]) -> anyhow::Result<Value> {
    let document: Yaml = serde_yaml::from_slice(raw).context("Failed to parse YAML template")?;
    to_json(document)
}

fn to_json(node: Yaml) -> anyhow::Result<Value> {
    Ok(match node {
        Yaml::Null => Value::Null,
        Yaml::Bool(flag) => Value::Bool(flag),
        Yaml::Number(number) => number_to_json(&number)?,
        Yaml::String(text) => Value::String(text),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, value) in mapping {
                object.insert(key_to_string(key)?, to_json(value)?);
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            intrinsic(tag.trim_start_matches('!'), to_json(tagged.value)?)
        }
    })
}

fn intrinsic(name: &str, argument: Value) -> Value {
    let (key, argument) = match name {
        "Ref" | "Condition" => (name.to_string(), argument),
        // `!GetAtt Resource.Attribute` is the scalar form of a two-item list.
        "GetAtt" => {
            let argument = match argument {
                Value::String(path) => match path.split_once('.') {
                    Some((resource, attribute)) => json!([resource, attribute]),
                    None => Value::String(path),
                },
                other => other,
            };
            ("Fn::GetAtt".to_string(), argument)
        }
        _ => (format!("Fn::{}", name), argument),
    };
    let mut object = Map::new();
    object.insert(key, argument);
    Value::Object(object)
}

fn number_to_json(number: &serde_yaml::Number) -> anyhow::Result<Value> {
    if let Some(value) = number.as_i64() {
        Ok(Value::from(value))
    } else if let Some(value) = number.as_u64() {
        Ok(Value::from(value))
    } else {
        number
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| anyhow!("Unsupported number in YAML template: {}", number))
    }
}

fn key_to_string(key: Yaml) -> anyhow::Result<String> {
    match key {
        Yaml::String(text) => Ok(text),
        Yaml::Bool(flag) => Ok(flag.to_string()),
        Yaml::Number(number) => Ok(number.to_string()),
        other => Err(anyhow!("Unsupported mapping key in YAML template: {:?}", other)),
    }
}
