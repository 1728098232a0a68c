//! Values store for `{{name}}` parameter indirection.
//!
//! The values document is a JSON object keyed by region, then stack name,
//! then value name. The store is loaded once per run and only read after.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use crate::remote::Parameter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuesStore {
    values: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl ValuesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a values file. A missing file yields an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No values file at {}", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read values file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse values file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let doc: Value = serde_json::from_str(content).context("Values file is not valid JSON")?;
        let Value::Object(regions) = doc else {
            anyhow::bail!("Values document must be an object keyed by region");
        };

        let mut store = Self::new();
        for (region, stacks) in regions {
            let Value::Object(stacks) = stacks else {
                anyhow::bail!("Values for region {} must be an object keyed by stack", region);
            };
            for (stack, names) in stacks {
                let Value::Object(names) = names else {
                    anyhow::bail!(
                        "Values for stack {} in region {} must be an object",
                        stack,
                        region
                    );
                };
                for (name, value) in names {
                    let text = match value {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => anyhow::bail!(
                            "Value {} for stack {} in region {} must be a scalar",
                            name,
                            stack,
                            region
                        ),
                    };
                    store.insert(&region, &stack, &name, text);
                }
            }
        }
        Ok(store)
    }

    pub fn insert(&mut self, region: &str, stack: &str, name: &str, value: impl Into<String>) {
        self.values
            .entry(region.to_string())
            .or_default()
            .entry(stack.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    pub fn get(&self, region: &str, stack: &str, name: &str) -> Option<&str> {
        self.values
            .get(region)?
            .get(stack)?
            .get(name)
            .map(String::as_str)
    }

    /// Resolve one raw parameter value. `{{name}}` is looked up under the
    /// region and stack; anything else is used literally.
    pub fn resolve(
        &self,
        region: &str,
        stack: &str,
        key: &str,
        raw: &str,
    ) -> anyhow::Result<String> {
        let Some(name) = reference_name(raw) else {
            return Ok(raw.to_string());
        };
        self.get(region, stack, name)
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "Value {} for parameter {} not found in values for stack {} in region {}",
                    name, key, stack, region
                )
            })
    }

    /// Resolve a stack's parameter map, in key order.
    pub fn resolve_parameters(
        &self,
        region: &str,
        stack: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<Parameter>> {
        parameters
            .iter()
            .map(|(key, raw)| {
                Ok(Parameter {
                    key: key.clone(),
                    value: self.resolve(region, stack, key, raw)?,
                })
            })
            .collect()
    }
}

fn reference_name(raw: &str) -> Option<&str> {
    if raw.len() < 4 {
        return None;
    }
    raw.strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
}
