//! Manifest loading and validation.

pub mod regions;
pub mod schema;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

pub use schema::{Manifest, Region, StackAction, StackSpec};

/// Load and validate a manifest. `.toml` files are parsed as TOML, anything
/// else as JSON.
pub fn load(path: &Path) -> Result<Manifest> {
    tracing::info!("Parsing manifest file {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let manifest = if is_toml {
        parse_toml_str(&content)
    } else {
        parse_json_str(&content)
    }
    .with_context(|| format!("Failed to parse manifest file: {}", path.display()))?;

    Ok(manifest)
}

pub fn parse_json_str(content: &str) -> Result<Manifest> {
    let manifest: Manifest =
        serde_json::from_str(content).context("Manifest is not a valid JSON document")?;
    validate(&manifest)?;
    Ok(manifest)
}

pub fn parse_toml_str(content: &str) -> Result<Manifest> {
    let manifest: Manifest =
        toml::from_str(content).map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))?;
    validate(&manifest)?;
    Ok(manifest)
}

/// Check the manifest before any remote call is made.
pub fn validate(manifest: &Manifest) -> Result<()> {
    if manifest.regions.is_empty() {
        anyhow::bail!("No Regions found");
    }

    for (i, region) in manifest.regions.iter().enumerate() {
        if region.name.is_empty() {
            anyhow::bail!("Region name is missing for element {}", i);
        }
        if !regions::is_known_region(&region.name) {
            anyhow::bail!("{} is not a valid region", region.name);
        }

        let mut seen = HashSet::new();
        for (j, stack) in region.stacks.iter().enumerate() {
            if stack.name.is_empty() {
                anyhow::bail!(
                    "Stack name is missing for element {} in region {}",
                    j,
                    region.name
                );
            }
            if stack.template_path.is_empty() && stack.template_url.is_none() {
                anyhow::bail!(
                    "Missing field TemplatePath for stack {} in region {}",
                    stack.name,
                    region.name
                );
            }
            if !seen.insert(stack.name.as_str()) {
                anyhow::bail!(
                    "Stack {} is declared more than once in region {}",
                    stack.name,
                    region.name
                );
            }
        }
    }

    Ok(())
}
