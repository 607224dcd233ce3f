//! Blade inventory input: files and inline `--blade-spec` entries.

use anyhow::{Context, Result};
use manifest::DocumentFormat;
use planner::{BladeInstance, Inventory};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::cli::InventoryArgs;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BladeSpecError {
    #[error("expected id=class or id=class@address, got '{0}'")]
    Shape(String),

    #[error("empty {field} in '{spec}'")]
    Empty { field: &'static str, spec: String },
}

/// Parse `id=class` or `id=class@address`
pub fn parse_blade_spec(spec: &str) -> Result<BladeInstance, BladeSpecError> {
    let (id, rest) = spec
        .split_once('=')
        .ok_or_else(|| BladeSpecError::Shape(spec.to_string()))?;
    let (class, address) = match rest.split_once('@') {
        Some((class, address)) => (class, Some(address)),
        None => (rest, None),
    };

    let empty = |field| BladeSpecError::Empty {
        field,
        spec: spec.to_string(),
    };
    let id = id.trim();
    let class = class.trim();
    if id.is_empty() {
        return Err(empty("id"));
    }
    if class.is_empty() {
        return Err(empty("class"));
    }

    let blade = BladeInstance::new(id, class);
    Ok(match address.map(str::trim) {
        Some("") => return Err(empty("address")),
        Some(address) => blade.with_address(address),
        None => blade,
    })
}

/// Read an inventory file, detecting the format from the extension
pub fn load_inventory(path: &Path) -> Result<Inventory> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read inventory {}", path.display()))?;
    let inventory: Inventory = DocumentFormat::from_path(path)
        .decode(&content)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Invalid inventory {}", path.display()))?;
    log::debug!(
        "loaded {} blades from {}",
        inventory.len(),
        path.display()
    );
    Ok(inventory)
}

/// Inventory from the file (if any) followed by inline specs
pub fn collect(args: &InventoryArgs) -> Result<Inventory> {
    if args.inventory.is_none() && args.blade_specs.is_empty() {
        anyhow::bail!("No blades given: pass --inventory <file> or --blade-spec id=class");
    }

    let mut blades = match &args.inventory {
        Some(path) => load_inventory(path)?.blades,
        None => Vec::new(),
    };
    for spec in &args.blade_specs {
        blades.push(parse_blade_spec(spec).context("Invalid --blade-spec")?);
    }
    Ok(Inventory::new(blades))
}
