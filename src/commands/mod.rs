//! Subcommand implementations

pub mod apply;
pub mod plan;
pub mod show;
pub mod validate;

use anyhow::Result;
use manifest::Manifest;
use planner::{ActionPlan, Inventory};
use std::path::PathBuf;

use crate::Context;
use crate::cli::ManifestArgs;

/// Overlays from the config file, then those given on the command line
pub fn overlay_paths(ctx: &Context, args: &ManifestArgs) -> Vec<PathBuf> {
    let mut paths = if args.no_default_overlays {
        Vec::new()
    } else {
        ctx.config.overlay_paths()
    };
    paths.extend(args.overlays.iter().cloned());
    paths
}

/// Base manifest with every overlay merged in
pub fn load_effective(ctx: &Context, args: &ManifestArgs) -> Result<Manifest> {
    let overlays = overlay_paths(ctx, args);
    for overlay in &overlays {
        log::info!("applying overlay {}", overlay.display());
    }
    Ok(manifest::load_effective(&args.manifest, &overlays)?)
}

/// Plans for every blade, or only `only`
pub fn build_plans(
    manifest: &Manifest,
    inventory: &Inventory,
    only: Option<&str>,
) -> Result<Vec<ActionPlan>> {
    let resolution = planner::resolve(manifest, inventory)?;
    let resolution = match only {
        Some(id) => resolution.only(id)?,
        None => resolution,
    };
    Ok(planner::build_plans(&resolution))
}
