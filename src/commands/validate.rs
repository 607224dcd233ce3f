use anyhow::Result;

use crate::Context;
use crate::cli::ManifestArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &ManifestArgs) -> Result<()> {
    let manifest = super::load_effective(ctx, args)?;
    let summary = manifest.summary();

    ui::success(&format!("{} is valid", args.manifest.display()));
    if ctx.quiet {
        return Ok(());
    }

    let overlays = super::overlay_paths(ctx, args);
    if !overlays.is_empty() {
        ui::kv("overlays", &overlays.len().to_string());
    }
    ui::kv("groups", &summary.group_count.to_string());
    ui::kv("packages", &summary.package_count.to_string());
    ui::kv("service states", &summary.service_count.to_string());
    ui::kv("modules", &summary.module_count.to_string());

    let classes: Vec<_> = manifest.blade_classes_mentioned().into_iter().collect();
    if !classes.is_empty() {
        ui::kv("blade classes", &classes.join(", "));
    }
    Ok(())
}
