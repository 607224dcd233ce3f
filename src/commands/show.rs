use anyhow::Result;

use crate::Context;
use crate::cli::ShowArgs;

pub fn run(ctx: &Context, args: &ShowArgs) -> Result<()> {
    let manifest = super::load_effective(ctx, &args.source)?;
    let document = manifest
        .to_document(args.format.into())
        .map_err(|e| anyhow::anyhow!("Failed to render manifest: {}", e))?;
    print!("{document}");
    if !document.ends_with('\n') {
        println!();
    }
    Ok(())
}
