use anyhow::{Context as _, Result};
use colored::Colorize;
use planner::ActionPlan;
use serde::Serialize;

use crate::Context;
use crate::cli::{PlanArgs, PlanFormatArg};
use crate::inventory;
use crate::ui;

/// JSON shape of one blade's plan
#[derive(Serialize)]
struct PlanOutput<'a> {
    #[serde(flatten)]
    plan: &'a ActionPlan,
    fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    commands: Option<Vec<String>>,
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let manifest = super::load_effective(ctx, &args.source)?;
    let inventory = inventory::collect(&args.inventory)?;
    let plans = super::build_plans(&manifest, &inventory, args.inventory.blade.as_deref())?;
    let options = ctx.config.backend_options();

    match args.format {
        PlanFormatArg::Json => {
            let output = plans
                .iter()
                .map(|plan| {
                    Ok(PlanOutput {
                        plan,
                        fingerprint: fingerprint(plan)?,
                        commands: args
                            .commands
                            .then(|| command_lines(&debkit::render_plan(plan, &options))),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let json = serde_json::to_string_pretty(&output).context("Failed to encode plans")?;
            println!("{json}");
        }
        PlanFormatArg::Text => {
            for plan in &plans {
                print_plan(plan, ctx.verbose > 0)?;
                if args.commands {
                    print_commands(plan, &options);
                }
            }
            if plans.is_empty() {
                ui::info("No blades to plan");
            }
        }
    }
    Ok(())
}

fn fingerprint(plan: &ActionPlan) -> Result<String> {
    plan.fingerprint()
        .with_context(|| format!("Failed to fingerprint plan for {}", plan.blade()))
}

/// Print one plan as numbered actions
fn print_plan(plan: &ActionPlan, full_fingerprint: bool) -> Result<()> {
    ui::section(&plan.blade().to_string());
    let digest = fingerprint(plan)?;
    let shown = if full_fingerprint {
        digest.as_str()
    } else {
        digest.get(..16).unwrap_or(&digest)
    };
    ui::dim(&format!("fingerprint {shown}"));

    if plan.is_empty() {
        ui::dim("nothing to do");
        return Ok(());
    }
    for (index, action) in plan.actions().iter().enumerate() {
        println!(
            "  {} {} {}",
            format!("{:>2}.", index + 1).dimmed(),
            format!("[{}]", action.stage()).cyan(),
            action
        );
    }
    ui::dim(&plan.summary().to_string());
    Ok(())
}

fn print_commands(plan: &ActionPlan, options: &debkit::BackendOptions) {
    let commands = debkit::render_plan(plan, options);
    if commands.is_empty() {
        return;
    }
    println!("  {}", "commands:".bold());
    for spec in &commands {
        println!("    {} {}", "$".dimmed(), spec);
        if let Some(input) = &spec.stdin {
            for line in input.lines() {
                println!("      {}", line.dimmed());
            }
        }
    }
}

fn command_lines(commands: &[debkit::CommandSpec]) -> Vec<String> {
    commands.iter().map(debkit::CommandSpec::command_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifest::{Manifest, ModuleEntry, PackageGroup, PythonConfig};
    use planner::{BladeInstance, build_plan, resolve_blade};

    #[test]
    fn test_json_output_carries_plan_and_commands() {
        let manifest = Manifest::new(
            vec![PackageGroup::new("base").with_packages(["vim"])],
            PythonConfig::new(
                "/root/blade-venv",
                vec![ModuleEntry::pypi("yaml", "PyYAML", None)],
            ),
        )
        .unwrap();
        let plan = build_plan(&resolve_blade(&manifest, &BladeInstance::new("blade1", "web")).unwrap());
        let output = PlanOutput {
            plan: &plan,
            fingerprint: fingerprint(&plan).unwrap(),
            commands: Some(command_lines(&debkit::render_plan(
                &plan,
                &debkit::BackendOptions::default(),
            ))),
        };

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["blade"]["id"], "blade1");
        assert_eq!(value["actions"][0]["type"], "install_packages");
        assert_eq!(value["actions"][1]["type"], "install_module");
        assert_eq!(value["fingerprint"], plan.fingerprint().unwrap());
        let commands = value["commands"].as_array().unwrap();
        assert!(
            commands
                .iter()
                .any(|c| c == "/root/blade-venv/bin/pip install PyYAML")
        );
    }
}
