use anyhow::Result;
use colored::Colorize;
use debkit::{CommandBackend, CommandRunner, LocalRunner, RetryConfig, SshRunner};
use planner::{ActionPlan, ActionResult, ExecuteOptions, FleetReport};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::inventory;
use crate::progress::FleetProgress;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let manifest = super::load_effective(ctx, &args.source)?;
    let inventory = inventory::collect(&args.inventory)?;
    let plans = super::build_plans(&manifest, &inventory, args.inventory.blade.as_deref())?;

    let total: usize = plans.iter().map(ActionPlan::len).sum();
    ui::header(if args.dry_run {
        "Apply (dry run)"
    } else {
        "Apply"
    });
    for plan in &plans {
        ui::kv(&plan.blade().to_string(), &plan.summary().to_string());
    }

    if total == 0 {
        println!();
        ui::info("Nothing to do");
        return Ok(());
    }

    println!();
    if !args.yes && !args.dry_run && !confirm_proceed(plans.len(), total)? {
        ui::info("Cancelled");
        return Ok(());
    }

    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: args.jobs.unwrap_or(ctx.config.jobs).max(1),
    };
    let retry = retry_config(ctx, args);

    let started = chrono::Local::now();
    log::info!(
        "provisioning {} blades with {} jobs at {}",
        plans.len(),
        opts.jobs,
        started.format("%Y-%m-%d %H:%M:%S")
    );

    if args.local && !args.dry_run {
        ui::warn("Running blade commands on this host (--local)");
    }
    let mut progress = FleetProgress::new(total, ctx.quiet);
    let report = if args.local {
        execute(&plans, LocalRunner, ctx, retry, &opts, &mut progress)
    } else {
        execute(&plans, ssh_runner(ctx, args), ctx, retry, &opts, &mut progress)
    };
    progress.finish();
    let report = report?;

    let elapsed = chrono::Local::now() - started;
    print_failures(&report);
    print_summary(&report, elapsed.num_seconds());

    let summary = report.summary();
    if !report.is_success() {
        anyhow::bail!(
            "{} of {} actions failed",
            summary.failed,
            summary.total()
        );
    }
    Ok(())
}

fn execute<R: CommandRunner>(
    plans: &[ActionPlan],
    runner: R,
    ctx: &Context,
    retry: RetryConfig,
    opts: &ExecuteOptions,
    progress: &mut FleetProgress,
) -> Result<FleetReport> {
    let backend = CommandBackend::new(runner)
        .with_options(ctx.config.backend_options())
        .with_retry_config(retry);
    planner::execute_fleet(plans, &backend, opts, progress)
}

fn retry_config(ctx: &Context, args: &ApplyArgs) -> RetryConfig {
    let mut retry = ctx.config.retry_config();
    if let Some(retries) = args.retries {
        retry.max_attempts = retries;
    }
    retry
}

fn ssh_runner(ctx: &Context, args: &ApplyArgs) -> SshRunner {
    let ssh = &ctx.config.ssh;
    let mut runner = SshRunner::new(args.ssh_user.as_deref().unwrap_or(&ssh.user));
    if let Some(port) = ssh.port {
        runner = runner.with_port(port);
    }
    if let Some(identity) = args.identity_file.clone().or_else(|| ctx.config.identity_path()) {
        runner = runner.with_identity_file(identity);
    }
    runner
}

/// Confirm with user
fn confirm_proceed(blades: usize, actions: usize) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(format!("Apply {actions} actions to {blades} blades?"))
        .default(false)
        .interact()?;

    Ok(confirmed)
}

fn print_failures(report: &FleetReport) {
    for blade in report.blades.iter().filter(|b| !b.is_success()) {
        ui::section(&blade.blade.to_string());
        if let Some(error) = &blade.prepare_error {
            println!("    {} prepare: {}", "✗".red(), error);
        }
        if let Some(error) = &blade.venv_error {
            println!("    {} venv: {}", "✗".red(), error);
        }
        for action in blade.failures() {
            match &action.result {
                ActionResult::Failed { error } => {
                    println!("    {} {}: {}", "✗".red(), action.action, error);
                }
                ActionResult::Skipped { reason } => {
                    println!("    {} {} ({})", "-".dimmed(), action.action, reason.dimmed());
                }
                _ => {}
            }
        }
    }
}

/// Print final summary
fn print_summary(report: &FleetReport, elapsed_secs: i64) {
    let summary = report.summary();
    println!();
    if summary.is_success() {
        println!(
            "  {} {} blades provisioned in {}s",
            "✓".green().bold(),
            report.blades.len(),
            elapsed_secs
        );
    } else {
        println!(
            "  {} Provisioning finished with errors after {}s",
            "⚠".yellow().bold(),
            elapsed_secs
        );
    }

    if summary.applied > 0 {
        println!("    • {} actions applied", summary.applied);
    }
    if summary.no_change > 0 {
        println!("    • {} actions already satisfied", summary.no_change);
    }
    if summary.skipped > 0 {
        println!("    • {} actions skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "actions".red());
    }
}
