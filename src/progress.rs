//! Progress display for fleet apply.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use planner::{Action, ActionResult, BladeInstance, BladeReport, ProgressCallback};

/// One bar over every action of every blade
pub struct FleetProgress {
    bar: ProgressBar,
}

impl FleetProgress {
    pub fn new(total_actions: usize, quiet: bool) -> Self {
        let bar = ProgressBar::new(total_actions as u64);
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for FleetProgress {
    fn on_blade_start(&mut self, blade: &BladeInstance, actions: usize) {
        self.bar
            .println(format!("  {} {} ({} actions)", "→".blue(), blade, actions));
    }

    fn on_action_start(&mut self, blade: &BladeInstance, _index: usize, action: &Action) {
        self.bar.set_message(format!("{}: {}", blade.id, action.kind()));
    }

    fn on_action_complete(&mut self, blade: &BladeInstance, index: usize, result: &ActionResult) {
        self.bar.inc(1);
        if let ActionResult::Failed { error } = result {
            self.bar.println(format!(
                "    {} {} action {}: {}",
                "✗".red(),
                blade.id,
                index + 1,
                error
            ));
        }
    }

    fn on_blade_complete(&mut self, report: &BladeReport) {
        let summary = report.summary();
        let symbol = if report.is_success() {
            "✓".green()
        } else {
            "⚠".yellow()
        };
        self.bar
            .println(format!("  {} {}: {}", symbol, report.blade.id, summary));
    }
}
