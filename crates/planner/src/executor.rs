//! Execution engine - drives backends through blade plans
//!
//! Actions of one blade run strictly in plan order. Distinct blades run in
//! parallel on a rayon pool. The engine never retries and never edits a plan;
//! retry policy belongs to the backend.

use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::context::ProgressCallback;
use crate::plan::{Action, ActionPlan, Stage};
use crate::types::{ActionOutcome, ActionResult, BladeInstance, ExecuteOptions, ExecuteSummary};

/// A system that can apply plan actions to blades
///
/// Implementations must make every operation idempotent: applying an action
/// that already holds reports `NoChange`.
pub trait Backend: Send + Sync {
    /// Called once per blade before its first action
    fn prepare(&self, _blade: &BladeInstance, _plan: &ActionPlan) -> Result<()> {
        Ok(())
    }

    /// Make sure the shared venv exists on the blade
    fn ensure_venv(&self, blade: &BladeInstance, venv: &Path) -> Result<()>;

    /// Apply one action
    fn apply(&self, blade: &BladeInstance, action: &Action) -> Result<ActionOutcome>;
}

/// Outcome of one plan action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// Position of the action in its plan
    pub index: usize,
    pub action: Action,
    pub result: ActionResult,
}

/// Everything that happened on one blade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BladeReport {
    pub blade: BladeInstance,
    /// Fingerprint of the plan that was executed, if it could be computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv_error: Option<String>,
    pub actions: Vec<ActionReport>,
}

impl BladeReport {
    /// Per-result counts; setup failures count as failures
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for report in &self.actions {
            summary.add_result(&report.result);
        }
        summary.failed += usize::from(self.prepare_error.is_some());
        summary.failed += usize::from(self.venv_error.is_some());
        summary
    }

    pub fn is_success(&self) -> bool {
        self.summary().is_success()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(|r| !r.result.is_success())
    }
}

/// Reports for a whole fleet, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    pub blades: Vec<BladeReport>,
}

impl FleetReport {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for blade in &self.blades {
            summary.merge(&blade.summary());
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.blades.iter().all(BladeReport::is_success)
    }
}

/// Tracks which prerequisites of later actions held
#[derive(Default)]
struct Prerequisites<'p> {
    preconfigured: Option<bool>,
    installed: Option<bool>,
    venvs: HashMap<&'p Path, bool>,
    venv_error: Option<String>,
}

impl<'p> Prerequisites<'p> {
    /// Reason the action cannot run, if any
    fn blocker<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        blade: &BladeInstance,
        action: &'p Action,
    ) -> Option<String> {
        match action.stage() {
            Stage::Preconfigure => None,
            Stage::InstallPackages => {
                (self.preconfigured == Some(false)).then(|| "preconfiguration failed".to_string())
            }
            Stage::DisableServices | Stage::EnableServices => (self.installed == Some(false))
                .then(|| "package installation failed".to_string()),
            Stage::Modules => {
                let venv = action.venv()?;
                let ready = *self.venvs.entry(venv).or_insert_with(|| {
                    match backend.ensure_venv(blade, venv) {
                        Ok(()) => true,
                        Err(e) => {
                            log::warn!(
                                "blade {}: venv {} unavailable: {e:#}",
                                blade.id,
                                venv.display()
                            );
                            self.venv_error = Some(format!("{}: {e:#}", venv.display()));
                            false
                        }
                    }
                });
                (!ready).then(|| format!("venv {} unavailable", venv.display()))
            }
        }
    }

    fn record(&mut self, action: &Action, result: &ActionResult) {
        match action.stage() {
            Stage::Preconfigure => self.preconfigured = Some(result.permits_dependents()),
            Stage::InstallPackages => self.installed = Some(result.permits_dependents()),
            _ => {}
        }
    }
}

fn skip_all<P: ProgressCallback + ?Sized>(
    plan: &ActionPlan,
    reason: &str,
    progress: &mut P,
) -> Vec<ActionReport> {
    plan.actions()
        .iter()
        .enumerate()
        .map(|(index, action)| {
            let result = ActionResult::Skipped {
                reason: reason.to_string(),
            };
            progress.on_action_complete(plan.blade(), index, &result);
            ActionReport {
                index,
                action: action.clone(),
                result,
            }
        })
        .collect()
}

/// Execute one blade's plan
///
/// A failed action does not stop later independent actions; only its
/// dependents are skipped.
pub fn execute_plan<B, P>(
    plan: &ActionPlan,
    backend: &B,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> BladeReport
where
    B: Backend + ?Sized,
    P: ProgressCallback + ?Sized,
{
    let blade = plan.blade();
    progress.on_blade_start(blade, plan.len());

    let mut report = BladeReport {
        blade: blade.clone(),
        fingerprint: plan
            .fingerprint()
            .map_err(|e| log::warn!("blade {}: plan has no fingerprint: {e}", blade.id))
            .ok(),
        prepare_error: None,
        venv_error: None,
        actions: Vec::with_capacity(plan.len()),
    };

    if opts.dry_run {
        report.actions = skip_all(plan, "dry run", progress);
        progress.on_blade_complete(&report);
        return report;
    }

    if !plan.is_empty()
        && let Err(e) = backend.prepare(blade, plan)
    {
        log::warn!("blade {}: preparation failed: {e:#}", blade.id);
        report.prepare_error = Some(format!("{e:#}"));
        report.actions = skip_all(plan, "blade preparation failed", progress);
        progress.on_blade_complete(&report);
        return report;
    }

    let mut prerequisites = Prerequisites::default();
    for (index, action) in plan.actions().iter().enumerate() {
        let result = match prerequisites.blocker(backend, blade, action) {
            Some(reason) => {
                log::debug!("blade {}: skipping '{action}': {reason}", blade.id);
                ActionResult::Skipped { reason }
            }
            None => {
                progress.on_action_start(blade, index, action);
                match backend.apply(blade, action) {
                    Ok(outcome) => {
                        log::debug!("blade {}: {action}: {outcome:?}", blade.id);
                        outcome.into()
                    }
                    Err(e) => {
                        log::warn!("blade {}: {action} failed: {e:#}", blade.id);
                        ActionResult::Failed {
                            error: format!("{e:#}"),
                        }
                    }
                }
            }
        };
        prerequisites.record(action, &result);
        progress.on_action_complete(blade, index, &result);
        report.actions.push(ActionReport {
            index,
            action: action.clone(),
            result,
        });
    }
    report.venv_error = prerequisites.venv_error;

    progress.on_blade_complete(&report);
    report
}

/// Forwards progress from pool threads to one shared callback
struct SharedProgress<'a, 'b, P: ?Sized>(&'a Mutex<&'b mut P>);

impl<P: ProgressCallback + ?Sized> ProgressCallback for SharedProgress<'_, '_, P> {
    fn on_blade_start(&mut self, blade: &BladeInstance, actions: usize) {
        if let Ok(mut progress) = self.0.lock() {
            progress.on_blade_start(blade, actions);
        }
    }

    fn on_action_start(&mut self, blade: &BladeInstance, index: usize, action: &Action) {
        if let Ok(mut progress) = self.0.lock() {
            progress.on_action_start(blade, index, action);
        }
    }

    fn on_action_complete(&mut self, blade: &BladeInstance, index: usize, result: &ActionResult) {
        if let Ok(mut progress) = self.0.lock() {
            progress.on_action_complete(blade, index, result);
        }
    }

    fn on_blade_complete(&mut self, report: &BladeReport) {
        if let Ok(mut progress) = self.0.lock() {
            progress.on_blade_complete(report);
        }
    }
}

/// Execute plans for many blades, `opts.jobs` at a time
///
/// Reports come back in the order of `plans` regardless of completion order.
pub fn execute_fleet<B, P>(
    plans: &[ActionPlan],
    backend: &B,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<FleetReport>
where
    B: Backend + ?Sized,
    P: ProgressCallback + ?Sized,
{
    if opts.jobs <= 1 || plans.len() <= 1 {
        let blades = plans
            .iter()
            .map(|plan| execute_plan(plan, backend, opts, progress))
            .collect();
        return Ok(FleetReport { blades });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {}", e))?;

    let shared = Mutex::new(progress);
    let blades = pool.install(|| {
        plans
            .par_iter()
            .map(|plan| execute_plan(plan, backend, opts, &mut SharedProgress(&shared)))
            .collect()
    });

    Ok(FleetReport { blades })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::plan::build_plan;
    use crate::resolver::resolve_blade;
    use manifest::{Manifest, ModuleEntry, PackageGroup, PythonConfig};
    use std::collections::HashSet;

    /// Mock backend that records calls and fails selected action kinds
    #[derive(Default)]
    struct MockBackend {
        calls: Mutex<Vec<String>>,
        fail_kinds: HashSet<&'static str>,
        fail_prepare: bool,
        fail_venv: bool,
        unchanged: bool,
    }

    impl MockBackend {
        fn failing(kinds: &[&'static str]) -> Self {
            Self {
                fail_kinds: kinds.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Backend for MockBackend {
        fn prepare(&self, blade: &BladeInstance, _plan: &ActionPlan) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{}:prepare", blade.id));
            if self.fail_prepare {
                anyhow::bail!("apt-get update failed");
            }
            Ok(())
        }

        fn ensure_venv(&self, blade: &BladeInstance, venv: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:venv:{}", blade.id, venv.display()));
            if self.fail_venv {
                anyhow::bail!("python3 not found");
            }
            Ok(())
        }

        fn apply(&self, blade: &BladeInstance, action: &Action) -> Result<ActionOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", blade.id, action.kind()));
            if self.fail_kinds.contains(action.kind()) {
                anyhow::bail!("{} failed", action.kind());
            }
            Ok(if self.unchanged {
                ActionOutcome::NoChange
            } else {
                ActionOutcome::Applied
            })
        }
    }

    /// Progress callback that records events
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ProgressCallback for Recorder {
        fn on_blade_start(&mut self, blade: &BladeInstance, actions: usize) {
            self.events.push(format!("start {} {actions}", blade.id));
        }
        fn on_action_start(&mut self, _blade: &BladeInstance, _index: usize, _action: &Action) {}
        fn on_action_complete(&mut self, blade: &BladeInstance, index: usize, _r: &ActionResult) {
            self.events.push(format!("done {} {index}", blade.id));
        }
        fn on_blade_complete(&mut self, report: &BladeReport) {
            self.events.push(format!("end {}", report.blade.id));
        }
    }

    fn manifest() -> Manifest {
        Manifest::new(
            vec![
                PackageGroup::new("base")
                    .with_packages(["kea"])
                    .with_preconfig(["kea kea/start boolean false"])
                    .with_services_enable(["kea-dhcp4-server"]),
            ],
            PythonConfig::new(
                "/root/blade-venv",
                vec![ModuleEntry::pypi("yaml", "PyYAML", None)],
            ),
        )
        .unwrap()
    }

    fn plan(id: &str) -> ActionPlan {
        build_plan(&resolve_blade(&manifest(), &BladeInstance::new(id, "dhcp_blade")).unwrap())
    }

    fn results(report: &BladeReport) -> Vec<&ActionResult> {
        report.actions.iter().map(|r| &r.result).collect()
    }

    #[test]
    fn test_execute_all_applied() {
        let backend = MockBackend::default();
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        assert!(report.is_success());
        assert_eq!(report.summary().applied, 4);
        assert_eq!(
            backend.calls(),
            vec![
                "blade1:prepare",
                "blade1:preconfigure",
                "blade1:install_packages",
                "blade1:enable_service",
                "blade1:venv:/root/blade-venv",
                "blade1:install_module",
            ]
        );
    }

    #[test]
    fn test_no_change_reported() {
        let backend = MockBackend {
            unchanged: true,
            ..Default::default()
        };
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        assert_eq!(report.summary().no_change, 4);
        assert!(report.is_success());
    }

    #[test]
    fn test_failed_install_skips_services_but_not_modules() {
        let backend = MockBackend::failing(&["install_packages"]);
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        let results = results(&report);
        assert_eq!(results[0], &ActionResult::Applied);
        assert!(matches!(results[1], ActionResult::Failed { .. }));
        assert_eq!(
            results[2],
            &ActionResult::Skipped {
                reason: "package installation failed".into()
            }
        );
        assert_eq!(results[3], &ActionResult::Applied);
        assert!(!backend.calls().contains(&"blade1:enable_service".to_string()));
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_failed_preconfigure_skips_install_and_services() {
        let backend = MockBackend::failing(&["preconfigure"]);
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        let summary = report.summary();
        assert_eq!(summary.failed, 1);
        // install skipped, which in turn skips the service action
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.applied, 1);
    }

    #[test]
    fn test_venv_failure_skips_modules() {
        let backend = MockBackend {
            fail_venv: true,
            ..Default::default()
        };
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        assert!(report.venv_error.is_some());
        assert!(matches!(
            results(&report)[3],
            ActionResult::Skipped { .. }
        ));
        assert!(!backend.calls().contains(&"blade1:install_module".to_string()));
        assert_eq!(report.summary().failed, 1);
    }

    #[test]
    fn test_prepare_failure_skips_everything() {
        let backend = MockBackend {
            fail_prepare: true,
            ..Default::default()
        };
        let report = execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        assert!(report.prepare_error.is_some());
        assert_eq!(report.summary().skipped, 4);
        assert_eq!(backend.calls(), vec!["blade1:prepare"]);
    }

    #[test]
    fn test_dry_run_never_touches_backend() {
        let backend = MockBackend::default();
        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = execute_plan(&plan("blade1"), &backend, &opts, &mut NoProgress);
        assert!(backend.calls().is_empty());
        for result in results(&report) {
            assert_eq!(
                result,
                &ActionResult::Skipped {
                    reason: "dry run".into()
                }
            );
        }
    }

    #[test]
    fn test_empty_plan_skips_prepare() {
        let empty = Manifest::new(vec![], PythonConfig::default()).unwrap();
        let plan = build_plan(&resolve_blade(&empty, &BladeInstance::new("b", "web")).unwrap());
        let backend = MockBackend::default();
        let report = execute_plan(&plan, &backend, &ExecuteOptions::default(), &mut NoProgress);
        assert!(backend.calls().is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_progress_events_in_plan_order() {
        let backend = MockBackend::default();
        let mut recorder = Recorder::default();
        execute_plan(
            &plan("blade1"),
            &backend,
            &ExecuteOptions::default(),
            &mut recorder,
        );
        assert_eq!(
            recorder.events,
            vec![
                "start blade1 4",
                "done blade1 0",
                "done blade1 1",
                "done blade1 2",
                "done blade1 3",
                "end blade1",
            ]
        );
    }

    #[test]
    fn test_fleet_reports_in_input_order() {
        let plans: Vec<_> = (0..8).map(|i| plan(&format!("blade{i}"))).collect();
        let backend = MockBackend::default();
        let mut recorder = Recorder::default();
        let opts = ExecuteOptions {
            jobs: 4,
            ..Default::default()
        };
        let fleet = execute_fleet(&plans, &backend, &opts, &mut recorder).unwrap();
        let ids: Vec<_> = fleet.blades.iter().map(|r| r.blade.id.clone()).collect();
        let expected: Vec<_> = (0..8).map(|i| format!("blade{i}")).collect();
        assert_eq!(ids, expected);
        assert!(fleet.is_success());
        assert_eq!(fleet.summary().applied, 32);
        assert_eq!(recorder.events.len(), 8 * 6);

        // Each blade's own calls stay in plan order
        let calls = backend.calls();
        for id in &expected {
            let own: Vec<_> = calls
                .iter()
                .filter(|c| c.starts_with(&format!("{id}:")))
                .cloned()
                .collect();
            assert_eq!(own.first().unwrap(), &format!("{id}:prepare"));
            assert_eq!(own.last().unwrap(), &format!("{id}:install_module"));
        }
    }

    #[test]
    fn test_fleet_sequential_with_one_job() {
        let plans = vec![plan("a"), plan("b")];
        let backend = MockBackend::failing(&["enable_service"]);
        let opts = ExecuteOptions {
            jobs: 1,
            ..Default::default()
        };
        let fleet = execute_fleet(&plans, &backend, &opts, &mut NoProgress).unwrap();
        assert!(!fleet.is_success());
        assert_eq!(fleet.summary().failed, 2);
        assert_eq!(backend.calls()[0], "a:prepare");
    }

    #[test]
    fn test_report_fingerprint_matches_plan() {
        let plan = plan("blade1");
        let report = execute_plan(
            &plan,
            &MockBackend::default(),
            &ExecuteOptions::default(),
            &mut NoProgress,
        );
        assert_eq!(report.fingerprint, Some(plan.fingerprint().unwrap()));
    }
}
