//! Progress reporting for plan execution
//!
//! The planner has no UI dependency; binaries implement this trait to drive
//! progress bars or log lines.

use crate::executor::BladeReport;
use crate::plan::Action;
use crate::types::{ActionResult, BladeInstance};

/// Progress callback for execution operations
///
/// During fleet execution callbacks for different blades interleave, but the
/// callbacks for one blade arrive in plan order.
pub trait ProgressCallback: Send {
    /// Called before the first action of a blade
    fn on_blade_start(&mut self, blade: &BladeInstance, actions: usize);

    /// Called when starting a single action
    fn on_action_start(&mut self, blade: &BladeInstance, index: usize, action: &Action);

    /// Called when an action finishes, fails or is skipped
    fn on_action_complete(&mut self, blade: &BladeInstance, index: usize, result: &ActionResult);

    /// Called after the last action of a blade
    fn on_blade_complete(&mut self, report: &BladeReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_blade_start(&mut self, _blade: &BladeInstance, _actions: usize) {}
    fn on_action_start(&mut self, _blade: &BladeInstance, _index: usize, _action: &Action) {}
    fn on_action_complete(&mut self, _blade: &BladeInstance, _index: usize, _result: &ActionResult) {
    }
    fn on_blade_complete(&mut self, _report: &BladeReport) {}
}
