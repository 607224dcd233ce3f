//! Core types for blade planning and execution

use serde::{Deserialize, Serialize};
use std::fmt;

/// A blade instance supplied by the provisioning layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BladeInstance {
    /// Unique blade identifier
    pub id: String,
    /// Class label matched against package group filters
    pub class: String,
    /// Network address used to reach the blade, if it differs from the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl BladeInstance {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Address to connect to, falling back to the id
    pub fn host(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Display for BladeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.class)
    }
}

/// The live set of blades to plan for, in provisioning order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub blades: Vec<BladeInstance>,
}

impl Inventory {
    pub fn new(blades: Vec<BladeInstance>) -> Self {
        Self { blades }
    }

    pub fn blades(&self) -> &[BladeInstance] {
        &self.blades
    }

    pub fn get(&self, id: &str) -> Option<&BladeInstance> {
        self.blades.iter().find(|b| b.id == id)
    }

    pub fn len(&self) -> usize {
        self.blades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blades.is_empty()
    }
}

impl FromIterator<BladeInstance> for Inventory {
    fn from_iter<I: IntoIterator<Item = BladeInstance>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// What a backend reports after applying one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The blade was changed
    Applied,
    /// The blade already matched the action
    NoChange,
}

/// Result of one action in an execution report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    /// The blade was changed
    Applied,
    /// Nothing needed doing
    NoChange,
    /// Apply failed
    Failed { error: String },
    /// Not attempted
    Skipped { reason: String },
}

impl ActionResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Whether dependents of this action may run
    pub fn permits_dependents(&self) -> bool {
        matches!(self, Self::Applied | Self::NoChange)
    }
}

impl From<ActionOutcome> for ActionResult {
    fn from(outcome: ActionOutcome) -> Self {
        match outcome {
            ActionOutcome::Applied => Self::Applied,
            ActionOutcome::NoChange => Self::NoChange,
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub applied: usize,
    pub no_change: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of results counted
    pub fn total(&self) -> usize {
        self.applied + self.no_change + self.skipped + self.failed
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.applied += other.applied;
        self.no_change += other.no_change;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ActionResult) {
        match result {
            ActionResult::Applied => self.applied += 1,
            ActionResult::NoChange => self.no_change += 1,
            ActionResult::Failed { .. } => self.failed += 1,
            ActionResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

impl fmt::Display for ExecuteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} unchanged, {} skipped, {} failed",
            self.applied, self.no_change, self.skipped, self.failed
        )
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't touch the backend, report every action as skipped
    pub dry_run: bool,
    /// Number of blades provisioned in parallel
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blade_host_falls_back_to_id() {
        let blade = BladeInstance::new("blade1", "dhcp_blade");
        assert_eq!(blade.host(), "blade1");
        assert_eq!(blade.with_address("10.0.0.5").host(), "10.0.0.5");
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_result(&ActionResult::Applied);
        summary.add_result(&ActionResult::NoChange);
        summary.add_result(&ActionResult::Failed {
            error: "boom".into(),
        });
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());

        let mut total = ExecuteSummary::default();
        total.merge(&summary);
        total.merge(&summary);
        assert_eq!(total.applied, 2);
        assert_eq!(total.failed, 2);
    }

    #[test]
    fn test_only_success_permits_dependents() {
        assert!(ActionResult::Applied.permits_dependents());
        assert!(ActionResult::NoChange.permits_dependents());
        assert!(!ActionResult::Skipped { reason: "x".into() }.permits_dependents());
        assert!(!ActionResult::Failed { error: "x".into() }.permits_dependents());
    }

    #[test]
    fn test_inventory_lookup() {
        let inventory: Inventory = [
            BladeInstance::new("blade1", "dhcp_blade"),
            BladeInstance::new("blade2", "web"),
        ]
        .into_iter()
        .collect();
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.get("blade2").unwrap().class, "web");
        assert!(inventory.get("blade3").is_none());
    }
}
