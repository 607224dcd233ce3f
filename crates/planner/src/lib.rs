//! # Planner
//!
//! Turns a validated blade manifest plus a live inventory into ordered,
//! per-blade installation plans, and drives a backend through them.
//!
//! ## Core Concepts
//!
//! - **Resolution**: which package groups and modules apply to each blade
//! - **ActionPlan**: the ordered, immutable list of actions for one blade
//! - **Backend**: something that can apply actions idempotently
//! - **Executor**: runs plans sequentially per blade, blades in parallel
//!
//! ## Example
//!
//! ```ignore
//! use planner::{
//!     Backend, BladeInstance, ExecuteOptions, Inventory, NoProgress, build_plans,
//!     execute_fleet, resolve,
//! };
//!
//! let manifest = manifest::load_manifest("platform.yaml".as_ref())?;
//! let inventory = Inventory::new(vec![
//!     BladeInstance::new("blade1", "dhcp_blade"),
//!     BladeInstance::new("blade2", "web"),
//! ]);
//!
//! let resolution = resolve(&manifest, &inventory)?;
//! let plans = build_plans(&resolution);
//! for plan in &plans {
//!     println!("{}: {}", plan.blade(), plan.summary());
//! }
//!
//! let report = execute_fleet(&plans, &my_backend, &ExecuteOptions::default(), &mut NoProgress)?;
//! assert!(report.is_success());
//! ```
//!
//! Planning is pure: the same manifest and inventory always produce the same
//! plans, byte for byte. All I/O lives behind [`Backend`].

pub mod context;
pub mod error;
pub mod executor;
pub mod plan;
pub mod resolver;
pub mod source;
pub mod types;

// Re-export main types at crate root
pub use context::{NoProgress, ProgressCallback};
pub use error::ResolutionError;
pub use executor::{
    ActionReport, Backend, BladeReport, FleetReport, execute_fleet, execute_plan,
};
pub use plan::{Action, ActionPlan, PlanSummary, Stage, build_plan, build_plans};
pub use resolver::{BladeSelection, Resolution, resolve, resolve_blade};
pub use source::{FetchAction, resolve_source};
pub use types::{
    ActionOutcome, ActionResult, BladeInstance, ExecuteOptions, ExecuteSummary, Inventory,
};
