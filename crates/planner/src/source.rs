//! Module source resolution
//!
//! Turns a module entry into a backend-agnostic fetch description. No network
//! access happens here; resolving a reference to a commit is the backend's job.

use manifest::{ModuleEntry, ModuleSource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a backend should obtain a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchAction {
    /// Clone or fetch a repository at a reference (default branch when `None`)
    VersionControl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// Install from a package index, optionally constrained
    PackageIndex {
        module_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_constraint: Option<String>,
    },
}

impl fmt::Display for FetchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionControl {
                url,
                reference: Some(reference),
            } => write!(f, "{url} @ {reference}"),
            Self::VersionControl {
                url,
                reference: None,
            } => write!(f, "{url} (default branch)"),
            Self::PackageIndex {
                module_name,
                version_constraint: Some(constraint),
            } => write!(f, "{module_name} {constraint}"),
            Self::PackageIndex {
                module_name,
                version_constraint: None,
            } => write!(f, "{module_name} (latest)"),
        }
    }
}

/// Describe how to fetch a module entry
pub fn resolve_source(entry: &ModuleEntry) -> FetchAction {
    match &entry.source {
        ModuleSource::VersionControl { url, reference } => FetchAction::VersionControl {
            url: url.clone(),
            reference: reference.clone(),
        },
        ModuleSource::PackageIndex { version_constraint } => FetchAction::PackageIndex {
            module_name: entry.module_name.clone(),
            version_constraint: version_constraint.clone(),
        },
    }
}
