//! Error types for the planner crate

use thiserror::Error;

/// Inventory defects found while resolving blades against a manifest
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("blade '{id}' appears more than once in the inventory")]
    DuplicateBlade { id: String },

    #[error("inventory entry {index} has an empty blade id")]
    EmptyBladeId { index: usize },

    #[error("blade '{id}' has an empty class label")]
    EmptyClass { id: String },

    #[error("blade '{id}' is not in the inventory")]
    BladeNotFound { id: String },
}
