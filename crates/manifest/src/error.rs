//! Error types for the manifest crate

use std::path::PathBuf;
use thiserror::Error;

/// A manifest (or overlay) that is malformed or breaks an invariant.
///
/// `path` is the dotted key path of the offending entry, e.g.
/// `platform.packages.dhcp.services_enable`. It is empty only when the
/// document itself could not be read as a mapping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid manifest at '{path}': {kind}")]
pub struct ValidationError {
    /// Dotted key path of the offending entry
    pub path: String,
    /// What is wrong with it
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Create an error for the given key path
    pub fn new(path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// The specific invariant a manifest violated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A package group key appears more than once
    #[error("duplicate package group '{name}'")]
    DuplicateGroup { name: String },

    /// A module key appears more than once
    #[error("duplicate module '{key}'")]
    DuplicateModule { key: String },

    /// A group both enables and disables the same service
    #[error("service '{service}' is both enabled and disabled in the same group")]
    ServiceConflict { service: String },

    /// `source_type` is not one of the known module sources
    #[error("unknown source type '{value}' (expected 'git' or 'pypi')")]
    UnknownSourceType { value: String },

    /// `module_name` is missing or blank
    #[error("module_name must not be empty")]
    EmptyModuleName,

    /// A required field is absent
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// Modules are declared but there is nowhere to install them
    #[error("blade_venv_path is required when python modules are declared")]
    MissingVenvPath,

    /// The document could not be decoded into the manifest shape
    #[error("{message}")]
    Malformed { message: String },
}

/// Errors from reading manifest or overlay files
#[derive(Error, Debug)]
pub enum LoadError {
    /// The file could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but its content is invalid
    #[error("{}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

impl LoadError {
    /// The validation error behind this failure, if any
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Invalid { source, .. } => Some(source),
            Self::Io { .. } => None,
        }
    }
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ValidationError>;
