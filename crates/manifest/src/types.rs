//! Data types for the manifest crate

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, ValidationErrorKind};
use crate::validate;

/// Which blade classes a package group targets
///
/// A document `null` (or a missing key) means every blade; an explicit list
/// restricts the group to those classes, and an empty list matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BladeClasses {
    /// Apply to all blades
    #[default]
    Unrestricted,
    /// Apply only to blades whose class is in the set
    Restricted(BTreeSet<String>),
}

impl BladeClasses {
    /// Build a restricted filter from class names
    pub fn restricted<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Restricted(classes.into_iter().map(Into::into).collect())
    }

    /// A restricted filter that matches no blade at all
    pub fn nowhere() -> Self {
        Self::Restricted(BTreeSet::new())
    }

    /// Whether a blade of the given class is targeted
    pub fn matches(&self, class: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Restricted(classes) => classes.contains(class),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Convert to the nullable-list form used in documents
    pub fn to_list(&self) -> Option<Vec<String>> {
        match self {
            Self::Unrestricted => None,
            Self::Restricted(classes) => Some(classes.iter().cloned().collect()),
        }
    }

    /// Convert from the nullable-list form used in documents
    pub fn from_list(list: Option<Vec<String>>) -> Self {
        match list {
            None => Self::Unrestricted,
            Some(classes) => Self::restricted(classes),
        }
    }
}

/// A named set of OS packages with their preseed answers and service states
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageGroup {
    /// Group key, unique within a manifest
    pub name: String,
    /// Blade classes this group applies to
    pub blade_classes: BladeClasses,
    /// Packages to install, in declaration order
    pub packages: Vec<String>,
    /// debconf preseed directives applied before installation
    pub preconfig_settings: Vec<String>,
    /// Services to enable after installation (first-declaration order, no repeats)
    pub services_enable: Vec<String>,
    /// Services to disable after installation (first-declaration order, no repeats)
    pub services_disable: Vec<String>,
}

impl PackageGroup {
    /// Create an empty, unrestricted group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_blade_classes(mut self, blade_classes: BladeClasses) -> Self {
        self.blade_classes = blade_classes;
        self
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = dedup(packages.into_iter().map(Into::into));
        self
    }

    pub fn with_preconfig<I, S>(mut self, settings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preconfig_settings = settings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_services_enable<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services_enable = dedup(services.into_iter().map(Into::into));
        self
    }

    pub fn with_services_disable<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services_disable = dedup(services.into_iter().map(Into::into));
        self
    }

    /// Whether this group applies to a blade of the given class
    pub fn applies_to(&self, class: &str) -> bool {
        self.blade_classes.matches(class)
    }
}

/// The source-type tag of a module entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Fetched from a version-controlled repository
    VersionControl,
    /// Fetched from a package index
    PackageIndex,
}

impl SourceType {
    /// Canonical document spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionControl => "git",
            Self::PackageIndex => "pypi",
        }
    }
}

impl FromStr for SourceType {
    type Err = ValidationErrorKind;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "git" | "version-control" | "vcs" => Ok(Self::VersionControl),
            "pypi" | "package-index" | "pip" => Ok(Self::PackageIndex),
            other => Err(ValidationErrorKind::UnknownSourceType {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a python module comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A repository URL plus a tag, branch or commit
    ///
    /// `reference: None` means the remote's default branch.
    VersionControl {
        url: String,
        reference: Option<String>,
    },
    /// A package index name with an optional version constraint
    ///
    /// `version_constraint: None` means whatever the installer considers latest.
    PackageIndex { version_constraint: Option<String> },
}

impl ModuleSource {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::VersionControl { .. } => SourceType::VersionControl,
            Self::PackageIndex { .. } => SourceType::PackageIndex,
        }
    }
}

/// One python module to install into (or remove from) the blade venv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Human label, unique within the python config
    pub key: String,
    /// The installable unit's name
    pub module_name: String,
    /// Ensure absent instead of present
    pub delete: bool,
    pub source: ModuleSource,
}

impl ModuleEntry {
    pub fn git(
        key: impl Into<String>,
        module_name: impl Into<String>,
        url: impl Into<String>,
        reference: Option<&str>,
    ) -> Self {
        Self {
            key: key.into(),
            module_name: module_name.into(),
            delete: false,
            source: ModuleSource::VersionControl {
                url: url.into(),
                reference: reference.map(str::to_string),
            },
        }
    }

    pub fn pypi(
        key: impl Into<String>,
        module_name: impl Into<String>,
        version_constraint: Option<&str>,
    ) -> Self {
        Self {
            key: key.into(),
            module_name: module_name.into(),
            delete: false,
            source: ModuleSource::PackageIndex {
                version_constraint: version_constraint.map(str::to_string),
            },
        }
    }

    /// Mark the entry for removal
    pub fn deleted(mut self) -> Self {
        self.delete = true;
        self
    }
}

/// Python configuration shared by every blade
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PythonConfig {
    /// Virtual environment every module is installed into
    pub blade_venv_path: Option<PathBuf>,
    /// Modules in declaration order
    pub modules: Vec<ModuleEntry>,
}

impl PythonConfig {
    pub fn new(blade_venv_path: impl Into<PathBuf>, modules: Vec<ModuleEntry>) -> Self {
        Self {
            blade_venv_path: Some(blade_venv_path.into()),
            modules,
        }
    }

    pub fn venv_path(&self) -> Option<&Path> {
        self.blade_venv_path.as_deref()
    }

    pub fn module(&self, key: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.key == key)
    }
}

/// A validated provisioning manifest
///
/// Values are immutable once built; overlays produce new manifests through
/// [`crate::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub(crate) groups: Vec<PackageGroup>,
    pub(crate) python: PythonConfig,
}

impl Manifest {
    /// Build a manifest, checking every invariant
    pub fn new(groups: Vec<PackageGroup>, python: PythonConfig) -> Result<Self> {
        let manifest = Self { groups, python };
        validate::validate(&manifest)?;
        Ok(manifest)
    }

    /// Package groups in declaration order
    pub fn groups(&self) -> &[PackageGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&PackageGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn python(&self) -> &PythonConfig {
        &self.python
    }

    /// Modules in declaration order
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.python.modules
    }

    /// Every blade class named by any restricted group
    pub fn blade_classes_mentioned(&self) -> BTreeSet<&str> {
        self.groups
            .iter()
            .filter_map(|g| match &g.blade_classes {
                BladeClasses::Restricted(classes) => Some(classes),
                BladeClasses::Unrestricted => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            group_count: self.groups.len(),
            package_count: self.groups.iter().map(|g| g.packages.len()).sum(),
            service_count: self
                .groups
                .iter()
                .map(|g| g.services_enable.len() + g.services_disable.len())
                .sum(),
            module_count: self.python.modules.len(),
        }
    }

    /// Apply overlays in order, see [`crate::merge`]
    pub fn merged(&self, overlays: &[crate::Overlay]) -> Result<Self> {
        crate::merge(self, overlays)
    }
}

/// Counts describing a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestSummary {
    pub group_count: usize,
    pub package_count: usize,
    pub service_count: usize,
    pub module_count: usize,
}

impl fmt::Display for ManifestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} groups, {} packages, {} service states, {} modules",
            self.group_count, self.package_count, self.service_count, self.module_count
        )
    }
}

/// Drop repeated items, keeping each at its first position
pub(crate) fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Append items that are not already present
pub(crate) fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
