//! Overlay documents and the merge that applies them

use std::path::PathBuf;

use crate::error::Result;
use crate::types::{
    BladeClasses, Manifest, ModuleEntry, PackageGroup, PythonConfig, dedup, extend_unique,
};

/// A partial manifest applied on top of a base
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Overlay {
    /// Group entries in overlay order
    pub groups: Vec<OverlayGroup>,
    pub python: Option<OverlayPython>,
}

/// Overlay entry for one package group; every field is optional
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayGroup {
    pub name: String,
    /// `None` inherits the base filter, `Some` replaces it
    pub blade_classes: Option<BladeClasses>,
    pub packages: Option<Vec<String>>,
    /// Replace the base package list instead of appending to it
    pub replace_packages: bool,
    pub preconfig_settings: Vec<String>,
    pub services_enable: Vec<String>,
    pub services_disable: Vec<String>,
}

impl OverlayGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_blade_classes(mut self, blade_classes: BladeClasses) -> Self {
        self.blade_classes = Some(blade_classes);
        self
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = Some(packages.into_iter().map(Into::into).collect());
        self
    }

    pub fn replacing_packages(mut self) -> Self {
        self.replace_packages = true;
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

    fn into_group(self) -> PackageGroup {
        PackageGroup {
            name: self.name,
            blade_classes: self.blade_classes.unwrap_or_default(),
            packages: dedup(self.packages.unwrap_or_default()),
            preconfig_settings: self.preconfig_settings,
            services_enable: self.services_enable,
            services_disable: self.services_disable,
        }
    }

    fn apply_to(&self, group: &mut PackageGroup) {
        if let Some(classes) = &self.blade_classes {
            group.blade_classes = classes.clone();
        }
        if self.replace_packages {
            group.packages = dedup(self.packages.clone().unwrap_or_default());
        } else if let Some(packages) = &self.packages {
            extend_unique(&mut group.packages, packages);
        }
        group
            .preconfig_settings
            .extend(self.preconfig_settings.iter().cloned());
        extend_unique(&mut group.services_enable, &self.services_enable);
        extend_unique(&mut group.services_disable, &self.services_disable);
    }
}

/// Overlay entry for the python configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayPython {
    /// Replaces the base venv path when set
    pub blade_venv_path: Option<PathBuf>,
    /// Entries replace base entries with the same key, or are appended
    pub modules: Vec<ModuleEntry>,
}

impl Overlay {
    /// An overlay that changes nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: OverlayGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_module(mut self, module: ModuleEntry) -> Self {
        self.python
            .get_or_insert_with(OverlayPython::default)
            .modules
            .push(module);
        self
    }

    pub fn with_venv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python
            .get_or_insert_with(OverlayPython::default)
            .blade_venv_path = Some(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.python.is_none()
    }

    /// Apply this overlay to a manifest without validating the result
    fn apply(&self, base: &Manifest) -> (Vec<PackageGroup>, PythonConfig) {
        let mut groups = base.groups.clone();
        for entry in &self.groups {
            match groups.iter_mut().find(|g| g.name == entry.name) {
                Some(group) => entry.apply_to(group),
                None => groups.push(entry.clone().into_group()),
            }
        }

        let mut python = base.python.clone();
        if let Some(overlay) = &self.python {
            if let Some(path) = &overlay.blade_venv_path {
                python.blade_venv_path = Some(path.clone());
            }
            for module in &overlay.modules {
                match python.modules.iter_mut().find(|m| m.key == module.key) {
                    Some(existing) => *existing = module.clone(),
                    None => python.modules.push(module.clone()),
                }
            }
        }

        (groups, python)
    }
}

/// Apply overlays to a base manifest in order, later overlays winning.
///
/// The intermediate manifest is validated after every overlay, and the first
/// violation fails the whole merge. The base is never modified.
pub fn merge(base: &Manifest, overlays: &[Overlay]) -> Result<Manifest> {
    let mut current = base.clone();
    for (step, overlay) in overlays.iter().enumerate() {
        let (groups, python) = overlay.apply(&current);
        current = Manifest::new(groups, python)?;
        log::debug!(
            "applied overlay {} of {}: {}",
            step + 1,
            overlays.len(),
            current.summary()
        );
    }
    Ok(current)
}
