//! Blade-class resolution: which groups and modules apply to which blade

use manifest::{Manifest, ModuleEntry, PackageGroup, PythonConfig};
use std::collections::HashSet;

use crate::error::ResolutionError;
use crate::types::{BladeInstance, Inventory};

/// Everything that applies to one blade
#[derive(Debug, Clone, PartialEq)]
pub struct BladeSelection<'m> {
    pub blade: BladeInstance,
    /// Applicable groups in manifest declaration order
    pub groups: Vec<&'m PackageGroup>,
    /// Python configuration; every module applies to every blade
    pub python: &'m PythonConfig,
}

impl BladeSelection<'_> {
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.python.modules
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }
}

/// Selections for a whole inventory, in inventory order
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'m> {
    selections: Vec<BladeSelection<'m>>,
}

impl<'m> Resolution<'m> {
    pub fn selections(&self) -> &[BladeSelection<'m>] {
        &self.selections
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BladeSelection<'m>> {
        self.selections.iter()
    }

    /// The selection for one blade id
    pub fn for_blade(&self, id: &str) -> Result<&BladeSelection<'m>, ResolutionError> {
        self.selections
            .iter()
            .find(|s| s.blade.id == id)
            .ok_or_else(|| ResolutionError::BladeNotFound { id: id.to_string() })
    }

    /// Keep only the named blade
    pub fn only(self, id: &str) -> Result<Self, ResolutionError> {
        let selection = self
            .selections
            .into_iter()
            .find(|s| s.blade.id == id)
            .ok_or_else(|| ResolutionError::BladeNotFound { id: id.to_string() })?;
        Ok(Self {
            selections: vec![selection],
        })
    }
}

impl<'a, 'm> IntoIterator for &'a Resolution<'m> {
    type Item = &'a BladeSelection<'m>;
    type IntoIter = std::slice::Iter<'a, BladeSelection<'m>>;

    fn into_iter(self) -> Self::IntoIter {
        self.selections.iter()
    }
}

fn check_blade(index: usize, blade: &BladeInstance) -> Result<(), ResolutionError> {
    if blade.id.trim().is_empty() {
        return Err(ResolutionError::EmptyBladeId { index });
    }
    if blade.class.trim().is_empty() {
        return Err(ResolutionError::EmptyClass {
            id: blade.id.clone(),
        });
    }
    Ok(())
}

fn select<'m>(manifest: &'m Manifest, blade: &BladeInstance) -> BladeSelection<'m> {
    let groups: Vec<_> = manifest
        .groups()
        .iter()
        .filter(|g| g.applies_to(&blade.class))
        .collect();
    log::debug!(
        "blade {} selects {} of {} groups",
        blade,
        groups.len(),
        manifest.groups().len()
    );
    BladeSelection {
        blade: blade.clone(),
        groups,
        python: manifest.python(),
    }
}

/// Resolve a single blade against a manifest
pub fn resolve_blade<'m>(
    manifest: &'m Manifest,
    blade: &BladeInstance,
) -> Result<BladeSelection<'m>, ResolutionError> {
    check_blade(0, blade)?;
    Ok(select(manifest, blade))
}

/// Resolve every blade in an inventory against a manifest
///
/// A blade class that no group mentions is logged and otherwise ignored: the
/// blade still receives unrestricted groups and all modules.
pub fn resolve<'m>(
    manifest: &'m Manifest,
    inventory: &Inventory,
) -> Result<Resolution<'m>, ResolutionError> {
    let mut seen = HashSet::new();
    for (index, blade) in inventory.blades().iter().enumerate() {
        check_blade(index, blade)?;
        if !seen.insert(blade.id.as_str()) {
            return Err(ResolutionError::DuplicateBlade {
                id: blade.id.clone(),
            });
        }
    }

    let mentioned = manifest.blade_classes_mentioned();
    let mut warned = HashSet::new();
    for blade in inventory.blades() {
        if !mentioned.contains(blade.class.as_str()) && warned.insert(blade.class.as_str()) {
            log::warn!(
                "blade class '{}' (blade {}) is not mentioned by any package group",
                blade.class,
                blade.id
            );
        }
    }

    let selections = inventory
        .blades()
        .iter()
        .map(|blade| select(manifest, blade))
        .collect();
    Ok(Resolution { selections })
}
