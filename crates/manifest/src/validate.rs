//! Manifest invariant checks
//!
//! Run on every manifest built through [`Manifest::new`], after parsing, and
//! after each overlay step of a merge.

use std::collections::HashSet;

use crate::error::{Result, ValidationError, ValidationErrorKind};
use crate::types::{Manifest, ModuleSource};

pub(crate) fn group_path(name: &str) -> String {
    format!("platform.packages.{name}")
}

pub(crate) fn module_path(key: &str) -> String {
    format!("platform.python.modules.{key}")
}

pub(crate) fn validate(manifest: &Manifest) -> Result<()> {
    let mut seen_groups = HashSet::new();
    for group in &manifest.groups {
        if !seen_groups.insert(group.name.as_str()) {
            return Err(ValidationError::new(
                group_path(&group.name),
                ValidationErrorKind::DuplicateGroup {
                    name: group.name.clone(),
                },
            ));
        }

        if let Some(service) = group
            .services_enable
            .iter()
            .find(|s| group.services_disable.contains(s))
        {
            return Err(ValidationError::new(
                format!("{}.services_enable", group_path(&group.name)),
                ValidationErrorKind::ServiceConflict {
                    service: service.clone(),
                },
            ));
        }
    }

    let mut seen_modules = HashSet::new();
    for module in &manifest.python.modules {
        let path = module_path(&module.key);
        if !seen_modules.insert(module.key.as_str()) {
            return Err(ValidationError::new(
                path,
                ValidationErrorKind::DuplicateModule {
                    key: module.key.clone(),
                },
            ));
        }
        if module.module_name.trim().is_empty() {
            return Err(ValidationError::new(
                format!("{path}.module_name"),
                ValidationErrorKind::EmptyModuleName,
            ));
        }
        if let ModuleSource::VersionControl { url, .. } = &module.source
            && url.trim().is_empty()
        {
            return Err(ValidationError::new(
                format!("{path}.metadata.url"),
                ValidationErrorKind::MissingField {
                    field: "url".to_string(),
                },
            ));
        }
    }

    let venv_missing = manifest
        .python
        .blade_venv_path
        .as_ref()
        .is_none_or(|p| p.as_os_str().is_empty());
    if !manifest.python.modules.is_empty() && venv_missing {
        return Err(ValidationError::new(
            "platform.python.blade_venv_path",
            ValidationErrorKind::MissingVenvPath,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModuleEntry, PackageGroup, PythonConfig};

    #[test]
    fn test_duplicate_group_rejected() {
        let err = Manifest::new(
            vec![PackageGroup::new("base"), PackageGroup::new("base")],
            PythonConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.path, "platform.packages.base");
        assert!(matches!(err.kind, ValidationErrorKind::DuplicateGroup { .. }));
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let python = PythonConfig::new(
            "/root/blade-venv",
            vec![
                ModuleEntry::pypi("pyyaml", "PyYAML", None),
                ModuleEntry::pypi("pyyaml", "PyYAML", Some("6.0")),
            ],
        );
        let err = Manifest::new(vec![], python).unwrap_err();
        assert_eq!(err.path, "platform.python.modules.pyyaml");
    }

    #[test]
    fn test_blank_module_name_rejected() {
        let python = PythonConfig::new(
            "/root/blade-venv",
            vec![ModuleEntry::pypi("pyyaml", "  ", None)],
        );
        let err = Manifest::new(vec![], python).unwrap_err();
        assert_eq!(err.path, "platform.python.modules.pyyaml.module_name");
        assert_eq!(err.kind, ValidationErrorKind::EmptyModuleName);
    }

    #[test]
    fn test_modules_require_venv() {
        let python = PythonConfig {
            blade_venv_path: None,
            modules: vec![ModuleEntry::pypi("pyyaml", "PyYAML", None)],
        };
        let err = Manifest::new(vec![], python).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingVenvPath);
    }

    #[test]
    fn test_no_modules_no_venv_is_fine() {
        assert!(Manifest::new(vec![PackageGroup::new("base")], PythonConfig::default()).is_ok());
    }

    #[test]
    fn test_services_may_repeat_across_groups() {
        // Only a conflict inside one group is invalid
        let manifest = Manifest::new(
            vec![
                PackageGroup::new("a").with_services_disable(["nginx"]),
                PackageGroup::new("b").with_services_enable(["nginx"]),
            ],
            PythonConfig::default(),
        );
        assert!(manifest.is_ok());
    }
}
