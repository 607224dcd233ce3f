//! # Manifest
//!
//! Typed provisioning manifests for virtual blades.
//!
//! This crate provides functionality to:
//! - Parse YAML, JSON or TOML manifest documents into validated values
//! - Reject documents that break an invariant, naming the offending key path
//! - Merge ordered overlays onto a base manifest
//! - Render an effective manifest back to the document shape
//!
//! ## Example
//!
//! ```no_run
//! use manifest::{DocumentFormat, load_manifest, load_overlay};
//! use std::path::Path;
//!
//! let base = load_manifest(Path::new("platform.yaml"))?;
//! let site = load_overlay(Path::new("site.yaml"))?;
//! let effective = base.merged(&[site])?;
//!
//! println!("{}", effective.summary());
//! println!("{}", effective.to_document(DocumentFormat::Yaml).unwrap_or_default());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod document;
mod error;
mod overlay;
mod types;
mod validate;

pub use document::{DocumentFormat, parse_manifest, parse_overlay};
pub use error::{LoadError, Result, ValidationError, ValidationErrorKind};
pub use overlay::{Overlay, OverlayGroup, OverlayPython, merge};
pub use types::{
    BladeClasses, Manifest, ManifestSummary, ModuleEntry, ModuleSource, PackageGroup,
    PythonConfig, SourceType,
};

use std::path::Path;

fn read(path: &Path) -> std::result::Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(path: &Path) -> impl FnOnce(ValidationError) -> LoadError + '_ {
    move |source| LoadError::Invalid {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and validate a base manifest, detecting the format from the extension
pub fn load_manifest(path: &Path) -> std::result::Result<Manifest, LoadError> {
    let content = read(path)?;
    let manifest =
        parse_manifest(&content, DocumentFormat::from_path(path)).map_err(invalid(path))?;
    log::debug!("loaded manifest {}: {}", path.display(), manifest.summary());
    Ok(manifest)
}

/// Read an overlay document
pub fn load_overlay(path: &Path) -> std::result::Result<Overlay, LoadError> {
    let content = read(path)?;
    let overlay =
        parse_overlay(&content, DocumentFormat::from_path(path)).map_err(invalid(path))?;
    log::debug!(
        "loaded overlay {} ({} groups)",
        path.display(),
        overlay.groups.len()
    );
    Ok(overlay)
}

/// Load a base manifest and apply overlay files in order
pub fn load_effective(
    manifest: &Path,
    overlays: &[impl AsRef<Path>],
) -> std::result::Result<Manifest, LoadError> {
    let mut current = load_manifest(manifest)?;
    for path in overlays {
        let path = path.as_ref();
        let overlay = load_overlay(path)?;
        current = merge(&current, &[overlay]).map_err(invalid(path))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASE: &str = r#"
platform:
  packages:
    base:
      packages: [vim]
    dhcp:
      blade_classes: null
      packages: [kea]
  python:
    blade_venv_path: /root/blade-venv
    modules:
      sushi-tools:
        module_name: sushy-tools
        source_type: git
        metadata:
          url: https://github.com/Cray-HPE/sushy-tools.git
          version: With-Libvirt-By-Name
"#;

    const OVERLAY: &str = r#"
platform:
  packages:
    dhcp:
      blade_classes: [dhcp_blade]
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_manifest_and_overlay() {
        let dir = TempDir::new().unwrap();
        let base = write(&dir, "platform.yaml", BASE);
        let overlay = write(&dir, "site.yml", OVERLAY);

        let effective = load_effective(&base, &[overlay]).unwrap();
        assert_eq!(
            effective.group("dhcp").unwrap().blade_classes,
            BladeClasses::restricted(["dhcp_blade"])
        );
        assert!(effective.group("base").unwrap().blade_classes.is_unrestricted());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_manifest(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.validation().is_none());
    }

    #[test]
    fn test_load_reports_path_of_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "dup.yaml",
            "platform:\n  packages:\n    network_virtualization: {}\n    network_virtualization: {}\n",
        );
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("dup.yaml"));
        let validation = err.validation().unwrap();
        assert_eq!(validation.path, "platform.packages.network_virtualization");
    }

    #[test]
    fn test_overlay_violation_names_overlay_file() {
        let dir = TempDir::new().unwrap();
        let base = write(&dir, "platform.yaml", BASE);
        let bad = write(
            &dir,
            "bad.yaml",
            "platform:\n  packages:\n    web:\n      services_enable: [nginx]\n      services_disable: [nginx]\n",
        );
        let err = load_effective(&base, &[bad]).unwrap_err();
        match err {
            LoadError::Invalid { path, source } => {
                assert!(path.ends_with("bad.yaml"));
                assert_eq!(source.path, "platform.packages.web.services_enable");
            }
            LoadError::Io { .. } => panic!("expected a validation failure"),
        }
    }

    #[test]
    fn test_json_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "platform.json",
            r#"{"platform": {"packages": {"base": {"packages": ["vim"]}}}}"#,
        );
        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.groups()[0].packages, vec!["vim"]);
    }
}
