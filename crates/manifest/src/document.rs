//! Raw document shape and conversion to the typed model
//!
//! The on-disk layout is
//! `platform.packages.<group>` and `platform.python.{blade_venv_path, modules.<key>}`.
//! Key maps are decoded into ordered entry lists so declaration order is
//! preserved and duplicate keys can be reported instead of silently dropped.

use serde::de::{self, DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::{Result, ValidationError, ValidationErrorKind};
use crate::overlay::{Overlay, OverlayGroup, OverlayPython};
use crate::types::{
    BladeClasses, Manifest, ModuleEntry, ModuleSource, PackageGroup, PythonConfig, SourceType,
    dedup,
};
use crate::validate::{group_path, module_path};

// ============================================================================
// Formats
// ============================================================================

/// Serialization format of a manifest, overlay or inventory document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentFormat {
    #[default]
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Detect the format from a file extension, defaulting to YAML
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    /// Decode a document of this format
    pub fn decode<T: DeserializeOwned>(self, content: &str) -> std::result::Result<T, String> {
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Encode a value in this format
    pub fn encode<T: Serialize>(self, value: &T) -> std::result::Result<String, String> {
        match self {
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            Self::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        }
    }
}

// ============================================================================
// Ordered key maps
// ============================================================================

/// A document mapping decoded in order, duplicates included
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entries<T>(pub(crate) Vec<(String, T)>);

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Entries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Entries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(Entries::default())
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(Entries::default())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

impl<T: Serialize> Serialize for Entries<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<T> Entries<T> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries, failing on the first repeated key
    fn unique(
        &self,
        path_of: fn(&str) -> String,
        duplicate: fn(&str) -> ValidationErrorKind,
    ) -> Result<impl Iterator<Item = &(String, T)>> {
        let mut seen = HashSet::new();
        for (key, _) in &self.0 {
            if !seen.insert(key.as_str()) {
                return Err(ValidationError::new(path_of(key), duplicate(key)));
            }
        }
        Ok(self.0.iter())
    }
}

fn duplicate_group(name: &str) -> ValidationErrorKind {
    ValidationErrorKind::DuplicateGroup {
        name: name.to_string(),
    }
}

fn duplicate_module(key: &str) -> ValidationErrorKind {
    ValidationErrorKind::DuplicateModule {
        key: key.to_string(),
    }
}

// ============================================================================
// Raw document shape
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) platform: Option<RawPlatform>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawPlatform {
    #[serde(default, skip_serializing_if = "Entries::is_empty")]
    pub(crate) packages: Entries<RawGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) python: Option<RawPython>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawGroup {
    /// Outer `None`: key absent. `Some(None)`: explicit null.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) blade_classes: Option<Option<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) packages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) preconfig_settings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) services_enable: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) services_disable: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) replace_packages: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawPython {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) blade_venv_path: Option<String>,
    #[serde(default, skip_serializing_if = "Entries::is_empty")]
    pub(crate) modules: Entries<RawModule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawModule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) module_name: Option<String>,
    #[serde(default)]
    pub(crate) delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) metadata: Option<RawMetadata>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub(crate) version: Option<String>,
}

/// Distinguish an explicit `null` from an absent key
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Accept `version: 3` as well as `version: "1.2"`
///
/// Floats are refused: `2.0` and `1.10` would come back as "2" and "1.1".
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarVisitor;

    impl Visitor<'_> for ScalarVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a version string, number or null")
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
            Err(E::custom(format!(
                "version was read as the number {v}; quote it (version: \"...\") to keep it as written"
            )))
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

// ============================================================================
// Raw -> typed
// ============================================================================

fn malformed(path: &str, message: String) -> ValidationError {
    ValidationError::new(path, ValidationErrorKind::Malformed { message })
}

fn decode_raw(content: &str, format: DocumentFormat) -> Result<RawDocument> {
    format
        .decode::<RawDocument>(content)
        .map_err(|message| malformed("platform", message))
}

/// Parse a base manifest document
pub fn parse_manifest(content: &str, format: DocumentFormat) -> Result<Manifest> {
    let raw = decode_raw(content, format)?;
    let platform = raw.platform.ok_or_else(|| {
        ValidationError::new(
            "",
            ValidationErrorKind::MissingField {
                field: "platform".to_string(),
            },
        )
    })?;
    manifest_from_raw(&platform)
}

/// Parse an overlay document; an empty `platform` is a no-op overlay
pub fn parse_overlay(content: &str, format: DocumentFormat) -> Result<Overlay> {
    let raw = decode_raw(content, format)?;
    overlay_from_raw(&raw.platform.unwrap_or_default())
}

pub(crate) fn manifest_from_raw(platform: &RawPlatform) -> Result<Manifest> {
    let mut groups = Vec::with_capacity(platform.packages.0.len());
    for (name, raw) in platform.packages.unique(group_path, duplicate_group)? {
        if raw.replace_packages {
            log::debug!("ignoring replace_packages on base group '{name}'");
        }
        groups.push(PackageGroup {
            name: name.clone(),
            blade_classes: BladeClasses::from_list(raw.blade_classes.clone().flatten()),
            packages: dedup(raw.packages.clone().unwrap_or_default()),
            preconfig_settings: raw.preconfig_settings.clone().unwrap_or_default(),
            services_enable: dedup(raw.services_enable.clone().unwrap_or_default()),
            services_disable: dedup(raw.services_disable.clone().unwrap_or_default()),
        });
    }

    let python = match &platform.python {
        Some(raw) => PythonConfig {
            blade_venv_path: raw.blade_venv_path.as_ref().map(PathBuf::from),
            modules: modules_from_raw(&raw.modules)?,
        },
        None => PythonConfig::default(),
    };

    Manifest::new(groups, python)
}

pub(crate) fn overlay_from_raw(platform: &RawPlatform) -> Result<Overlay> {
    let mut groups = Vec::with_capacity(platform.packages.0.len());
    for (name, raw) in platform.packages.unique(group_path, duplicate_group)? {
        groups.push(OverlayGroup {
            name: name.clone(),
            blade_classes: raw.blade_classes.clone().map(BladeClasses::from_list),
            packages: raw.packages.clone(),
            replace_packages: raw.replace_packages,
            preconfig_settings: raw.preconfig_settings.clone().unwrap_or_default(),
            services_enable: dedup(raw.services_enable.clone().unwrap_or_default()),
            services_disable: dedup(raw.services_disable.clone().unwrap_or_default()),
        });
    }

    let python = match &platform.python {
        Some(raw) => Some(OverlayPython {
            blade_venv_path: raw.blade_venv_path.as_ref().map(PathBuf::from),
            modules: modules_from_raw(&raw.modules)?,
        }),
        None => None,
    };

    Ok(Overlay { groups, python })
}

fn modules_from_raw(raw: &Entries<RawModule>) -> Result<Vec<ModuleEntry>> {
    raw.unique(module_path, duplicate_module)?
        .map(|(key, module)| module_from_raw(key, module))
        .collect()
}

fn module_from_raw(key: &str, raw: &RawModule) -> Result<ModuleEntry> {
    let path = module_path(key);

    let module_name = match raw.module_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(ValidationError::new(
                format!("{path}.module_name"),
                ValidationErrorKind::EmptyModuleName,
            ));
        }
    };

    let source_type: SourceType = raw
        .source_type
        .as_deref()
        .ok_or_else(|| ValidationErrorKind::MissingField {
            field: "source_type".to_string(),
        })
        .and_then(str::parse)
        .map_err(|kind| ValidationError::new(format!("{path}.source_type"), kind))?;

    let metadata = raw.metadata.as_ref();
    let version = metadata.and_then(|m| m.version.clone());
    let source = match source_type {
        SourceType::VersionControl => {
            let url = metadata
                .and_then(|m| m.url.clone())
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    ValidationError::new(
                        format!("{path}.metadata.url"),
                        ValidationErrorKind::MissingField {
                            field: "url".to_string(),
                        },
                    )
                })?;
            ModuleSource::VersionControl {
                url,
                reference: version,
            }
        }
        SourceType::PackageIndex => ModuleSource::PackageIndex {
            version_constraint: version,
        },
    };

    Ok(ModuleEntry {
        key: key.to_string(),
        module_name,
        delete: raw.delete,
        source,
    })
}

// ============================================================================
// Typed -> raw
// ============================================================================

fn non_empty(items: &[String]) -> Option<Vec<String>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

pub(crate) fn manifest_to_raw(manifest: &Manifest) -> RawDocument {
    let packages = manifest
        .groups
        .iter()
        .map(|g| {
            let raw = RawGroup {
                blade_classes: g.blade_classes.to_list().map(Some),
                packages: non_empty(&g.packages),
                preconfig_settings: non_empty(&g.preconfig_settings),
                services_enable: non_empty(&g.services_enable),
                services_disable: non_empty(&g.services_disable),
                replace_packages: false,
            };
            (g.name.clone(), raw)
        })
        .collect();

    let python = &manifest.python;
    let python = if python.modules.is_empty() && python.blade_venv_path.is_none() {
        None
    } else {
        Some(RawPython {
            blade_venv_path: python
                .blade_venv_path
                .as_ref()
                .map(|p| p.display().to_string()),
            modules: Entries(
                python
                    .modules
                    .iter()
                    .map(|m| (m.key.clone(), module_to_raw(m)))
                    .collect(),
            ),
        })
    };

    RawDocument {
        platform: Some(RawPlatform {
            packages: Entries(packages),
            python,
        }),
    }
}

fn module_to_raw(module: &ModuleEntry) -> RawModule {
    let metadata = match &module.source {
        ModuleSource::VersionControl { url, reference } => RawMetadata {
            url: Some(url.clone()),
            version: reference.clone(),
        },
        ModuleSource::PackageIndex { version_constraint } => RawMetadata {
            url: None,
            version: version_constraint.clone(),
        },
    };
    RawModule {
        module_name: Some(module.module_name.clone()),
        delete: module.delete,
        source_type: Some(module.source.source_type().as_str().to_string()),
        metadata: Some(metadata),
    }
}

impl Manifest {
    /// Parse a base manifest document
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        parse_manifest(content, format)
    }

    /// Render the manifest in the document shape it was loaded from
    pub fn to_document(&self, format: DocumentFormat) -> std::result::Result<String, String> {
        format.encode(&manifest_to_raw(self))
    }
}
