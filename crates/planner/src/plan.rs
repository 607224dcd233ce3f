//! Installation plan builder
//!
//! A plan is declarative intent, not a diff against the blade. Action order
//! is fixed: preseed answers, then packages, then service disables, then
//! service enables, then modules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::resolver::{BladeSelection, Resolution};
use crate::source::{FetchAction, resolve_source};
use crate::types::BladeInstance;

/// One step of a blade plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Load debconf preseed directives, in order
    Preconfigure { settings: Vec<String> },
    /// Install OS packages in one transaction
    InstallPackages { packages: Vec<String> },
    DisableService { service: String },
    EnableService { service: String },
    /// Install a python module into the blade venv
    InstallModule {
        key: String,
        module_name: String,
        fetch: FetchAction,
        venv: PathBuf,
    },
    /// Remove a python module from the blade venv
    RemoveModule {
        key: String,
        module_name: String,
        venv: PathBuf,
    },
}

impl Action {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Preconfigure { .. } => Stage::Preconfigure,
            Self::InstallPackages { .. } => Stage::InstallPackages,
            Self::DisableService { .. } => Stage::DisableServices,
            Self::EnableService { .. } => Stage::EnableServices,
            Self::InstallModule { .. } | Self::RemoveModule { .. } => Stage::Modules,
        }
    }

    /// Short machine-friendly name of the action type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Preconfigure { .. } => "preconfigure",
            Self::InstallPackages { .. } => "install_packages",
            Self::DisableService { .. } => "disable_service",
            Self::EnableService { .. } => "enable_service",
            Self::InstallModule { .. } => "install_module",
            Self::RemoveModule { .. } => "remove_module",
        }
    }

    /// The venv this action needs, if any
    pub fn venv(&self) -> Option<&std::path::Path> {
        match self {
            Self::InstallModule { venv, .. } | Self::RemoveModule { venv, .. } => {
                Some(venv.as_path())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preconfigure { settings } => {
                write!(f, "preconfigure {} debconf settings", settings.len())
            }
            Self::InstallPackages { packages } => {
                write!(f, "install packages: {}", packages.join(" "))
            }
            Self::DisableService { service } => write!(f, "disable service {service}"),
            Self::EnableService { service } => write!(f, "enable service {service}"),
            Self::InstallModule {
                module_name, fetch, ..
            } => write!(f, "install module {module_name} from {fetch}"),
            Self::RemoveModule { module_name, .. } => write!(f, "remove module {module_name}"),
        }
    }
}

/// Ordering stage of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preconfigure,
    InstallPackages,
    DisableServices,
    EnableServices,
    Modules,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preconfigure => "preconfigure",
            Self::InstallPackages => "packages",
            Self::DisableServices => "disable services",
            Self::EnableServices => "enable services",
            Self::Modules => "modules",
        })
    }
}

/// The ordered, immutable action list for one blade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    blade: BladeInstance,
    actions: Vec<Action>,
}

impl ActionPlan {
    pub fn blade(&self) -> &BladeInstance {
        &self.blade
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn stage_of(&self, index: usize) -> Option<Stage> {
        self.actions.get(index).map(Action::stage)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action {
                Action::Preconfigure { settings } => summary.preconfig_settings += settings.len(),
                Action::InstallPackages { packages } => summary.packages += packages.len(),
                Action::DisableService { .. } => summary.services_disabled += 1,
                Action::EnableService { .. } => summary.services_enabled += 1,
                Action::InstallModule { .. } => summary.modules_installed += 1,
                Action::RemoveModule { .. } => summary.modules_removed += 1,
            }
        }
        summary
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// BLAKE3 hex digest of the plan's compact JSON form
    ///
    /// Fails when the plan cannot be serialized (a non-UTF-8 venv path).
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, self)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

/// Counts describing a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub preconfig_settings: usize,
    pub packages: usize,
    pub services_disabled: usize,
    pub services_enabled: usize,
    pub modules_installed: usize,
    pub modules_removed: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packages, {} preseeds, {} disables, {} enables, {} module installs, {} module removals",
            self.packages,
            self.preconfig_settings,
            self.services_disabled,
            self.services_enabled,
            self.modules_installed,
            self.modules_removed
        )
    }
}

fn push_unique<'a>(target: &mut Vec<&'a str>, items: &'a [String]) {
    for item in items {
        if !target.contains(&item.as_str()) {
            target.push(item);
        }
    }
}

/// Build the plan for one resolved blade
pub fn build_plan(selection: &BladeSelection<'_>) -> ActionPlan {
    let mut settings: Vec<String> = Vec::new();
    let mut packages: Vec<&str> = Vec::new();
    let mut disable: Vec<&str> = Vec::new();
    let mut enable: Vec<&str> = Vec::new();

    for group in &selection.groups {
        settings.extend(group.preconfig_settings.iter().cloned());
        push_unique(&mut packages, &group.packages);
        push_unique(&mut disable, &group.services_disable);
        push_unique(&mut enable, &group.services_enable);
    }

    for service in disable.iter().filter(|s| enable.contains(s)) {
        log::warn!(
            "blade {}: service '{service}' is disabled by one selected group and enabled by another; \
             it will be disabled then enabled",
            selection.blade.id
        );
    }

    let mut actions = Vec::new();
    if !settings.is_empty() {
        actions.push(Action::Preconfigure { settings });
    }
    if !packages.is_empty() {
        actions.push(Action::InstallPackages {
            packages: packages.into_iter().map(str::to_string).collect(),
        });
    }
    actions.extend(disable.into_iter().map(|service| Action::DisableService {
        service: service.to_string(),
    }));
    actions.extend(enable.into_iter().map(|service| Action::EnableService {
        service: service.to_string(),
    }));

    // Validation guarantees a venv path whenever modules exist
    if let Some(venv) = selection.python.venv_path() {
        for module in selection.modules() {
            let action = if module.delete {
                Action::RemoveModule {
                    key: module.key.clone(),
                    module_name: module.module_name.clone(),
                    venv: venv.to_path_buf(),
                }
            } else {
                Action::InstallModule {
                    key: module.key.clone(),
                    module_name: module.module_name.clone(),
                    fetch: resolve_source(module),
                    venv: venv.to_path_buf(),
                }
            };
            actions.push(action);
        }
    }

    log::debug!(
        "planned {} actions for blade {}",
        actions.len(),
        selection.blade
    );
    ActionPlan {
        blade: selection.blade.clone(),
        actions,
    }
}

/// Build plans for every blade of a resolution, in inventory order
pub fn build_plans(resolution: &Resolution<'_>) -> Vec<ActionPlan> {
    resolution.iter().map(build_plan).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{resolve, resolve_blade};
    use crate::types::Inventory;
    use manifest::{
        BladeClasses, Manifest, ModuleEntry, Overlay, OverlayGroup, PackageGroup, PythonConfig,
        merge,
    };
    use proptest::prelude::*;

    fn manifest() -> Manifest {
        Manifest::new(
            vec![
                PackageGroup::new("base")
                    .with_packages(["vim", "curl"])
                    .with_preconfig(["tzdata tzdata/Areas select Etc"]),
                PackageGroup::new("network_virtualization")
                    .with_packages(["libvirt-daemon", "curl"])
                    .with_services_enable(["libvirtd"])
                    .with_services_disable(["dnsmasq"]),
                PackageGroup::new("dhcp")
                    .with_blade_classes(BladeClasses::restricted(["dhcp_blade"]))
                    .with_packages(["kea"])
                    .with_preconfig(["kea kea/start boolean false"])
                    .with_services_enable(["kea-dhcp4-server"]),
            ],
            PythonConfig::new(
                "/root/blade-venv",
                vec![
                    ModuleEntry::git(
                        "sushi-tools",
                        "sushy-tools",
                        "https://github.com/Cray-HPE/sushy-tools.git",
                        Some("With-Libvirt-By-Name"),
                    ),
                    ModuleEntry::pypi("yaml", "PyYAML", None),
                ],
            ),
        )
        .unwrap()
    }

    fn plan_for(manifest: &Manifest, class: &str) -> ActionPlan {
        build_plan(&resolve_blade(manifest, &BladeInstance::new("blade1", class)).unwrap())
    }

    #[test]
    fn test_plan_order_for_dhcp_blade() {
        let plan = plan_for(&manifest(), "dhcp_blade");
        let kinds: Vec<_> = plan.actions().iter().map(Action::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "preconfigure",
                "install_packages",
                "disable_service",
                "enable_service",
                "enable_service",
                "install_module",
                "install_module",
            ]
        );
        assert_eq!(
            plan.actions()[0],
            Action::Preconfigure {
                settings: vec![
                    "tzdata tzdata/Areas select Etc".into(),
                    "kea kea/start boolean false".into()
                ]
            }
        );
    }

    #[test]
    fn test_packages_deduplicated_at_first_position() {
        let plan = plan_for(&manifest(), "dhcp_blade");
        assert_eq!(
            plan.actions()[1],
            Action::InstallPackages {
                packages: vec![
                    "vim".into(),
                    "curl".into(),
                    "libvirt-daemon".into(),
                    "kea".into()
                ]
            }
        );
    }

    #[test]
    fn test_stages_are_monotonic() {
        let plan = plan_for(&manifest(), "dhcp_blade");
        let stages: Vec<_> = (0..plan.len()).filter_map(|i| plan.stage_of(i)).collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);
        assert_eq!(plan.stage_of(plan.len()), None);
    }

    #[test]
    fn test_empty_stages_omitted() {
        let manifest = Manifest::new(
            vec![PackageGroup::new("svc").with_services_enable(["ssh"])],
            PythonConfig::default(),
        )
        .unwrap();
        let plan = plan_for(&manifest, "any");
        assert_eq!(
            plan.actions(),
            &[Action::EnableService {
                service: "ssh".into()
            }]
        );
    }

    #[test]
    fn test_blade_with_nothing_selected_gets_empty_plan() {
        let manifest = Manifest::new(
            vec![PackageGroup::new("web").with_blade_classes(BladeClasses::restricted(["web"]))],
            PythonConfig::default(),
        )
        .unwrap();
        assert!(plan_for(&manifest, "db").is_empty());
    }

    #[test]
    fn test_sushi_tools_reference_on_every_blade() {
        let manifest = manifest();
        let inventory = Inventory::new(vec![
            BladeInstance::new("blade1", "dhcp_blade"),
            BladeInstance::new("blade2", "web"),
        ]);
        let plans = build_plans(&resolve(&manifest, &inventory).unwrap());
        assert_eq!(plans.len(), 2);
        for plan in &plans {
            let found = plan.actions().iter().any(|a| {
                matches!(
                    a,
                    Action::InstallModule {
                        fetch: FetchAction::VersionControl { reference: Some(r), .. },
                        ..
                    } if r == "With-Libvirt-By-Name"
                )
            });
            assert!(found, "blade {}", plan.blade().id);
        }
    }

    #[test]
    fn test_delete_flip_replaces_install_with_removal() {
        let overlay = Overlay::empty().with_module(
            ModuleEntry::git(
                "sushi-tools",
                "sushy-tools",
                "https://github.com/Cray-HPE/sushy-tools.git",
                Some("With-Libvirt-By-Name"),
            )
            .deleted(),
        );
        let merged = merge(&manifest(), &[overlay]).unwrap();
        for class in ["dhcp_blade", "web"] {
            let plan = plan_for(&merged, class);
            let modules: Vec<_> = plan
                .actions()
                .iter()
                .filter(|a| a.stage() == Stage::Modules)
                .collect();
            assert_eq!(
                modules[0],
                &Action::RemoveModule {
                    key: "sushi-tools".into(),
                    module_name: "sushy-tools".into(),
                    venv: PathBuf::from("/root/blade-venv"),
                }
            );
            assert!(matches!(modules[1], Action::InstallModule { .. }));
        }
    }

    #[test]
    fn test_cross_group_service_conflict_keeps_both() {
        let manifest = Manifest::new(
            vec![
                PackageGroup::new("a").with_services_disable(["nginx"]),
                PackageGroup::new("b").with_services_enable(["nginx"]),
            ],
            PythonConfig::default(),
        )
        .unwrap();
        let plan = plan_for(&manifest, "web");
        assert_eq!(
            plan.actions(),
            &[
                Action::DisableService {
                    service: "nginx".into()
                },
                Action::EnableService {
                    service: "nginx".into()
                },
            ]
        );
    }

    #[test]
    fn test_json_shape() {
        let plan = plan_for(&manifest(), "web");
        let value: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(value["blade"]["id"], "blade1");
        assert_eq!(value["actions"][0]["type"], "preconfigure");
        assert_eq!(value["actions"][1]["type"], "install_packages");
        let module = value["actions"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["type"] == "install_module")
            .unwrap();
        assert_eq!(module["fetch"]["kind"], "version_control");
        assert_eq!(module["venv"], "/root/blade-venv");
    }

    #[test]
    fn test_summary() {
        let summary = plan_for(&manifest(), "dhcp_blade").summary();
        assert_eq!(summary.packages, 4);
        assert_eq!(summary.preconfig_settings, 2);
        assert_eq!(summary.services_disabled, 1);
        assert_eq!(summary.services_enabled, 2);
        assert_eq!(summary.modules_installed, 2);
        assert_eq!(summary.modules_removed, 0);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let manifest = manifest();
        assert_ne!(
            plan_for(&manifest, "dhcp_blade").fingerprint().unwrap(),
            plan_for(&manifest, "web").fingerprint().unwrap()
        );
        assert_eq!(plan_for(&manifest, "web").fingerprint().unwrap().len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn test_unserializable_plan_has_no_fingerprint() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let venv = PathBuf::from(OsStr::from_bytes(b"/root/venv-\xff"));
        let manifest = Manifest::new(
            vec![],
            PythonConfig::new(venv, vec![ModuleEntry::pypi("yaml", "PyYAML", None)]),
        )
        .unwrap();
        assert!(plan_for(&manifest, "web").fingerprint().is_err());
    }

    #[test]
    fn test_dhcp_overlay_restricts_kea_to_dhcp_blades() {
        let base = Manifest::new(
            vec![
                PackageGroup::new("base").with_packages(["vim"]),
                PackageGroup::new("dhcp")
                    .with_packages(["kea"])
                    .with_services_disable(["kea-dhcp4-server"]),
            ],
            PythonConfig::default(),
        )
        .unwrap();
        let overlay = Overlay::empty().with_group(
            OverlayGroup::new("dhcp").with_blade_classes(BladeClasses::restricted(["dhcp_blade"])),
        );
        let merged = merge(&base, &[overlay]).unwrap();
        let inventory = Inventory::new(vec![
            BladeInstance::new("blade1", "dhcp_blade"),
            BladeInstance::new("blade2", "web"),
        ]);
        let plans = build_plans(&resolve(&merged, &inventory).unwrap());

        let kea = Action::InstallPackages {
            packages: vec!["vim".to_string(), "kea".to_string()],
        };
        let disable = Action::DisableService {
            service: "kea-dhcp4-server".to_string(),
        };
        assert_eq!(plans[0].blade().id, "blade1");
        assert_eq!(plans[0].actions(), &[kea, disable]);

        assert_eq!(plans[1].blade().id, "blade2");
        assert_eq!(
            plans[1].actions(),
            &[Action::InstallPackages {
                packages: vec!["vim".to_string()],
            }]
        );
    }

    proptest! {
        #[test]
        fn prop_plans_are_deterministic(class in prop::sample::select(vec!["dhcp_blade", "web", "other"])) {
            let manifest = manifest();
            let first = plan_for(&manifest, class);
            let second = plan_for(&manifest, class);
            prop_assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
            prop_assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
            prop_assert_eq!(first, second);
        }
    }
}
