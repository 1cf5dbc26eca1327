//! Snapshot capture and live-module suppression.
//!
//! When the constrained partition is pinned to a frozen ABI version, its
//! modules come from a captured snapshot instead of source. Two full passes
//! run over the module set with an explicit boundary between them:
//!
//! 1. **Capture** registers every matching snapshot prebuilt into the
//!    session's capture registry, keyed by (base name, architecture, kind).
//! 2. **Suppression** supersedes live source modules that now have a
//!    registered snapshot counterpart, and records framework modules whose
//!    names collide with snapshot modules into the disambiguation-suffix
//!    table for packaging.
//!
//! The pass-1 eligibility predicate is shared with the packager, which uses
//! it to decide what goes into a freshly generated snapshot.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::config::{ArchType, Config, OsType};
use crate::module::{LibForm, Module, ModuleKind, ModuleOrigin, Partition};
use crate::session::Session;

/// Snapshot artifact classes. Libraries split per link form because a
/// declaration can be captured as static without its shared form (or vice
/// versa).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnapshotKind {
    Shared,
    Static,
    Header,
    Binary,
    Object,
}

impl SnapshotKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            SnapshotKind::Shared => "shared",
            SnapshotKind::Static => "static",
            SnapshotKind::Header => "header",
            SnapshotKind::Binary => "binary",
            SnapshotKind::Object => "object",
        }
    }
}

/// Snapshot class of a module variant.
pub fn snapshot_kind(module: &Module) -> SnapshotKind {
    match &module.kind {
        ModuleKind::Library { form, .. } => match form {
            LibForm::Static => SnapshotKind::Static,
            LibForm::Shared => SnapshotKind::Shared,
            LibForm::Header => SnapshotKind::Header,
        },
        ModuleKind::Binary => SnapshotKind::Binary,
        ModuleKind::Object => SnapshotKind::Object,
    }
}

/// Capture registry: (base name, architecture, kind) -> chosen variant name.
///
/// Each key is written exactly once; a second write with a different value
/// fails fast instead of silently keeping the last writer.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    entries: BTreeMap<(String, ArchType, SnapshotKind), String>,
}

impl SnapshotRegistry {
    pub fn new() -> SnapshotRegistry {
        SnapshotRegistry::default()
    }

    pub fn add(
        &mut self,
        base_name: &str,
        arch: ArchType,
        kind: SnapshotKind,
        chosen: &str,
    ) -> Result<()> {
        let key = (base_name.to_string(), arch, kind);
        if let Some(existing) = self.entries.get(&key) {
            if existing == chosen {
                return Ok(());
            }
            bail!(
                "snapshot registry collision for ('{base_name}', {arch}): \
                 '{existing}' already registered, refusing '{chosen}'"
            );
        }
        self.entries.insert(key, chosen.to_string());
        Ok(())
    }

    pub fn get(&self, base_name: &str, arch: ArchType, kind: SnapshotKind) -> Option<&str> {
        self.entries
            .get(&(base_name.to_string(), arch, kind))
            .map(String::as_str)
    }

    /// Whether any architecture/kind entry exists under this base name.
    pub fn contains_base(&self, base_name: &str) -> bool {
        self.entries.keys().any(|(name, _, _)| name == base_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry key for a module: cfi-sanitized static captures live under a
/// tagged name so they never collide with their unsanitized sibling.
pub fn registry_name(module: &Module) -> String {
    if module.sanitize.cfi && module.is_static_lib() {
        format!("{}.cfi", module.name)
    } else {
        module.name.clone()
    }
}

/// Pass-1 eligibility: whether a live module would be part of a snapshot of
/// the constrained partition. Shared with the packager.
pub fn is_snapshot_candidate(module: &Module) -> bool {
    if !module.enabled || module.hidden {
        return false;
    }
    if module.target.os != OsType::Device || module.target.native_bridge.is_enabled() {
        return false;
    }
    if module.partition != Partition::Device {
        return false;
    }
    if module.exclude_from_snapshot || module.is_snapshot_prebuilt() {
        return false;
    }

    // Exclusive sanitizer modes produce equivalent sanitized/unsanitized
    // variants; capture only the canonical representative per form. The
    // scs and bounds modes keep the unsanitized variant everywhere except
    // shared libraries; cfi keeps both static forms but nothing else.
    if (module.sanitize.scs || module.sanitize.bounds) && !module.is_shared_lib() {
        return false;
    }
    if module.sanitize.cfi && !module.is_static_lib() && !module.is_shared_lib() {
        return false;
    }

    match &module.kind {
        ModuleKind::Library { form, .. } => match form {
            LibForm::Static => module.output_file.is_some() && module.is_snapshot_available(),
            LibForm::Shared => {
                module.output_file.is_some() && (!module.boundary_lib || module.boundary_ext)
            }
            LibForm::Header => true,
        },
        ModuleKind::Binary | ModuleKind::Object => {
            module.output_file.is_some() && module.is_snapshot_available()
        }
    }
}

fn matches_device(module: &Module, config: &Config) -> bool {
    config
        .device_targets()
        .iter()
        .any(|target| target.arch.arch_type == module.target.arch.arch_type)
}

/// Pass 1: register matching snapshot prebuilts; disable prebuilts that
/// don't apply to the configured device.
pub fn capture_pass(session: &Session, module: &mut Module) -> Result<()> {
    let Some(frozen) = session.config.abi_freeze_version() else {
        return Ok(());
    };
    let ModuleOrigin::SnapshotPrebuilt { version } = &module.origin else {
        return Ok(());
    };
    if version.as_str() != frozen || !module.enabled {
        module.disable();
        return Ok(());
    }
    if !matches_device(module, &session.config) {
        // Prebuilts for other devices are dead weight; boundary libraries
        // stay because they may be aggregated elsewhere.
        if !module.boundary_lib {
            module.disable();
        }
        return Ok(());
    }

    let kind = snapshot_kind(module);
    if kind != SnapshotKind::Header && module.output_file.is_none() {
        // A prebuilt without its artifact cannot substitute for anything.
        module.disable();
        return Ok(());
    }

    let mut registry = session
        .snapshots
        .lock()
        .expect("snapshot registry poisoned");
    registry.add(
        &registry_name(module),
        module.target.arch.arch_type,
        kind,
        &module.variant_name,
    )
}

/// Pass 2: supersede live modules with captured counterparts. Must not run
/// until pass 1 has completed over the entire module set.
pub fn suppress_pass(session: &Session, module: &mut Module) {
    if session.config.abi_freeze_version().is_none() {
        return;
    }
    if module.is_snapshot_prebuilt() || !module.enabled {
        return;
    }
    if module.target.os != OsType::Device {
        return;
    }
    // Stability-boundary libraries are backward compatible by contract and
    // never superseded.
    if module.boundary_lib {
        return;
    }

    let registry = session
        .snapshots
        .lock()
        .expect("snapshot registry poisoned");

    if module.partition != Partition::Device {
        // A framework module sharing a name with a snapshot module needs a
        // suffix at packaging time to stay distinguishable.
        if registry.contains_base(&module.name) {
            session
                .suffixed_modules
                .lock()
                .expect("suffix table poisoned")
                .insert(module.name.clone());
        }
        return;
    }

    let arch = module.target.arch.arch_type;
    match &module.kind {
        ModuleKind::Library {
            builds_static: true,
            builds_shared: true,
            ..
        } => {
            let static_captured = registry.get(&module.name, arch, SnapshotKind::Static).is_some();
            let shared_captured = registry.get(&module.name, arch, SnapshotKind::Shared).is_some();
            if static_captured && shared_captured {
                module.disable();
            } else if static_captured || shared_captured {
                // Only one form captured: the live shared form still links
                // against its own static form, so keep the module buildable
                // and just drop it from top-level aggregation.
                module.hide();
            }
        }
        _ => {
            let kind = snapshot_kind(module);
            if registry.get(&module.name, arch, kind).is_some() {
                module.disable();
            }
        }
    }
}

/// Sequential driver standing in for the external scheduler: pass 1 runs to
/// completion over the whole module set before any pass-2 decision is made.
pub fn run_passes(session: &Session, modules: &mut [Module]) -> Result<()> {
    for module in modules.iter_mut() {
        capture_pass(session, module)?;
    }
    // Phase boundary: the capture registry is complete from here on.
    for module in modules.iter_mut() {
        suppress_pass(session, module);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arch, ProductVariables, Target};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn frozen_session() -> Session {
        let mut config = Config::test_config(BTreeMap::new());
        config.variables.device_abi_freeze_version = "30".to_string();
        Session::new(config)
    }

    fn device_target() -> Target {
        Target::new(OsType::Device, Arch::new(ArchType::Arm64))
    }

    fn shared_lib(name: &str) -> Module {
        let mut module = Module::new(
            name,
            ModuleKind::Library {
                form: LibForm::Shared,
                builds_static: true,
                builds_shared: true,
            },
            device_target(),
        );
        module.partition = Partition::Device;
        module.output_file = Some(PathBuf::from(format!("/out/{name}.so")));
        module
    }

    fn prebuilt(name: &str, kind: SnapshotKind, version: &str) -> Module {
        let module_kind = match kind {
            SnapshotKind::Static => ModuleKind::Library {
                form: LibForm::Static,
                builds_static: true,
                builds_shared: false,
            },
            SnapshotKind::Shared => ModuleKind::Library {
                form: LibForm::Shared,
                builds_static: false,
                builds_shared: true,
            },
            SnapshotKind::Header => ModuleKind::Library {
                form: LibForm::Header,
                builds_static: false,
                builds_shared: false,
            },
            SnapshotKind::Binary => ModuleKind::Binary,
            SnapshotKind::Object => ModuleKind::Object,
        };
        let mut module = Module::new(name, module_kind, device_target());
        module.variant_name = format!("{name}.snapshot.{version}");
        module.partition = Partition::Device;
        module.origin = ModuleOrigin::SnapshotPrebuilt {
            version: version.to_string(),
        };
        module.output_file = Some(PathBuf::from(format!("/snap/{name}")));
        module
    }

    #[test]
    fn live_module_fully_superseded() {
        let session = frozen_session();
        let mut modules = vec![
            prebuilt("libutils", SnapshotKind::Static, "30"),
            prebuilt("libutils", SnapshotKind::Shared, "30"),
            shared_lib("libutils"),
        ];
        run_passes(&session, &mut modules).unwrap();

        // Both forms captured: the live module is disabled outright.
        assert!(!modules[2].enabled);
        assert!(!modules[2].hidden);
    }

    #[test]
    fn partially_captured_module_is_hidden_not_disabled() {
        let session = frozen_session();
        let mut modules = vec![
            prebuilt("libutils", SnapshotKind::Static, "30"),
            shared_lib("libutils"),
        ];
        run_passes(&session, &mut modules).unwrap();

        // Only the static form was captured; the live shared form still
        // depends on its own static form, so the module stays buildable.
        assert!(modules[1].enabled);
        assert!(modules[1].hidden);
    }

    #[test]
    fn exactly_one_installable_per_arch() {
        let session = frozen_session();
        let mut modules = vec![
            prebuilt("netd", SnapshotKind::Binary, "30"),
            {
                let mut live = Module::new("netd", ModuleKind::Binary, device_target());
                live.partition = Partition::Device;
                live.output_file = Some(PathBuf::from("/out/netd"));
                live
            },
        ];
        run_passes(&session, &mut modules).unwrap();
        let installable: Vec<_> = modules
            .iter()
            .filter(|module| module.enabled && !module.hidden)
            .collect();
        assert_eq!(installable.len(), 1);
        assert!(installable[0].is_snapshot_prebuilt());
    }

    #[test]
    fn stale_version_prebuilt_is_disabled() {
        let session = frozen_session();
        let mut modules = vec![prebuilt("libold", SnapshotKind::Shared, "29")];
        run_passes(&session, &mut modules).unwrap();
        assert!(!modules[0].enabled);
        assert!(session.snapshots.lock().unwrap().is_empty());
    }

    #[test]
    fn registry_collision_fails_fast() {
        let mut registry = SnapshotRegistry::new();
        registry
            .add("libbase", ArchType::Arm64, SnapshotKind::Shared, "libbase.snapshot.30")
            .unwrap();
        // Idempotent re-registration of the same choice is fine.
        registry
            .add("libbase", ArchType::Arm64, SnapshotKind::Shared, "libbase.snapshot.30")
            .unwrap();
        // A different choice for the same key is not.
        assert!(registry
            .add("libbase", ArchType::Arm64, SnapshotKind::Shared, "other.snapshot.30")
            .is_err());
    }

    #[test]
    fn framework_collision_goes_to_suffix_table() {
        let session = frozen_session();
        let mut framework = shared_lib("libshared_name");
        framework.partition = Partition::Framework;
        let mut modules = vec![
            prebuilt("libshared_name", SnapshotKind::Shared, "30"),
            framework,
        ];
        run_passes(&session, &mut modules).unwrap();

        // The framework module stays installable but is marked for a
        // disambiguation suffix at packaging time.
        assert!(modules[1].enabled);
        assert!(session
            .suffixed_modules
            .lock()
            .unwrap()
            .contains("libshared_name"));
    }

    #[test]
    fn candidate_predicate_kind_rules() {
        let mut lib = shared_lib("libfoo");
        assert!(is_snapshot_candidate(&lib));

        lib.output_file = None;
        assert!(!is_snapshot_candidate(&lib));

        // Header-only libraries are always eligible once reached.
        let mut header = Module::new(
            "libhdr",
            ModuleKind::Library {
                form: LibForm::Header,
                builds_static: false,
                builds_shared: false,
            },
            device_target(),
        );
        header.partition = Partition::Device;
        assert!(is_snapshot_candidate(&header));

        // Boundary libraries are excluded unless declared extensions.
        let mut boundary = shared_lib("libstable");
        boundary.boundary_lib = true;
        assert!(!is_snapshot_candidate(&boundary));
        boundary.boundary_ext = true;
        assert!(is_snapshot_candidate(&boundary));

        // Unset availability counts as available; only an explicit opt-out
        // drops a static library.
        let mut static_lib = Module::new(
            "libst",
            ModuleKind::Library {
                form: LibForm::Static,
                builds_static: true,
                builds_shared: false,
            },
            device_target(),
        );
        static_lib.partition = Partition::Device;
        static_lib.output_file = Some(PathBuf::from("/out/libst.a"));
        assert!(is_snapshot_candidate(&static_lib));
        static_lib.snapshot_available = Some(false);
        assert!(!is_snapshot_candidate(&static_lib));
    }

    #[test]
    fn sanitizer_variants_deduplicated() {
        // scs static variant: only the unsanitized form is captured.
        let mut scs_static = shared_lib("libsan");
        scs_static.kind = ModuleKind::Library {
            form: LibForm::Static,
            builds_static: true,
            builds_shared: false,
        };
        scs_static.sanitize.scs = true;
        assert!(!is_snapshot_candidate(&scs_static));

        // cfi static is captured, under a tagged registry name.
        let mut cfi_static = scs_static.clone();
        cfi_static.sanitize = Default::default();
        cfi_static.sanitize.cfi = true;
        assert!(is_snapshot_candidate(&cfi_static));
        assert_eq!(registry_name(&cfi_static), "libsan.cfi");
    }

    #[test]
    fn no_frozen_version_is_a_no_op() {
        let config = Config::test_config(BTreeMap::new());
        assert_eq!(config.variables.device_abi_freeze_version, "current");
        let session = Session::new(config);
        let mut modules = vec![
            prebuilt("libutils", SnapshotKind::Shared, "30"),
            shared_lib("libutils"),
        ];
        run_passes(&session, &mut modules).unwrap();
        assert!(modules[1].enabled && !modules[1].hidden);
        assert!(session.snapshots.lock().unwrap().is_empty());
    }

    #[test]
    fn default_variables_have_no_freeze_version() {
        let vars = ProductVariables::default();
        assert_eq!(vars.device_abi_freeze_version, "current");
    }
}
