//! Per-API-level variant expansion.
//!
//! Compiled-stub libraries (and any module opting into per-minimum-SDK
//! variation) are split into one clone per applicable API level: every
//! integer level from the normalized base level through the current platform
//! level, one clone per active in-development codename, and one tagged
//! "current".

use anyhow::{anyhow, bail, Result};

use crate::config::{ArchType, Config, FUTURE_API_LEVEL};
use crate::module::Module;
use crate::mutate::PhaseErrors;
use crate::session::Session;

/// Name suffix appended to concrete stub library variants.
pub const STUB_SUFFIX: &str = ".stub";

/// First API level an architecture existed at. 64-bit architectures were
/// introduced later than their 32-bit counterparts.
pub fn arch_introduction_level(arch: ArchType, min_supported: u32) -> u32 {
    match arch {
        ArchType::Arm | ArchType::X86 => min_supported,
        ArchType::Arm64 | ArchType::X86_64 => 21,
        ArchType::Riscv64 => 35,
    }
}

/// Normalize a requested base API level for the given architecture.
///
/// "current" and codenames pass through unchanged; "minimum" resolves to the
/// architecture introduction level; numbers are raised to at least the
/// global minimum and the architecture introduction level, and never capped
/// above the platform level.
pub fn normalize_api_level(config: &Config, level: &str, arch: ArchType) -> Result<String> {
    if level.is_empty() {
        bail!("empty API level reached normalization; this is a bug in the caller");
    }
    if level == "current" {
        return Ok(level.to_string());
    }

    let min_supported = config.min_supported_sdk_version();
    let introduced = arch_introduction_level(arch, min_supported);

    if level == "minimum" {
        return Ok(introduced.to_string());
    }

    match level.parse::<u32>() {
        // If support for an old platform level is dropped, clip modules
        // still naming it instead of failing each one.
        Ok(version) => Ok(version.max(min_supported).max(introduced).to_string()),
        // Non-integer levels are codenames.
        Err(_) => Ok(level.to_string()),
    }
}

/// Numeric ordering value for an API level tag. "current" and active
/// codenames sort above every finalized level.
pub fn api_level_num(config: &Config, level: &str) -> Result<u32> {
    if level == "current" {
        return Ok(FUTURE_API_LEVEL);
    }
    if config.active_codenames().iter().any(|name| name == level) {
        return Ok(FUTURE_API_LEVEL);
    }
    level
        .parse::<u32>()
        .map_err(|_| anyhow!("'{level}' is not a finalized API level or an active codename"))
}

/// First integer level to generate a clone for. A normalized "current"
/// starts one past the platform level (so only the codename and "current"
/// clones exist until the platform is finalized).
pub fn first_generated_level(config: &Config, normalized: &str) -> Result<u32> {
    if normalized == "current" {
        return Ok(config.platform_sdk_version() + 1);
    }
    normalized.parse::<u32>().map_err(|_| {
        anyhow!("first API level must be a number, \"minimum\", or \"current\", got '{normalized}'")
    })
}

/// The full list of API level tags to clone a module for.
pub fn expand_levels(config: &Config, base_level: &str, arch: ArchType) -> Result<Vec<String>> {
    let normalized = normalize_api_level(config, base_level, arch)?;
    let first = first_generated_level(config, &normalized)?;

    let mut levels: Vec<String> = (first..=config.platform_sdk_version())
        .map(|level| level.to_string())
        .collect();
    levels.extend(config.active_codenames().iter().cloned());
    levels.push("current".to_string());
    Ok(levels)
}

/// Whether a clone at `level` needs the compatibility version marker.
///
/// Required by default. A threshold of "current" suppresses it for every
/// finalized level; the "current" clone itself always requires it; otherwise
/// it is suppressed only for levels strictly below the threshold.
pub fn version_marker_required(
    config: &Config,
    level: &str,
    unversioned_until: Option<&str>,
) -> Result<bool> {
    let threshold = match unversioned_until {
        None | Some("") => return Ok(true),
        Some(threshold) => threshold,
    };
    if threshold == "current" {
        return Ok(level == "current");
    }
    if level == "current" {
        return Ok(true);
    }
    Ok(api_level_num(config, level)? >= api_level_num(config, threshold)?)
}

fn is_expandable(module: &Module) -> bool {
    module.stub.is_some() || (module.split_per_api_level && module.min_sdk_version.is_some())
}

/// Expand one eligible module into its per-API-level clones.
///
/// Malformed input (wrong symbol-file suffix, a stub suffix in the declared
/// name) is a module-scoped error so every offender can be reported at the
/// end of the pass.
pub fn expand_module(session: &Session, module: &Module) -> Result<Vec<Module>> {
    let config = &session.config;

    let base_level = if let Some(stub) = &module.stub {
        if module.name.ends_with(STUB_SUFFIX) {
            bail!(
                "do not append '{STUB_SUFFIX}' to the module name, just use the base name"
            );
        }
        if !stub.symbol_file.ends_with(".map.txt") {
            bail!("symbol_file '{}' must end with .map.txt", stub.symbol_file);
        }
        stub.first_version.clone()
    } else {
        module
            .min_sdk_version
            .clone()
            .ok_or_else(|| anyhow!("module opted into per-SDK variants without a min SDK version"))?
    };

    let arch = module.target.arch.arch_type;
    let levels = expand_levels(config, &base_level, arch)?;
    let unversioned_until = module
        .stub
        .as_ref()
        .and_then(|stub| stub.unversioned_until.as_deref().map(str::to_string));

    if module.stub.is_some() {
        let mut stubs = session
            .stub_libraries
            .lock()
            .expect("stub library registry poisoned");
        stubs.insert(module.name.clone());
    }

    let mut clones = Vec::with_capacity(levels.len());
    for level in levels {
        let mut clone = module.clone();
        clone.needs_version_marker =
            version_marker_required(config, &level, unversioned_until.as_deref())?;
        clone.variant_name = if module.stub.is_some() {
            format!("{}{}@{}", module.name, STUB_SUFFIX, level)
        } else {
            format!("{}@{}", module.name, level)
        };
        clone.api_level = Some(level);
        clones.push(clone);
    }
    Ok(clones)
}

/// Sequential driver for the expansion pass, standing in for the external
/// scheduler: expands every eligible module, leaves the rest untouched, and
/// reports all module-scoped errors together.
pub fn run_pass(session: &Session, modules: Vec<Module>) -> Result<Vec<Module>> {
    let errors = PhaseErrors::new("variant expansion");
    let mut out = Vec::with_capacity(modules.len());
    for module in modules {
        if !module.enabled || !is_expandable(&module) {
            out.push(module);
            continue;
        }
        // Per-API variants only exist for real device targets; a stub
        // library declared for anything else is disabled outright.
        if module.target.os != crate::config::OsType::Device {
            let mut module = module;
            if module.stub.is_some() {
                module.disable();
            }
            out.push(module);
            continue;
        }
        match expand_module(session, &module) {
            Ok(clones) => out.extend(clones),
            Err(err) => {
                errors.push(&module.name, err);
                out.push(module);
            }
        }
    }
    errors.into_result()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arch, OsType, Target};
    use crate::module::{LibForm, ModuleKind, StubProperties};
    use std::collections::BTreeMap;

    fn test_session() -> Session {
        Session::new(Config::test_config(BTreeMap::new()))
    }

    fn stub_module(name: &str, first_version: &str, arch: ArchType) -> Module {
        let mut module = Module::new(
            name,
            ModuleKind::Library {
                form: LibForm::Shared,
                builds_static: false,
                builds_shared: true,
            },
            Target::new(OsType::Device, Arch::new(arch)),
        );
        module.stub = Some(StubProperties {
            symbol_file: format!("{name}.map.txt"),
            first_version: first_version.to_string(),
            unversioned_until: None,
        });
        module
    }

    #[test]
    fn numeric_level_is_floored_to_global_minimum() {
        let session = test_session();
        let normalized =
            normalize_api_level(&session.config, "9", ArchType::Arm).unwrap();
        assert_eq!(normalized, "16");
    }

    #[test]
    fn minimum_resolves_to_arch_introduction() {
        let session = test_session();
        let normalized =
            normalize_api_level(&session.config, "minimum", ArchType::Arm64).unwrap();
        assert_eq!(normalized, "21");
    }

    #[test]
    fn current_passes_through() {
        let session = test_session();
        let normalized =
            normalize_api_level(&session.config, "current", ArchType::Arm64).unwrap();
        assert_eq!(normalized, "current");
    }

    #[test]
    fn level_above_platform_is_preserved() {
        // Floored, never capped: a level above the platform stays as-is.
        let session = test_session();
        let platform = session.config.platform_sdk_version();
        let request = (platform + 5).to_string();
        let normalized =
            normalize_api_level(&session.config, &request, ArchType::Arm64).unwrap();
        assert_eq!(normalized, request);
    }

    #[test]
    fn codename_passes_through() {
        let session = test_session();
        let normalized =
            normalize_api_level(&session.config, "Zircon", ArchType::Arm).unwrap();
        assert_eq!(normalized, "Zircon");
    }

    #[test]
    fn expansion_covers_levels_codenames_and_current() {
        let mut config = Config::test_config(BTreeMap::new());
        config.variables.platform_sdk_version = 30;
        config
            .variables
            .platform_version_active_codenames = vec!["Zircon".to_string()];
        let levels = expand_levels(&config, "28", ArchType::Arm64).unwrap();
        assert_eq!(levels, vec!["28", "29", "30", "Zircon", "current"]);
    }

    #[test]
    fn current_base_generates_only_unfinalized_clones() {
        let config = Config::test_config(BTreeMap::new());
        let levels = expand_levels(&config, "current", ArchType::Arm64).unwrap();
        assert_eq!(levels, vec!["current"]);
    }

    #[test]
    fn version_marker_threshold() {
        let config = Config::test_config(BTreeMap::new());
        assert!(!version_marker_required(&config, "23", Some("24")).unwrap());
        assert!(version_marker_required(&config, "24", Some("24")).unwrap());
        assert!(version_marker_required(&config, "current", Some("24")).unwrap());
        // No threshold: always required.
        assert!(version_marker_required(&config, "23", None).unwrap());
        // "current" threshold: only the current clone is marked.
        assert!(version_marker_required(&config, "current", Some("current")).unwrap());
        assert!(!version_marker_required(&config, "29", Some("current")).unwrap());
    }

    #[test]
    fn expansion_registers_stub_library() {
        let session = test_session();
        let module = stub_module("libc", "29", ArchType::Arm64);
        let clones = expand_module(&session, &module).unwrap();
        assert!(!clones.is_empty());
        assert!(clones
            .iter()
            .all(|clone| clone.api_level.is_some()));
        assert!(session
            .stub_libraries
            .lock()
            .unwrap()
            .contains("libc"));
        assert_eq!(
            clones.last().unwrap().variant_name,
            "libc.stub@current"
        );
    }

    #[test]
    fn malformed_symbol_file_is_module_scoped() {
        let session = test_session();
        let mut bad = stub_module("libfoo", "29", ArchType::Arm64);
        bad.stub.as_mut().unwrap().symbol_file = "libfoo.txt".to_string();
        let good = stub_module("libbar", "29", ArchType::Arm64);

        // Both modules run; the error names only the offender.
        let result = run_pass(&session, vec![bad, good]);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("libfoo"));
        assert!(!message.contains("module 'libbar'"));
    }
}
