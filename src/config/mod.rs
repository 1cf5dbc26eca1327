//! Build configuration resolution.
//!
//! A [`Config`] is constructed once per build invocation, before any module
//! processing starts, and is read concurrently by every later pass. It loads
//! the two configuration files from the output directory (synthesizing
//! defaults atomically when they are missing), resolves the target-variant
//! matrix from product variables, detects multilib conflicts, and owns the
//! memoized environment-access ledger used for build invalidation.

pub mod pairlist;
pub mod target;
pub mod variables;

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub use pairlist::ConfiguredPairList;
pub use target::{Arch, ArchType, Multilib, NativeBridgeMode, OsType, Target};
pub use variables::{BuildOptions, ProductVariables};

/// Generic build options file in the output directory.
pub const OPTIONS_FILE_NAME: &str = "build.toml";
/// Product variables file in the output directory.
pub const VARIABLES_FILE_NAME: &str = "product.toml";

/// API level used for the not-yet-finalized platform ("current"); sorts
/// above every real level.
pub const FUTURE_API_LEVEL: u32 = 10000;

/// Lowest platform API level any module may target.
pub const MIN_SUPPORTED_SDK_VERSION: u32 = 16;

#[derive(Debug, Default)]
struct EnvLedger {
    /// Raw environment passed to the build.
    source: BTreeMap<String, String>,
    /// Every key that has been looked up, with the value observed.
    accessed: BTreeMap<String, String>,
    /// Once the ledger has been handed out, new keys may not be added.
    frozen: bool,
}

/// Immutable build configuration snapshot.
///
/// Only the environment ledger mutates after construction, and it is behind
/// its own lock because mutation passes run in parallel and may query it.
#[derive(Debug)]
pub struct Config {
    pub options: BuildOptions,
    pub variables: ProductVariables,

    src_dir: PathBuf,
    out_dir: PathBuf,
    module_list_file: Option<PathBuf>,

    targets: BTreeMap<OsType, Vec<Target>>,
    /// Multilib classes claimed by more than one configured device
    /// architecture.
    multilib_conflicts: BTreeSet<ArchType>,

    ledger: Mutex<EnvLedger>,
}

impl Config {
    /// Resolve a configuration from the source root, output directory, and
    /// environment. Loads (or synthesizes) the two configuration files from
    /// the output directory.
    pub fn new(
        src_dir: &Path,
        out_dir: &Path,
        module_list_file: Option<PathBuf>,
        env: BTreeMap<String, String>,
    ) -> Result<Config> {
        check_dir_containment(src_dir, out_dir)?;
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory '{}'", out_dir.display()))?;

        let options: BuildOptions = load_config_file(&out_dir.join(OPTIONS_FILE_NAME))?;
        let mut variables: ProductVariables =
            load_config_file(&out_dir.join(VARIABLES_FILE_NAME))?;

        if variables.gcov_coverage && variables.clang_coverage {
            bail!("gcov_coverage and clang_coverage cannot both be set");
        }
        variables.native_coverage = Some(variables.gcov_coverage || variables.clang_coverage);

        // Validate override syntax up front so a bad rule is a start-up
        // error, not a surprise deep inside a mutation pass.
        for rule in &variables.module_name_overrides {
            split_override_rule(rule)?;
        }

        let targets = resolve_target_matrix(&options, &variables)?;
        let multilib_conflicts = find_multilib_conflicts(&targets);

        Ok(Config {
            options,
            variables,
            src_dir: src_dir.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            module_list_file,
            targets,
            multilib_conflicts,
            ledger: Mutex::new(EnvLedger {
                source: env,
                ..EnvLedger::default()
            }),
        })
    }

    /// In-memory configuration for tests: no files are read or written.
    pub fn test_config(env: BTreeMap<String, String>) -> Config {
        let variables = ProductVariables {
            device_name: "test_device".to_string(),
            ..ProductVariables::default()
        };
        let options = BuildOptions::default();
        let targets = resolve_target_matrix(&options, &variables)
            .expect("default product variables must decode");
        let multilib_conflicts = find_multilib_conflicts(&targets);
        Config {
            options,
            variables,
            src_dir: PathBuf::from("/src"),
            out_dir: PathBuf::from("/out"),
            module_list_file: None,
            targets,
            multilib_conflicts,
            ledger: Mutex::new(EnvLedger {
                source: env,
                ..EnvLedger::default()
            }),
        }
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn module_list_file(&self) -> Option<&Path> {
        self.module_list_file.as_deref()
    }

    pub fn targets(&self, os: OsType) -> &[Target] {
        self.targets.get(&os).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn device_targets(&self) -> &[Target] {
        self.targets(OsType::Device)
    }

    /// The first configured device architecture.
    pub fn primary_device_arch(&self) -> Option<&Arch> {
        self.device_targets().first().map(|target| &target.arch)
    }

    pub fn has_multilib_conflict(&self, arch: ArchType) -> bool {
        self.multilib_conflicts.contains(&arch)
    }

    pub fn device_name(&self) -> &str {
        &self.variables.device_name
    }

    pub fn platform_sdk_version(&self) -> u32 {
        self.variables.platform_sdk_version
    }

    pub fn active_codenames(&self) -> &[String] {
        &self.variables.platform_version_active_codenames
    }

    pub fn min_supported_sdk_version(&self) -> u32 {
        MIN_SUPPORTED_SDK_VERSION
    }

    /// Frozen ABI version of the constrained partition, or None when the
    /// partition builds from source ("current").
    pub fn abi_freeze_version(&self) -> Option<&str> {
        match self.variables.device_abi_freeze_version.as_str() {
            "" | "current" => None,
            version => Some(version),
        }
    }

    pub fn native_coverage(&self) -> bool {
        self.variables.native_coverage.unwrap_or(false)
    }

    /// The boot module path as an ordered (namespace, module) list.
    pub fn boot_module_list(&self) -> Result<ConfiguredPairList> {
        ConfiguredPairList::parse(&self.variables.boot_modules)
    }

    /// Apply the product's module name override table. Returns the original
    /// name when no rule matches.
    pub fn override_module_name<'a>(&'a self, name: &'a str) -> &'a str {
        for rule in &self.variables.module_name_overrides {
            // Rules were validated at construction time.
            if let Ok((from, to)) = split_override_rule(rule) {
                if from == name {
                    return to;
                }
            }
        }
        name
    }

    /// Memoized environment lookup. Every key requested here becomes part of
    /// the declared environment dependency set; once that set has been
    /// handed out via [`Config::env_deps`], looking up a novel key is an
    /// error so the declared set cannot silently grow.
    pub fn env(&self, key: &str) -> Result<String> {
        let mut ledger = self.ledger.lock().expect("env ledger poisoned");
        if let Some(value) = ledger.accessed.get(key) {
            return Ok(value.clone());
        }
        if ledger.frozen {
            bail!("environment variable '{key}' accessed after the dependency ledger was frozen");
        }
        let value = ledger.source.get(key).cloned().unwrap_or_default();
        ledger.accessed.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn env_or_default(&self, key: &str, default: &str) -> Result<String> {
        let value = self.env(key)?;
        if value.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(value)
        }
    }

    pub fn is_env_true(&self, key: &str) -> Result<bool> {
        let value = self.env(key)?;
        Ok(matches!(value.as_str(), "1" | "y" | "yes" | "on" | "true"))
    }

    pub fn is_env_false(&self, key: &str) -> Result<bool> {
        let value = self.env(key)?;
        Ok(matches!(value.as_str(), "0" | "n" | "no" | "off" | "false"))
    }

    /// The complete ledger of accessed environment keys. Freezes the ledger:
    /// later lookups of keys not already present will fail.
    pub fn env_deps(&self) -> BTreeMap<String, String> {
        let mut ledger = self.ledger.lock().expect("env ledger poisoned");
        ledger.frozen = true;
        ledger.accessed.clone()
    }

    /// Stable digest of the environment dependency set, for build
    /// invalidation. Freezes the ledger.
    pub fn env_fingerprint(&self) -> String {
        let deps = self.env_deps();
        let mut hasher = Sha256::new();
        for (key, value) in &deps {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// The build output directory and the source root may not contain each
/// other. This won't catch exotic symlink setups, but covers the obvious
/// misconfiguration.
fn check_dir_containment(src_dir: &Path, out_dir: &Path) -> Result<()> {
    let src = normalize(src_dir);
    let out = normalize(out_dir);
    if src.starts_with(&out) {
        bail!(
            "output directory '{}' must not contain the source root '{}'",
            out.display(),
            src.display()
        );
    }
    if out.starts_with(&src) {
        bail!(
            "output directory '{}' must not be inside the source root '{}'",
            out.display(),
            src.display()
        );
    }
    Ok(())
}

fn normalize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Load a TOML configuration file, synthesizing it from defaults when it
/// does not exist. The synthesized file is written atomically so concurrent
/// generators (build graph and documentation) cannot observe a partial file.
fn load_config_file<T>(path: &Path) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    match fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text)
            .with_context(|| format!("config file '{}' did not parse", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let value = T::default();
            save_config_file(&value, path)?;
            Ok(value)
        }
        Err(err) => {
            Err(err).with_context(|| format!("could not open config file '{}'", path.display()))
        }
    }
}

/// Serialize a configuration value and atomically replace `path` with it:
/// write to a temporary file in the destination directory, then rename.
pub fn save_config_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = toml::to_string_pretty(value)
        .with_context(|| format!("serializing config for '{}'", path.display()))?;
    let dir = path
        .parent()
        .with_context(|| format!("config path '{}' has no parent directory", path.display()))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp = dir.join(format!(".config-tmp-{nanos}"));
    fs::write(&tmp, text.as_bytes())
        .with_context(|| format!("writing temporary config '{}'", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "renaming temporary config '{}' to '{}'",
            tmp.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Resolve the per-OS target matrix. Exactly one of the three architecture
/// set selectors may replace the default device matrix.
fn resolve_target_matrix(
    options: &BuildOptions,
    variables: &ProductVariables,
) -> Result<BTreeMap<OsType, Vec<Target>>> {
    let selectors = [
        options.test_all_variants,
        variables.ndk_abis,
        variables.aml_abis,
    ];
    if selectors.iter().filter(|&&set| set).count() > 1 {
        bail!(
            "at most one of test_all_variants, ndk_abis, and aml_abis may be set"
        );
    }

    let device_targets = if options.test_all_variants {
        target::targets_from_arch_sets(&target::expanded_arch_sets())
    } else if variables.ndk_abis {
        target::targets_from_arch_sets(&target::ndk_abi_arch_sets())
    } else if variables.aml_abis {
        target::targets_from_arch_sets(&target::aml_abi_arch_sets())
    } else {
        target::decode_device_targets(variables)?
    };

    let mut targets = BTreeMap::new();
    targets.insert(OsType::Host, target::host_targets());
    targets.insert(OsType::Device, device_targets);
    Ok(targets)
}

fn find_multilib_conflicts(targets: &BTreeMap<OsType, Vec<Target>>) -> BTreeSet<ArchType> {
    let mut seen: BTreeMap<Multilib, usize> = BTreeMap::new();
    let mut conflicts = BTreeSet::new();
    if let Some(device_targets) = targets.get(&OsType::Device) {
        for target in device_targets {
            let multilib = target.arch.arch_type.multilib();
            let count = seen.entry(multilib).or_insert(0);
            *count += 1;
            if *count > 1 {
                conflicts.insert(target.arch.arch_type);
            }
        }
    }
    conflicts
}

fn split_override_rule(rule: &str) -> Result<(&str, &str)> {
    match rule.split_once(':') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() && !to.contains(':') => {
            Ok((from, to))
        }
        _ => bail!(
            "invalid override rule '{rule}' in module_name_overrides, expected <module_name>:<new_name>"
        ),
    }
}
