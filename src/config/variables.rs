//! The two on-disk configuration structures.
//!
//! `BuildOptions` holds generic build switches; `ProductVariables` holds the
//! per-product/device description exported by the product definition. Both
//! are loaded from TOML files in the build output directory at start-up and
//! synthesized with defaults when missing, so repeated runs agree on their
//! dependency inputs.

use serde::{Deserialize, Serialize};

/// Generic build options (`build.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    /// Build every known device architecture instead of the product matrix.
    pub test_all_variants: bool,
    /// Link host tools statically.
    pub host_static_link: bool,
}

/// Product and device description (`product.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProductVariables {
    pub device_name: String,
    pub platform_version_name: String,
    /// Numeric API level of the current platform.
    pub platform_sdk_version: u32,
    /// True once the current platform API is frozen.
    pub platform_sdk_final: bool,
    /// In-development release codenames still active for this build.
    pub platform_version_active_codenames: Vec<String>,

    pub device_arch: String,
    pub device_arch_variant: String,
    pub device_cpu_variant: String,
    pub device_abi: Vec<String>,

    pub device_secondary_arch: String,
    pub device_secondary_arch_variant: String,
    pub device_secondary_cpu_variant: String,
    pub device_secondary_abi: Vec<String>,

    pub native_bridge_arch: String,
    pub native_bridge_arch_variant: String,
    pub native_bridge_abi: Vec<String>,
    pub native_bridge_host_arch: String,

    /// Restrict the device matrix to the portable stub-sysroot ABIs.
    pub ndk_abis: bool,
    /// Restrict the device matrix to the updatable-module ABIs.
    pub aml_abis: bool,

    /// Frozen ABI version the constrained partition is built against.
    /// "current" (or empty) means the partition builds from source and a
    /// fresh snapshot may be packaged.
    pub device_abi_freeze_version: String,

    /// Install subdirectory of the constrained partition.
    pub device_partition_dir: String,

    pub gcov_coverage: bool,
    pub clang_coverage: bool,
    /// Derived: set when either coverage backend is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_coverage: Option<bool>,

    pub sanitize_device: Vec<String>,

    /// `old:new` module name override pairs.
    pub module_name_overrides: Vec<String>,

    /// `namespace:module` pairs composing the boot module path.
    pub boot_modules: Vec<String>,
}

impl Default for ProductVariables {
    fn default() -> ProductVariables {
        ProductVariables {
            device_name: "generic".to_string(),
            platform_version_name: String::new(),
            platform_sdk_version: 30,
            platform_sdk_final: false,
            platform_version_active_codenames: Vec::new(),
            device_arch: "arm64".to_string(),
            device_arch_variant: "armv8-a".to_string(),
            device_cpu_variant: String::new(),
            device_abi: vec!["arm64-v8a".to_string()],
            device_secondary_arch: String::new(),
            device_secondary_arch_variant: String::new(),
            device_secondary_cpu_variant: String::new(),
            device_secondary_abi: Vec::new(),
            native_bridge_arch: String::new(),
            native_bridge_arch_variant: String::new(),
            native_bridge_abi: Vec::new(),
            native_bridge_host_arch: String::new(),
            ndk_abis: false,
            aml_abis: false,
            device_abi_freeze_version: "current".to_string(),
            device_partition_dir: "device".to_string(),
            gcov_coverage: false,
            clang_coverage: false,
            native_coverage: None,
            sanitize_device: Vec::new(),
            module_name_overrides: Vec::new(),
            boot_modules: Vec::new(),
        }
    }
}
