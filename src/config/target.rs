//! Target matrix types: operating systems, architectures, and the decoded
//! per-OS target lists.
//!
//! A [`Target`] is one (OS, architecture) combination a build produces
//! artifacts for. The configuration resolves product variables into an
//! ordered list of targets per OS; the first device target is the primary
//! architecture.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::variables::ProductVariables;

/// Operating systems a module can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsType {
    /// The product device itself.
    Device,
    /// The machine running the build (tools, code generators).
    Host,
    /// A simulated device target that cross-compiles against a foreign
    /// sysroot instead of the native toolchain layout.
    Simulator,
}

impl OsType {
    pub fn name(self) -> &'static str {
        match self {
            OsType::Device => "device",
            OsType::Host => "host",
            OsType::Simulator => "simulator",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 32-/64-bit multilib class of an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Multilib {
    Lib32,
    Lib64,
}

/// CPU architecture families known to the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchType {
    Arm,
    Arm64,
    X86,
    X86_64,
    Riscv64,
}

impl ArchType {
    pub fn name(self) -> &'static str {
        match self {
            ArchType::Arm => "arm",
            ArchType::Arm64 => "arm64",
            ArchType::X86 => "x86",
            ArchType::X86_64 => "x86_64",
            ArchType::Riscv64 => "riscv64",
        }
    }

    pub fn multilib(self) -> Multilib {
        match self {
            ArchType::Arm | ArchType::X86 => Multilib::Lib32,
            ArchType::Arm64 | ArchType::X86_64 | ArchType::Riscv64 => Multilib::Lib64,
        }
    }

    pub fn is_64bit(self) -> bool {
        self.multilib() == Multilib::Lib64
    }

    pub fn from_name(name: &str) -> Result<ArchType> {
        Ok(match name {
            "arm" => ArchType::Arm,
            "arm64" => ArchType::Arm64,
            "x86" => ArchType::X86,
            "x86_64" => ArchType::X86_64,
            "riscv64" => ArchType::Riscv64,
            other => bail!("unknown architecture type '{other}'"),
        })
    }
}

impl fmt::Display for ArchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full architecture descriptor for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arch {
    pub arch_type: ArchType,
    /// Architecture variant, e.g. "armv8-a". Empty means the default.
    pub arch_variant: String,
    /// CPU variant, e.g. "cortex-a53". Empty means the generic CPU.
    pub cpu_variant: String,
    /// Supported ABI names, most specific first.
    pub abi: Vec<String>,
}

impl Arch {
    pub fn new(arch_type: ArchType) -> Arch {
        Arch {
            arch_type,
            arch_variant: String::new(),
            cpu_variant: String::new(),
            abi: Vec::new(),
        }
    }
}

/// Native bridge state of a target. An enabled bridge emulates a guest
/// architecture on top of one of the configured host-ISA device targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeBridgeMode {
    Disabled,
    Enabled {
        /// Device architecture that hosts the emulation.
        host_arch: ArchType,
        /// Emulated guest architecture.
        guest_arch: ArchType,
    },
}

impl NativeBridgeMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, NativeBridgeMode::Disabled)
    }
}

/// One concrete build target. Immutable once placed in the configuration's
/// target matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub os: OsType,
    pub arch: Arch,
    pub native_bridge: NativeBridgeMode,
}

impl Target {
    pub fn new(os: OsType, arch: Arch) -> Target {
        Target {
            os,
            arch,
            native_bridge: NativeBridgeMode::Disabled,
        }
    }

    /// "arch-<type>" or "arch-<type>-<variant>", used for snapshot layout.
    pub fn arch_dir_name(&self) -> String {
        if self.arch.arch_variant.is_empty() {
            format!("arch-{}", self.arch.arch_type)
        } else {
            format!("arch-{}-{}", self.arch.arch_type, self.arch.arch_variant)
        }
    }
}

/// One row of an architecture-set override table (expanded test matrix,
/// NDK ABIs, AML ABIs).
#[derive(Debug, Clone)]
pub struct ArchConfig {
    pub arch_type: ArchType,
    pub arch_variant: &'static str,
    pub cpu_variant: &'static str,
    pub abi: &'static [&'static str],
}

/// Every architecture at its most common variant, for "build everything"
/// test products.
pub fn expanded_arch_sets() -> Vec<ArchConfig> {
    vec![
        ArchConfig {
            arch_type: ArchType::Arm64,
            arch_variant: "armv8-a",
            cpu_variant: "generic",
            abi: &["arm64-v8a"],
        },
        ArchConfig {
            arch_type: ArchType::Arm,
            arch_variant: "armv7-a-neon",
            cpu_variant: "generic",
            abi: &["armeabi-v7a"],
        },
        ArchConfig {
            arch_type: ArchType::X86_64,
            arch_variant: "",
            cpu_variant: "",
            abi: &["x86_64"],
        },
        ArchConfig {
            arch_type: ArchType::X86,
            arch_variant: "",
            cpu_variant: "",
            abi: &["x86"],
        },
        ArchConfig {
            arch_type: ArchType::Riscv64,
            arch_variant: "rv64im",
            cpu_variant: "",
            abi: &["riscv64"],
        },
    ]
}

/// Restricted matrix for building the portable stub sysroot.
pub fn ndk_abi_arch_sets() -> Vec<ArchConfig> {
    vec![
        ArchConfig {
            arch_type: ArchType::Arm64,
            arch_variant: "armv8-a",
            cpu_variant: "",
            abi: &["arm64-v8a"],
        },
        ArchConfig {
            arch_type: ArchType::Arm,
            arch_variant: "armv7-a-neon",
            cpu_variant: "",
            abi: &["armeabi-v7a"],
        },
        ArchConfig {
            arch_type: ArchType::X86_64,
            arch_variant: "",
            cpu_variant: "",
            abi: &["x86_64"],
        },
        ArchConfig {
            arch_type: ArchType::X86,
            arch_variant: "",
            cpu_variant: "",
            abi: &["x86"],
        },
    ]
}

/// Restricted matrix for updatable-module builds: one ABI per multilib class.
pub fn aml_abi_arch_sets() -> Vec<ArchConfig> {
    vec![
        ArchConfig {
            arch_type: ArchType::Arm64,
            arch_variant: "armv8-a",
            cpu_variant: "",
            abi: &["arm64-v8a"],
        },
        ArchConfig {
            arch_type: ArchType::X86_64,
            arch_variant: "",
            cpu_variant: "",
            abi: &["x86_64"],
        },
    ]
}

pub fn targets_from_arch_sets(sets: &[ArchConfig]) -> Vec<Target> {
    sets.iter()
        .map(|set| {
            Target::new(
                OsType::Device,
                Arch {
                    arch_type: set.arch_type,
                    arch_variant: set.arch_variant.to_string(),
                    cpu_variant: set.cpu_variant.to_string(),
                    abi: set.abi.iter().map(|abi| abi.to_string()).collect(),
                },
            )
        })
        .collect()
}

/// Decode the device target list from product variables: one primary
/// architecture, an optional secondary architecture, and an optional
/// native-bridge guest layered on a host-ISA target.
pub fn decode_device_targets(vars: &ProductVariables) -> Result<Vec<Target>> {
    let mut targets = Vec::new();

    if vars.device_arch.is_empty() {
        bail!("product variables do not set device_arch");
    }

    let primary = Target::new(
        OsType::Device,
        Arch {
            arch_type: ArchType::from_name(&vars.device_arch)?,
            arch_variant: vars.device_arch_variant.clone(),
            cpu_variant: vars.device_cpu_variant.clone(),
            abi: vars.device_abi.clone(),
        },
    );
    targets.push(primary);

    if !vars.device_secondary_arch.is_empty() {
        targets.push(Target::new(
            OsType::Device,
            Arch {
                arch_type: ArchType::from_name(&vars.device_secondary_arch)?,
                arch_variant: vars.device_secondary_arch_variant.clone(),
                cpu_variant: vars.device_secondary_cpu_variant.clone(),
                abi: vars.device_secondary_abi.clone(),
            },
        ));
    }

    if !vars.native_bridge_arch.is_empty() {
        let guest = ArchType::from_name(&vars.native_bridge_arch)?;
        let host = ArchType::from_name(&vars.native_bridge_host_arch)?;
        if !targets
            .iter()
            .any(|target| target.arch.arch_type == host)
        {
            bail!(
                "native bridge host architecture '{host}' is not part of the device target matrix"
            );
        }
        let mut target = Target::new(
            OsType::Device,
            Arch {
                arch_type: guest,
                arch_variant: vars.native_bridge_arch_variant.clone(),
                cpu_variant: String::new(),
                abi: vars.native_bridge_abi.clone(),
            },
        );
        target.native_bridge = NativeBridgeMode::Enabled {
            host_arch: host,
            guest_arch: guest,
        };
        targets.push(target);
    }

    Ok(targets)
}

/// Host targets for tools that run on the build machine.
pub fn host_targets() -> Vec<Target> {
    vec![Target::new(OsType::Host, Arch::new(ArchType::X86_64))]
}
