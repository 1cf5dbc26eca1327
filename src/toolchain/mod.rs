//! Toolchain selection and flag composition.
//!
//! A [`ToolchainRegistry`] is a fixed table from (target OS, architecture
//! type) to a factory function. Each factory is a pure function from an
//! architecture descriptor to a [`Toolchain`] value; an unknown architecture
//! variant is a fatal configuration error. The registry is immutable after
//! construction and safe to share read-only across parallel passes.

mod arm;
mod arm64;
mod riscv64;
mod simulator;
mod x86;
mod x86_64;

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::config::{Arch, ArchType, OsType};

/// Compiler/linker flag bundle for one (OS, architecture) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub name: &'static str,
    /// Target triple passed to the compiler driver.
    pub triple: &'static str,
    pub is_64bit: bool,
    /// Base compiler flags for every module on this target.
    pub cflags: Vec<String>,
    pub cppflags: Vec<String>,
    pub ldflags: Vec<String>,
    /// Linker flags when the lld driver is in use.
    pub lldflags: Vec<String>,
    /// Architecture-variant and CPU-variant specific compiler flags.
    pub arch_cflags: Vec<String>,
    pub include_flags: Vec<String>,
    /// Foreign sysroot for simulated/cross targets.
    pub sysroot: Option<String>,
}

impl Toolchain {
    /// All compiler flags, base flags first, joined for a command line.
    pub fn compose_cflags(&self) -> String {
        let mut flags: Vec<String> = Vec::new();
        if let Some(sysroot) = &self.sysroot {
            flags.push(format!("--target={}", self.triple));
            flags.push(format!("--sysroot={sysroot}"));
        }
        flags.extend(self.cflags.iter().cloned());
        flags.extend(self.arch_cflags.iter().cloned());
        flags.extend(self.include_flags.iter().cloned());
        flags.join(" ")
    }

    pub fn compose_ldflags(&self) -> String {
        self.compose_linker(&self.ldflags)
    }

    pub fn compose_lldflags(&self) -> String {
        self.compose_linker(&self.lldflags)
    }

    fn compose_linker(&self, base: &[String]) -> String {
        let mut flags: Vec<String> = Vec::new();
        if let Some(sysroot) = &self.sysroot {
            flags.push(format!("--target={}", self.triple));
            flags.push(format!("--sysroot={sysroot}"));
        }
        flags.extend(base.iter().cloned());
        flags.join(" ")
    }
}

/// Pure factory from an architecture descriptor to a toolchain.
pub type ToolchainFactory = fn(&Arch) -> Result<Toolchain>;

/// Read-only lookup table from (OS, architecture type) to toolchain factory.
pub struct ToolchainRegistry {
    table: BTreeMap<(OsType, ArchType), ToolchainFactory>,
}

impl ToolchainRegistry {
    /// Registry with every built-in toolchain registered.
    pub fn with_builtins() -> ToolchainRegistry {
        let mut registry = ToolchainRegistry {
            table: BTreeMap::new(),
        };
        registry.register(OsType::Device, ArchType::Arm, arm::toolchain);
        registry.register(OsType::Device, ArchType::Arm64, arm64::toolchain);
        registry.register(OsType::Device, ArchType::X86, x86::toolchain);
        registry.register(OsType::Device, ArchType::X86_64, x86_64::toolchain);
        registry.register(OsType::Device, ArchType::Riscv64, riscv64::toolchain);
        registry.register(OsType::Simulator, ArchType::Arm64, simulator::arm64_toolchain);
        registry.register(
            OsType::Simulator,
            ArchType::X86_64,
            simulator::x86_64_toolchain,
        );
        registry
    }

    fn register(&mut self, os: OsType, arch: ArchType, factory: ToolchainFactory) {
        let previous = self.table.insert((os, arch), factory);
        assert!(
            previous.is_none(),
            "duplicate toolchain registration for ({os}, {arch})"
        );
    }

    pub fn toolchain_for(&self, os: OsType, arch: &Arch) -> Result<Toolchain> {
        match self.table.get(&(os, arch.arch_type)) {
            Some(factory) => factory(arch),
            None => bail!(
                "no toolchain registered for OS '{os}' architecture '{}'",
                arch.arch_type
            ),
        }
    }
}

/// Select CPU-variant flags from a fixed table, falling back to the empty
/// default entry when the variant is unrecognized.
pub(crate) fn variant_or_default<'a>(
    table: &[(&'a str, &'a [&'a str])],
    variant: &str,
) -> &'a [&'a str] {
    for (name, flags) in table {
        if *name == variant {
            return flags;
        }
    }
    for (name, flags) in table {
        if name.is_empty() {
            return flags;
        }
    }
    &[]
}

pub(crate) fn owned(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|flag| flag.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch(arch_type: ArchType, variant: &str, cpu: &str) -> Arch {
        Arch {
            arch_type,
            arch_variant: variant.to_string(),
            cpu_variant: cpu.to_string(),
            abi: vec![],
        }
    }

    #[test]
    fn device_lookup_succeeds_for_known_variants() {
        let registry = ToolchainRegistry::with_builtins();
        let toolchain = registry
            .toolchain_for(OsType::Device, &arch(ArchType::Arm64, "armv8-a", "cortex-a53"))
            .unwrap();
        assert!(toolchain.is_64bit);
        assert!(toolchain.compose_cflags().contains("-march=armv8-a"));
    }

    #[test]
    fn unknown_arch_variant_is_fatal() {
        let registry = ToolchainRegistry::with_builtins();
        let err = registry
            .toolchain_for(OsType::Device, &arch(ArchType::Arm64, "armv9-z", ""))
            .unwrap_err();
        assert!(err.to_string().contains("armv9-z"));
    }

    #[test]
    fn unknown_cpu_variant_falls_back_to_default() {
        let registry = ToolchainRegistry::with_builtins();
        let toolchain = registry
            .toolchain_for(
                OsType::Device,
                &arch(ArchType::Arm64, "armv8-a", "experimental-cpu"),
            )
            .unwrap();
        // Unrecognized CPU variants compose the empty default, not an error.
        assert!(!toolchain.compose_cflags().contains("experimental-cpu"));
    }

    #[test]
    fn unregistered_pair_is_an_error() {
        let registry = ToolchainRegistry::with_builtins();
        assert!(registry
            .toolchain_for(OsType::Simulator, &arch(ArchType::Arm, "", ""))
            .is_err());
    }

    #[test]
    fn simulator_flags_use_foreign_sysroot() {
        let registry = ToolchainRegistry::with_builtins();
        let toolchain = registry
            .toolchain_for(OsType::Simulator, &arch(ArchType::Arm64, "", ""))
            .unwrap();
        let cflags = toolchain.compose_cflags();
        assert!(cflags.contains("--sysroot="));
        assert!(toolchain.compose_ldflags().contains("--target"));
    }
}
