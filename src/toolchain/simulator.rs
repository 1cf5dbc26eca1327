//! Simulator (cross) toolchains.
//!
//! Simulated device targets compile against a foreign SDK sysroot with an
//! explicit target triple instead of the native toolchain layout, so their
//! flag composition is distinct from the device factories: the triple and
//! sysroot are prepended to every compiler and linker invocation.

use anyhow::Result;

use super::Toolchain;
use crate::config::Arch;

const SIM_ARM64_SYSROOT: &str = "prebuilts/sim_sdk/arch/arm64/sysroot";
const SIM_X86_64_SYSROOT: &str = "prebuilts/sim_sdk/arch/x86_64/sysroot";

const SIM_CPPFLAGS: &[&str] = &["-Wno-error=deprecated-declarations"];

pub(super) fn arm64_toolchain(_arch: &Arch) -> Result<Toolchain> {
    // Architecture variants don't apply to the simulator; it always builds
    // the baseline ISA shipped with the SDK sysroot.
    Ok(Toolchain {
        name: "arm64",
        triple: "aarch64-sim",
        is_64bit: true,
        cflags: vec![],
        cppflags: super::owned(SIM_CPPFLAGS),
        ldflags: vec![format!("-L{SIM_ARM64_SYSROOT}/lib")],
        lldflags: vec![format!("-L{SIM_ARM64_SYSROOT}/lib")],
        arch_cflags: vec!["-march=armv8-a".to_string()],
        include_flags: vec![format!("-I{SIM_ARM64_SYSROOT}/include")],
        sysroot: Some(SIM_ARM64_SYSROOT.to_string()),
    })
}

pub(super) fn x86_64_toolchain(_arch: &Arch) -> Result<Toolchain> {
    Ok(Toolchain {
        name: "x86_64",
        triple: "x86_64-sim",
        is_64bit: true,
        cflags: vec![],
        cppflags: super::owned(SIM_CPPFLAGS),
        ldflags: vec![format!("-L{SIM_X86_64_SYSROOT}/lib")],
        lldflags: vec![format!("-L{SIM_X86_64_SYSROOT}/lib")],
        arch_cflags: vec![],
        include_flags: vec![format!("-I{SIM_X86_64_SYSROOT}/include")],
        sysroot: Some(SIM_X86_64_SYSROOT.to_string()),
    })
}
