//! riscv64 device toolchain.

use anyhow::{bail, Result};

use super::{owned, variant_or_default, Toolchain};
use crate::config::Arch;

const RISCV64_CFLAGS: &[&str] = &[
    // Help catch common 32/64-bit errors.
    "-Werror=implicit-function-declaration",
];

const RISCV64_LDFLAGS: &[&str] = &["-Wl,--hash-style=gnu", "-Wl,--icf=safe"];

const RISCV64_LLDFLAGS: &[&str] = &[
    "-Wl,--hash-style=gnu",
    "-Wl,--icf=safe",
    "-Wl,-z,max-page-size=4096",
];

const RISCV64_ARCH_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("rv64i", &["-march=rv64i"]),
    ("rv64im", &["-march=rv64im"]),
];

const RISCV64_CPU_VARIANT_CFLAGS: &[(&str, &[&str])] = &[("", &[])];

pub(super) fn toolchain(arch: &Arch) -> Result<Toolchain> {
    let variant_cflags = match RISCV64_ARCH_VARIANT_CFLAGS
        .iter()
        .find(|(name, _)| *name == arch.arch_variant)
    {
        Some((_, flags)) => *flags,
        None => bail!(
            "unknown riscv64 architecture variant '{}'",
            arch.arch_variant
        ),
    };

    let mut arch_cflags = owned(variant_cflags);
    arch_cflags.extend(owned(variant_or_default(
        RISCV64_CPU_VARIANT_CFLAGS,
        &arch.cpu_variant,
    )));

    Ok(Toolchain {
        name: "riscv64",
        triple: "riscv64-linux-android",
        is_64bit: true,
        cflags: owned(RISCV64_CFLAGS),
        cppflags: vec![],
        ldflags: owned(RISCV64_LDFLAGS),
        lldflags: owned(RISCV64_LLDFLAGS),
        arch_cflags,
        include_flags: vec![],
        sysroot: None,
    })
}
