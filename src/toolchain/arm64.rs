//! arm64 device toolchain.

use anyhow::{bail, Result};

use super::{owned, variant_or_default, Toolchain};
use crate::config::Arch;

const ARM64_CFLAGS: &[&str] = &[
    // Help catch common 32/64-bit errors.
    "-Werror=implicit-function-declaration",
    "-fno-emulated-tls",
];

const ARM64_LDFLAGS: &[&str] = &[
    "-Wl,--hash-style=gnu",
    "-Wl,-z,separate-code",
    "-Wl,--icf=safe",
];

const ARM64_LLDFLAGS: &[&str] = &[
    "-Wl,--hash-style=gnu",
    "-Wl,-z,separate-code",
    "-Wl,--icf=safe",
    "-Wl,-z,max-page-size=4096",
];

const ARM64_ARCH_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("armv8-a", &["-march=armv8-a"]),
    ("armv8-2a", &["-march=armv8.2-a"]),
    ("armv8-2a-dotprod", &["-march=armv8.2-a+dotprod"]),
];

const ARM64_CPU_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("", &[]),
    ("cortex-a53", &["-mcpu=cortex-a53"]),
    ("cortex-a55", &["-mcpu=cortex-a55"]),
    ("cortex-a75", &["-mcpu=cortex-a55"]),
    ("cortex-a76", &["-mcpu=cortex-a76"]),
    ("kryo", &["-mcpu=kryo"]),
    ("exynos-m1", &["-mcpu=exynos-m1"]),
    ("exynos-m2", &["-mcpu=exynos-m2"]),
];

pub(super) fn toolchain(arch: &Arch) -> Result<Toolchain> {
    let variant_cflags = match ARM64_ARCH_VARIANT_CFLAGS
        .iter()
        .find(|(name, _)| *name == arch.arch_variant)
    {
        Some((_, flags)) => *flags,
        None => bail!("unknown arm64 architecture variant '{}'", arch.arch_variant),
    };

    let mut arch_cflags = owned(variant_cflags);
    arch_cflags.extend(owned(variant_or_default(
        ARM64_CPU_VARIANT_CFLAGS,
        &arch.cpu_variant,
    )));

    Ok(Toolchain {
        name: "arm64",
        triple: "aarch64-linux-android",
        is_64bit: true,
        cflags: owned(ARM64_CFLAGS),
        cppflags: vec![],
        ldflags: owned(ARM64_LDFLAGS),
        lldflags: owned(ARM64_LLDFLAGS),
        arch_cflags,
        include_flags: vec![],
        sysroot: None,
    })
}
