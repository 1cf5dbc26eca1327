//! x86_64 device toolchain.

use anyhow::{bail, Result};

use super::{owned, variant_or_default, Toolchain};
use crate::config::Arch;

const X86_64_CFLAGS: &[&str] = &["-Werror=implicit-function-declaration"];

const X86_64_LDFLAGS: &[&str] = &["-Wl,--hash-style=gnu"];

const X86_64_LLDFLAGS: &[&str] = &["-Wl,--hash-style=gnu", "-Wl,-z,max-page-size=4096"];

const X86_64_ARCH_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("", &[]),
    ("broadwell", &["-march=broadwell"]),
    ("haswell", &["-march=core-avx2"]),
    ("ivybridge", &["-march=core-avx-i"]),
    ("sandybridge", &["-march=corei7"]),
    ("silvermont", &["-march=slm"]),
];

const X86_64_CPU_VARIANT_CFLAGS: &[(&str, &[&str])] = &[("", &[])];

pub(super) fn toolchain(arch: &Arch) -> Result<Toolchain> {
    let variant_cflags = match X86_64_ARCH_VARIANT_CFLAGS
        .iter()
        .find(|(name, _)| *name == arch.arch_variant)
    {
        Some((_, flags)) => *flags,
        None => bail!(
            "unknown x86_64 architecture variant '{}'",
            arch.arch_variant
        ),
    };

    let mut arch_cflags = owned(variant_cflags);
    arch_cflags.extend(owned(variant_or_default(
        X86_64_CPU_VARIANT_CFLAGS,
        &arch.cpu_variant,
    )));

    Ok(Toolchain {
        name: "x86_64",
        triple: "x86_64-linux-android",
        is_64bit: true,
        cflags: owned(X86_64_CFLAGS),
        cppflags: vec![],
        ldflags: owned(X86_64_LDFLAGS),
        lldflags: owned(X86_64_LLDFLAGS),
        arch_cflags,
        include_flags: vec![],
        sysroot: None,
    })
}
