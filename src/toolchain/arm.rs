//! 32-bit arm device toolchain.

use anyhow::{bail, Result};

use super::{owned, variant_or_default, Toolchain};
use crate::config::Arch;

const ARM_CFLAGS: &[&str] = &["-msoft-float", "-mthumb"];

const ARM_LDFLAGS: &[&str] = &[
    "-Wl,--hash-style=gnu",
    "-Wl,--icf=safe",
    "-Wl,-m,armelf",
];

const ARM_LLDFLAGS: &[&str] = &[
    "-Wl,--hash-style=gnu",
    "-Wl,--icf=safe",
    "-Wl,-m,armelf",
    "-Wl,-z,max-page-size=4096",
];

const ARM_ARCH_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("armv7-a", &["-march=armv7-a", "-mfloat-abi=softfp", "-mfpu=vfpv3-d16"]),
    (
        "armv7-a-neon",
        &["-march=armv7-a", "-mfloat-abi=softfp", "-mfpu=neon"],
    ),
    ("armv8-a", &["-march=armv8-a", "-mfloat-abi=softfp", "-mfpu=neon-fp-armv8"]),
];

const ARM_CPU_VARIANT_CFLAGS: &[(&str, &[&str])] = &[
    ("", &[]),
    ("cortex-a7", &["-mcpu=cortex-a7"]),
    ("cortex-a8", &["-mcpu=cortex-a8"]),
    ("cortex-a15", &["-mcpu=cortex-a15"]),
    ("cortex-a53", &["-mcpu=cortex-a53"]),
    ("cortex-a55", &["-mcpu=cortex-a55"]),
    ("krait", &["-mcpu=cortex-a15"]),
    ("kryo", &["-mcpu=cortex-a53"]),
];

pub(super) fn toolchain(arch: &Arch) -> Result<Toolchain> {
    let variant_cflags = match ARM_ARCH_VARIANT_CFLAGS
        .iter()
        .find(|(name, _)| *name == arch.arch_variant)
    {
        Some((_, flags)) => *flags,
        None => bail!("unknown arm architecture variant '{}'", arch.arch_variant),
    };

    let mut arch_cflags = owned(variant_cflags);
    arch_cflags.extend(owned(variant_or_default(
        ARM_CPU_VARIANT_CFLAGS,
        &arch.cpu_variant,
    )));

    Ok(Toolchain {
        name: "arm",
        triple: "arm-linux-androideabi",
        is_64bit: false,
        cflags: owned(ARM_CFLAGS),
        cppflags: vec![],
        ldflags: owned(ARM_LDFLAGS),
        lldflags: owned(ARM_LLDFLAGS),
        arch_cflags,
        include_flags: vec![],
        sysroot: None,
    })
}
