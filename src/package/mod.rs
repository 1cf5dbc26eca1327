//! Snapshot packaging.
//!
//! When the constrained partition builds from source (no frozen ABI
//! version configured), the packager walks the finished module set and
//! assembles a fresh snapshot under `<out>/snapshot/<device arch>/`:
//! compiled artifacts grouped per target architecture and kind, a JSON
//! descriptor next to each artifact, exported headers under `include/`,
//! init/service fragments under `configs/`, and license texts under
//! `NOTICES/`. The file list and the compressed archive are derived from
//! the same sorted entry set, so repeated runs over the same inputs are
//! byte-identical.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use crate::module::{LibForm, Module, ModuleKind, Partition};
use crate::mutate::snapshot::{is_snapshot_candidate, registry_name, snapshot_kind, SnapshotKind};
use crate::mutate::PhaseErrors;
use crate::session::Session;

/// Per-artifact metadata written next to each captured file. Empty fields
/// are omitted so descriptors stay small and diffs stay readable.
#[derive(Debug, Default, Serialize)]
pub struct SnapshotDescriptor {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub module_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub relative_install_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exported_dirs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exported_system_dirs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exported_flags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sanitize: String,
    #[serde(skip_serializing_if = "is_false")]
    pub sanitize_minimal_dep: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub sanitize_ubsan_dep: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shared_libs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runtime_libs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_fragments: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_fragments: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Paths produced by one packaging run.
#[derive(Debug)]
pub struct SnapshotOutputs {
    pub snapshot_dir: PathBuf,
    pub list_file: PathBuf,
    pub archive: PathBuf,
    /// Entry paths relative to the snapshot directory, sorted.
    pub entries: Vec<String>,
}

/// Package a fresh snapshot of the constrained partition.
///
/// Returns Ok(None) when a frozen ABI version is configured: the partition
/// is then assembled from an existing snapshot and capturing a new one from
/// the mixed module set would be circular.
pub fn package_snapshot(session: &Session, modules: &[Module]) -> Result<Option<SnapshotOutputs>> {
    let config = &session.config;
    if config.abi_freeze_version().is_some() {
        return Ok(None);
    }
    let Some(primary) = config.primary_device_arch() else {
        bail!("cannot package a snapshot without a configured device target");
    };

    let snapshot_dir = config.out_dir().join("snapshot");
    if snapshot_dir.exists() {
        fs::remove_dir_all(&snapshot_dir).with_context(|| {
            format!("removing stale snapshot dir '{}'", snapshot_dir.display())
        })?;
    }
    let arch_root = snapshot_dir.join(primary.arch_type.name());
    fs::create_dir_all(&arch_root)
        .with_context(|| format!("creating snapshot dir '{}'", arch_root.display()))?;

    let errors = PhaseErrors::new("snapshot packaging");
    let mut packager = Packager {
        src_dir: config.src_dir().to_path_buf(),
        snapshot_dir: snapshot_dir.clone(),
        arch_root,
        written: BTreeSet::new(),
        installed_aux: BTreeSet::new(),
    };

    for module in modules {
        if module.exclude_from_snapshot {
            // Exclusion is a framework-side escape hatch: a module that
            // installs to the constrained partition is part of the snapshot
            // by definition, and an explicit availability opt-in
            // contradicts the exclusion. Unset availability is fine.
            if module.partition == Partition::Device {
                errors.push(
                    &module.name,
                    anyhow!("excluded from the snapshot but installs to the constrained partition"),
                );
            } else if module.snapshot_available == Some(true) {
                errors.push(
                    &module.name,
                    anyhow!("both excluded from the snapshot and explicitly marked snapshot-available"),
                );
            }
            continue;
        }
        if !is_snapshot_candidate(module) {
            continue;
        }
        if let Err(err) = packager.package_module(module) {
            errors.push(&module.variant_name, err);
        }
    }
    errors.into_result()?;

    let entries: Vec<String> = packager.written.into_iter().collect();

    let device = config.device_name();
    let list_file = config.out_dir().join(format!("snapshot-{device}_list"));
    let mut list_text = entries.join("\n");
    list_text.push('\n');
    fs::write(&list_file, list_text)
        .with_context(|| format!("writing snapshot list '{}'", list_file.display()))?;

    let archive = config.out_dir().join(format!("snapshot-{device}.tar.zst"));
    write_archive(&snapshot_dir, &entries, &archive)?;

    println!(
        "packaged {} snapshot file(s) for {} into {}",
        entries.len(),
        device,
        archive.display()
    );

    Ok(Some(SnapshotOutputs {
        snapshot_dir,
        list_file,
        archive,
        entries,
    }))
}

struct Packager {
    src_dir: PathBuf,
    snapshot_dir: PathBuf,
    arch_root: PathBuf,
    /// Every written file, relative to the snapshot directory. BTreeSet
    /// keeps the entry list sorted as it grows.
    written: BTreeSet<String>,
    /// Destination paths of shared auxiliary files (headers, configs,
    /// notices). The first module to install a destination wins; later
    /// identical destinations are skipped.
    installed_aux: BTreeSet<PathBuf>,
}

impl Packager {
    fn package_module(&mut self, module: &Module) -> Result<()> {
        let kind = snapshot_kind(module);
        let kind_dir = self
            .arch_root
            .join(module.target.arch_dir_name())
            .join(kind.dir_name());

        let descriptor_path = match kind {
            SnapshotKind::Header => kind_dir.join(format!("{}.json", module.name)),
            _ => {
                let output = module.output_file.as_ref().ok_or_else(|| {
                    anyhow!("snapshot candidate has no output artifact; this is a bug in the capture predicate")
                })?;
                let stem = artifact_stem(module, output)?;
                let dest = kind_dir.join(&stem);
                self.copy_file(output, &dest)?;
                kind_dir.join(format!("{stem}.json"))
            }
        };

        let descriptor = self.build_descriptor(module, kind);
        self.write_descriptor(&descriptor, &descriptor_path)?;

        self.install_headers(module)?;
        self.install_configs(module)?;
        self.install_notices(module)?;
        Ok(())
    }

    fn build_descriptor(&self, module: &Module, kind: SnapshotKind) -> SnapshotDescriptor {
        let mut descriptor = SnapshotDescriptor {
            module_name: registry_name(module),
            relative_install_path: module.relative_install_path.clone(),
            exported_dirs: rewrite_include_dirs(&module.exported_dirs),
            exported_system_dirs: rewrite_include_dirs(&module.exported_system_dirs),
            exported_flags: module.exported_flags.clone(),
            runtime_libs: module.runtime_libs.clone(),
            required: module.required.clone(),
            init_fragments: rewrite_config_paths(&module.init_fragments),
            service_fragments: rewrite_config_paths(&module.service_fragments),
            ..SnapshotDescriptor::default()
        };
        match kind {
            SnapshotKind::Static => {
                if module.sanitize.cfi {
                    descriptor.sanitize = "cfi".to_string();
                }
                descriptor.sanitize_minimal_dep = module.sanitize.minimal_runtime_dep;
                descriptor.sanitize_ubsan_dep = module.sanitize.ubsan_runtime_dep;
            }
            SnapshotKind::Shared => {
                descriptor.shared_libs = module.shared_libs.clone();
            }
            SnapshotKind::Binary => {
                descriptor.shared_libs = module.shared_libs.clone();
                descriptor.symlinks = module.symlinks.clone();
            }
            SnapshotKind::Header | SnapshotKind::Object => {}
        }
        descriptor
    }

    /// Copy every file under the module's exported include directories into
    /// the shared `include/` tree, preserving source-relative paths.
    fn install_headers(&mut self, module: &Module) -> Result<()> {
        for dir in module
            .exported_dirs
            .iter()
            .chain(module.exported_system_dirs.iter())
        {
            let source_dir = self.src_dir.join(dir);
            if !source_dir.exists() {
                bail!("exported include directory '{dir}' does not exist");
            }
            for entry in WalkDir::new(&source_dir)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry
                    .with_context(|| format!("walking exported include directory '{dir}'"))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&source_dir)
                    .expect("walked path must be under its root");
                let dest = self.arch_root.join("include").join(dir).join(rel);
                if self.installed_aux.contains(&dest) {
                    continue;
                }
                self.copy_file(entry.path(), &dest)?;
                self.installed_aux.insert(dest);
            }
        }
        Ok(())
    }

    fn install_configs(&mut self, module: &Module) -> Result<()> {
        for fragment in module
            .init_fragments
            .iter()
            .chain(module.service_fragments.iter())
        {
            let source = self.src_dir.join(fragment);
            let base = file_name_of(fragment)?;
            let dest = self.arch_root.join("configs").join(base);
            if self.installed_aux.contains(&dest) {
                continue;
            }
            self.copy_file(&source, &dest)?;
            self.installed_aux.insert(dest);
        }
        Ok(())
    }

    /// Concatenate the module's license texts into one notice file named
    /// after the module.
    fn install_notices(&mut self, module: &Module) -> Result<()> {
        if module.notice_files.is_empty() {
            return Ok(());
        }
        let dest = self
            .arch_root
            .join("NOTICES")
            .join(format!("{}.txt", registry_name(module)));
        if self.installed_aux.contains(&dest) {
            return Ok(());
        }
        let mut text = String::new();
        for notice in &module.notice_files {
            let source = self.src_dir.join(notice);
            let content = fs::read_to_string(&source)
                .with_context(|| format!("reading notice file '{notice}'"))?;
            text.push_str(&content);
            if !text.ends_with('\n') {
                text.push('\n');
            }
        }
        self.write_bytes(text.as_bytes(), &dest)?;
        self.installed_aux.insert(dest);
        Ok(())
    }

    fn write_descriptor(&mut self, descriptor: &SnapshotDescriptor, dest: &Path) -> Result<()> {
        let mut text = serde_json::to_string_pretty(descriptor)
            .with_context(|| format!("serializing descriptor '{}'", dest.display()))?;
        text.push('\n');
        self.write_bytes(text.as_bytes(), dest)
    }

    fn copy_file(&mut self, source: &Path, dest: &Path) -> Result<()> {
        self.ensure_parent(dest)?;
        fs::copy(source, dest).with_context(|| {
            format!("copying '{}' to '{}'", source.display(), dest.display())
        })?;
        self.record(dest);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8], dest: &Path) -> Result<()> {
        self.ensure_parent(dest)?;
        fs::write(dest, bytes)
            .with_context(|| format!("writing '{}'", dest.display()))?;
        self.record(dest);
        Ok(())
    }

    fn ensure_parent(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory '{}'", parent.display()))?;
        }
        Ok(())
    }

    fn record(&mut self, dest: &Path) {
        let rel = dest
            .strip_prefix(&self.snapshot_dir)
            .expect("snapshot outputs land under the snapshot dir")
            .to_string_lossy()
            .replace('\\', "/");
        self.written.insert(rel);
    }
}

/// File name of a captured artifact. A cfi-sanitized static library keeps
/// the sanitizer tag in its stem so it can live next to its unsanitized
/// sibling.
fn artifact_stem(module: &Module, output: &Path) -> Result<String> {
    // Binaries install under the module name; libraries and objects keep
    // the built artifact's file name.
    if matches!(module.kind, ModuleKind::Binary) {
        return Ok(module.name.clone());
    }
    let name = output
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("output path '{}' has no file name", output.display()))?;

    if module.sanitize.cfi && matches!(&module.kind, ModuleKind::Library { form: LibForm::Static, .. }) {
        return Ok(match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}.cfi.{ext}"),
            None => format!("{name}.cfi"),
        });
    }
    Ok(name.to_string())
}

fn rewrite_include_dirs(dirs: &[String]) -> Vec<String> {
    dirs.iter().map(|dir| format!("include/{dir}")).collect()
}

fn rewrite_config_paths(fragments: &[String]) -> Vec<String> {
    fragments
        .iter()
        .filter_map(|fragment| file_name_of(fragment).ok())
        .map(|base| format!("configs/{base}"))
        .collect()
}

fn file_name_of(path: &str) -> Result<&str> {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("path '{path}' has no file name"))
}

/// Write the sorted entry set as a zstd-compressed tar archive with
/// normalized headers, so identical inputs produce identical bytes.
fn write_archive(snapshot_dir: &Path, entries: &[String], out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("creating archive '{}'", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = TarBuilder::new(encoder);

    for rel in entries {
        let path = snapshot_dir.join(rel);
        let mut file = File::open(&path)
            .with_context(|| format!("opening snapshot entry '{}'", path.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", path.display()))?
            .len();

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(len);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, rel, &mut file)?;
    }

    let mut encoder = builder
        .into_inner()
        .context("finalizing snapshot tar builder")?;
    encoder.flush()?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arch, ArchType, Config, OsType, Target};
    use crate::module::{LibForm, ModuleKind, Partition};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        session: Session,
        built_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("out");
        let built = tmp.path().join("built");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&built).unwrap();
        let config = Config::new(&src, &out, None, BTreeMap::new()).unwrap();
        Fixture {
            _tmp: tmp,
            session: Session::new(config),
            built_dir: built,
        }
    }

    fn device_target() -> Target {
        Target::new(OsType::Device, Arch::new(ArchType::Arm64))
    }

    fn built_artifact(fixture: &Fixture, name: &str, content: &[u8]) -> PathBuf {
        let path = fixture.built_dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn shared_lib(fixture: &Fixture, name: &str) -> Module {
        let mut module = Module::new(
            name,
            ModuleKind::Library {
                form: LibForm::Shared,
                builds_static: true,
                builds_shared: true,
            },
            device_target(),
        );
        module.partition = Partition::Device;
        module.output_file = Some(built_artifact(fixture, &format!("{name}.so"), b"elf"));
        module
    }

    fn read_rel(outputs: &SnapshotOutputs, rel: &str) -> String {
        fs::read_to_string(outputs.snapshot_dir.join(rel)).unwrap()
    }

    #[test]
    fn frozen_version_skips_packaging() {
        let mut fixture = fixture();
        fixture.session.config.variables.device_abi_freeze_version = "30".to_string();
        let modules = vec![shared_lib(&fixture, "libfoo")];
        let outputs = package_snapshot(&fixture.session, &modules).unwrap();
        assert!(outputs.is_none());
    }

    #[test]
    fn artifacts_land_under_arch_and_kind_dirs() {
        let fixture = fixture();
        let mut modules = vec![shared_lib(&fixture, "libfoo")];
        modules[0].shared_libs = vec!["libc".to_string()];

        let outputs = package_snapshot(&fixture.session, &modules)
            .unwrap()
            .expect("no frozen version, so a snapshot is packaged");

        assert!(outputs
            .entries
            .contains(&"arm64/arch-arm64/shared/libfoo.so".to_string()));
        let descriptor = read_rel(&outputs, "arm64/arch-arm64/shared/libfoo.so.json");
        assert!(descriptor.contains("\"module_name\": \"libfoo\""));
        assert!(descriptor.contains("\"libc\""));
        // Empty fields are omitted entirely.
        assert!(!descriptor.contains("runtime_libs"));
    }

    #[test]
    fn cfi_static_gets_tagged_stem_and_name() {
        let fixture = fixture();
        let mut module = Module::new(
            "libsan",
            ModuleKind::Library {
                form: LibForm::Static,
                builds_static: true,
                builds_shared: false,
            },
            device_target(),
        );
        module.partition = Partition::Device;
        module.output_file = Some(built_artifact(&fixture, "libsan.a", b"ar"));
        module.sanitize.cfi = true;

        let outputs = package_snapshot(&fixture.session, &[module])
            .unwrap()
            .unwrap();
        assert!(outputs
            .entries
            .contains(&"arm64/arch-arm64/static/libsan.cfi.a".to_string()));
        let descriptor = read_rel(&outputs, "arm64/arch-arm64/static/libsan.cfi.a.json");
        assert!(descriptor.contains("\"module_name\": \"libsan.cfi\""));
        assert!(descriptor.contains("\"sanitize\": \"cfi\""));
    }

    #[test]
    fn headers_configs_and_notices_are_installed_once() {
        let fixture = fixture();
        let src = fixture.session.config.src_dir().to_path_buf();
        fs::create_dir_all(src.join("libfoo/include")).unwrap();
        fs::write(src.join("libfoo/include/foo.h"), "#pragma once\n").unwrap();
        fs::create_dir_all(src.join("init")).unwrap();
        fs::write(src.join("init/foo.rc"), "service foo\n").unwrap();
        fs::write(src.join("NOTICE"), "license text\n").unwrap();

        let mut first = shared_lib(&fixture, "libfoo");
        first.exported_dirs = vec!["libfoo/include".to_string()];
        first.init_fragments = vec!["init/foo.rc".to_string()];
        first.notice_files = vec!["NOTICE".to_string()];

        // Second module exports the same headers and fragment.
        let mut second = shared_lib(&fixture, "libbar");
        second.exported_dirs = vec!["libfoo/include".to_string()];
        second.init_fragments = vec!["init/foo.rc".to_string()];

        let outputs = package_snapshot(&fixture.session, &[first, second])
            .unwrap()
            .unwrap();

        let header_entries = outputs
            .entries
            .iter()
            .filter(|entry| entry.ends_with("foo.h"))
            .count();
        assert_eq!(header_entries, 1);
        let config_entries = outputs
            .entries
            .iter()
            .filter(|entry| entry.ends_with("foo.rc"))
            .count();
        assert_eq!(config_entries, 1);
        assert_eq!(read_rel(&outputs, "arm64/NOTICES/libfoo.txt"), "license text\n");

        let descriptor = read_rel(&outputs, "arm64/arch-arm64/shared/libfoo.so.json");
        assert!(descriptor.contains("include/libfoo/include"));
        assert!(descriptor.contains("configs/foo.rc"));
    }

    #[test]
    fn packaging_is_deterministic() {
        let fixture = fixture();
        let src = fixture.session.config.src_dir().to_path_buf();
        fs::create_dir_all(src.join("inc")).unwrap();
        fs::write(src.join("inc/a.h"), "a\n").unwrap();

        let mut module = shared_lib(&fixture, "libdet");
        module.exported_dirs = vec!["inc".to_string()];
        let modules = vec![module, shared_lib(&fixture, "libother")];

        let first = package_snapshot(&fixture.session, &modules)
            .unwrap()
            .unwrap();
        let first_list = fs::read(&first.list_file).unwrap();
        let first_archive = fs::read(&first.archive).unwrap();

        let second = package_snapshot(&fixture.session, &modules)
            .unwrap()
            .unwrap();
        assert_eq!(fs::read(&second.list_file).unwrap(), first_list);
        assert_eq!(fs::read(&second.archive).unwrap(), first_archive);
        assert_eq!(first.entries, second.entries);
    }

    #[test]
    fn excluded_framework_module_is_skipped_not_fatal() {
        let fixture = fixture();
        // Exclusion with availability left unset is the flag's normal use.
        let mut excluded = shared_lib(&fixture, "libframework_helper");
        excluded.partition = Partition::Framework;
        excluded.exclude_from_snapshot = true;
        let good = shared_lib(&fixture, "libok");

        let outputs = package_snapshot(&fixture.session, &[excluded, good])
            .unwrap()
            .unwrap();
        assert!(outputs
            .entries
            .contains(&"arm64/arch-arm64/shared/libok.so".to_string()));
        assert!(!outputs
            .entries
            .iter()
            .any(|entry| entry.contains("libframework_helper")));
    }

    #[test]
    fn explicit_availability_with_exclusion_is_reported() {
        let fixture = fixture();
        let mut bad = shared_lib(&fixture, "libconfused");
        bad.partition = Partition::Framework;
        bad.exclude_from_snapshot = true;
        bad.snapshot_available = Some(true);
        let good = shared_lib(&fixture, "libok");

        let err = package_snapshot(&fixture.session, &[bad, good]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("libconfused"));
        assert!(!message.contains("module 'libok'"));
    }

    #[test]
    fn excluded_device_partition_module_is_fatal() {
        let fixture = fixture();
        let mut bad = shared_lib(&fixture, "libdevice_only");
        bad.exclude_from_snapshot = true;

        let err = package_snapshot(&fixture.session, &[bad]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("libdevice_only"));
        assert!(message.contains("constrained partition"));
    }

    #[test]
    fn list_file_is_sorted_with_trailing_newline() {
        let fixture = fixture();
        let modules = vec![
            shared_lib(&fixture, "libzz"),
            shared_lib(&fixture, "libaa"),
        ];
        let outputs = package_snapshot(&fixture.session, &modules)
            .unwrap()
            .unwrap();
        let text = fs::read_to_string(&outputs.list_file).unwrap();
        assert!(text.ends_with('\n'));
        let lines: Vec<&str> = text.lines().collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
