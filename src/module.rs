//! The per-module state the mutation passes operate on.
//!
//! Module kinds are a closed tagged variant with capability predicates
//! rather than ad hoc downcasting: a library knows which link forms it can
//! build, and a binary or object carries no library payload at all.

use std::path::PathBuf;

use crate::config::Target;

/// Link form a library module is currently built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LibForm {
    Static,
    Shared,
    /// Header-only: exports includes, produces no compiled artifact.
    Header,
}

/// Closed set of module kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    Library {
        /// Form of this variant.
        form: LibForm,
        /// Whether the module declaration builds a static form at all.
        builds_static: bool,
        /// Whether the module declaration builds a shared form at all.
        builds_shared: bool,
    },
    Binary,
    Object,
}

/// Where a module's artifacts install to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// The main framework partition, always built from source.
    Framework,
    /// The constrained device partition, buildable against a frozen
    /// snapshot.
    Device,
}

/// Whether the module is defined by source or came out of a frozen
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Source,
    /// Prebuilt from a snapshot captured at the named frozen-ABI version
    /// for the named architecture.
    SnapshotPrebuilt { version: String },
}

/// Exclusive sanitizer modes. A module built with one of these exists in a
/// sanitized and an unsanitized variant; snapshot capture keeps only the
/// canonical representative(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanitizer {
    /// Control-flow integrity.
    Cfi,
    /// Shadow call stack.
    Scs,
    /// Scope-bounds checking.
    Bounds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeState {
    pub cfi: bool,
    pub scs: bool,
    pub bounds: bool,
    /// Needs the minimal sanitizer runtime when linked statically.
    pub minimal_runtime_dep: bool,
    /// Needs the ubsan runtime when linked statically.
    pub ubsan_runtime_dep: bool,
}

impl SanitizeState {
    pub fn is_enabled(&self, sanitizer: Sanitizer) -> bool {
        match sanitizer {
            Sanitizer::Cfi => self.cfi,
            Sanitizer::Scs => self.scs,
            Sanitizer::Bounds => self.bounds,
        }
    }
}

/// Per-API-level stub library properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubProperties {
    /// Relative path to the symbol map; must end in `.map.txt`.
    pub symbol_file: String,
    /// First API level the library existed at. A clone is generated for
    /// every level from here to the current platform level.
    pub first_version: String,
    /// First API level the version marker applies from. Almost never used;
    /// exists to work around historical platform bugs.
    pub unversioned_until: Option<String>,
}

/// One module variant as seen by the mutation passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Declared base name.
    pub name: String,
    /// Concrete variant name (base name plus variant decorations).
    pub variant_name: String,
    pub kind: ModuleKind,
    pub target: Target,
    pub partition: Partition,
    pub origin: ModuleOrigin,

    pub enabled: bool,
    /// Hidden from top-level aggregation but still buildable.
    pub hidden: bool,

    /// Compiled artifact, present once the module has been built.
    pub output_file: Option<PathBuf>,

    /// Explicitly excluded from snapshot capture.
    pub exclude_from_snapshot: bool,
    /// Availability for use from the constrained partition. None means the
    /// declaration did not say; capture treats that as available, but only
    /// an explicit opt-in conflicts with [`Module::exclude_from_snapshot`].
    pub snapshot_available: Option<bool>,
    /// Member of the stability-boundary library set.
    pub boundary_lib: bool,
    /// Declared extension of a stability-boundary library.
    pub boundary_ext: bool,

    pub sanitize: SanitizeState,

    /// Exported include directories, relative to the source root.
    pub exported_dirs: Vec<String>,
    pub exported_system_dirs: Vec<String>,
    pub exported_flags: Vec<String>,

    pub shared_libs: Vec<String>,
    pub runtime_libs: Vec<String>,
    pub required: Vec<String>,

    /// Init configuration fragments, relative to the source root.
    pub init_fragments: Vec<String>,
    /// Service configuration fragments, relative to the source root.
    pub service_fragments: Vec<String>,
    /// Notice/license files, relative to the source root.
    pub notice_files: Vec<String>,

    pub relative_install_path: String,
    pub symlinks: Vec<String>,

    /// Stub-library declaration, when this module is a compiled-stub
    /// library split per API level.
    pub stub: Option<StubProperties>,
    /// Opt-in to per-minimum-SDK variant expansion.
    pub split_per_api_level: bool,
    pub min_sdk_version: Option<String>,
    /// Resolved API level tag, set on expanded clones.
    pub api_level: Option<String>,
    /// Whether the clone requires a compatibility version marker.
    pub needs_version_marker: bool,
}

impl Module {
    pub fn new(name: &str, kind: ModuleKind, target: Target) -> Module {
        Module {
            name: name.to_string(),
            variant_name: name.to_string(),
            kind,
            target,
            partition: Partition::Framework,
            origin: ModuleOrigin::Source,
            enabled: true,
            hidden: false,
            output_file: None,
            exclude_from_snapshot: false,
            snapshot_available: None,
            boundary_lib: false,
            boundary_ext: false,
            sanitize: SanitizeState::default(),
            exported_dirs: Vec::new(),
            exported_system_dirs: Vec::new(),
            exported_flags: Vec::new(),
            shared_libs: Vec::new(),
            runtime_libs: Vec::new(),
            required: Vec::new(),
            init_fragments: Vec::new(),
            service_fragments: Vec::new(),
            notice_files: Vec::new(),
            relative_install_path: String::new(),
            symlinks: Vec::new(),
            stub: None,
            split_per_api_level: false,
            min_sdk_version: None,
            api_level: None,
            needs_version_marker: false,
        }
    }

    pub fn lib_form(&self) -> Option<LibForm> {
        match &self.kind {
            ModuleKind::Library { form, .. } => Some(*form),
            _ => None,
        }
    }

    pub fn is_static_lib(&self) -> bool {
        self.lib_form() == Some(LibForm::Static)
    }

    pub fn is_shared_lib(&self) -> bool {
        self.lib_form() == Some(LibForm::Shared)
    }

    pub fn is_header_lib(&self) -> bool {
        self.lib_form() == Some(LibForm::Header)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.kind, ModuleKind::Binary)
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, ModuleKind::Object)
    }

    /// The declaration can produce a static form (regardless of which form
    /// this variant is).
    pub fn builds_static(&self) -> bool {
        matches!(self.kind, ModuleKind::Library { builds_static: true, .. })
    }

    pub fn builds_shared(&self) -> bool {
        matches!(self.kind, ModuleKind::Library { builds_shared: true, .. })
    }

    pub fn is_snapshot_prebuilt(&self) -> bool {
        matches!(self.origin, ModuleOrigin::SnapshotPrebuilt { .. })
    }

    /// Availability for capture; unset counts as available.
    pub fn is_snapshot_available(&self) -> bool {
        self.snapshot_available.unwrap_or(true)
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Keep the module buildable but drop it from top-level aggregation.
    pub fn hide(&mut self) {
        self.hidden = true;
    }
}
