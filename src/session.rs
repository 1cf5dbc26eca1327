//! Shared state for one build invocation.
//!
//! A [`Session`] owns the resolved configuration, the toolchain registry,
//! and the cross-module registries the mutation passes write into. The
//! configuration and toolchain table are immutable after construction; the
//! registries are behind their own locks because passes run per module and
//! may be scheduled in parallel.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::config::Config;
use crate::mutate::snapshot::SnapshotRegistry;
use crate::toolchain::ToolchainRegistry;

pub struct Session {
    pub config: Config,
    pub toolchains: ToolchainRegistry,

    /// Base names of every stub library seen by variant expansion.
    pub stub_libraries: Mutex<BTreeSet<String>>,
    /// Snapshot capture registry, populated by the capture pass.
    pub snapshots: Mutex<SnapshotRegistry>,
    /// Framework modules whose names collide with a captured snapshot
    /// module. Read by the build-rule translation layer outside this
    /// crate, which appends a disambiguation suffix to their installed
    /// names; nothing in-core consumes it because the packager only runs
    /// when no snapshot is in use.
    pub suffixed_modules: Mutex<BTreeSet<String>>,
}

impl Session {
    pub fn new(config: Config) -> Session {
        Session {
            config,
            toolchains: ToolchainRegistry::with_builtins(),
            stub_libraries: Mutex::new(BTreeSet::new()),
            snapshots: Mutex::new(SnapshotRegistry::new()),
            suffixed_modules: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn is_stub_library(&self, name: &str) -> bool {
        self.stub_libraries
            .lock()
            .expect("stub library registry poisoned")
            .contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn new_session_has_empty_registries() {
        let session = Session::new(Config::test_config(BTreeMap::new()));
        assert!(session.snapshots.lock().unwrap().is_empty());
        assert!(!session.is_stub_library("libc"));
        assert!(session.suffixed_modules.lock().unwrap().is_empty());
    }
}
