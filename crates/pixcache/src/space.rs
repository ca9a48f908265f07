//! Free space probing for the disk tier.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::debug;

/// Reports how many bytes can still be written under a path.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes on the volume holding `path`, or `None` if unknown.
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by the system's mounted disk list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpaceProbe;

impl SystemSpaceProbe {
    pub fn new() -> Self {
        Self
    }
}

/// Nearest ancestor of `path` (itself included) that exists, canonicalized.
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|candidate| candidate.canonicalize().ok())
}

impl SpaceProbe for SystemSpaceProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let resolved = existing_ancestor(path)?;
        let disks = Disks::new_with_refreshed_list();
        let available = disks
            .list()
            .iter()
            .filter(|disk| resolved.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space());
        debug!(path = %path.display(), ?available, "Probed available disk space");
        available
    }
}

/// Probe reporting a fixed amount, for tests and embedded targets.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub Option<u64>);

impl SpaceProbe for FixedSpaceProbe {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}
