//! Filesystem mounting
//!
//! A [`Mounter`] probes its registered [`FilesystemDriver`]s against a byte
//! offset of a container and returns a [`FilesystemHandle`] for the first one
//! that recognises the region. Drivers only see a [`VolumeReader`] window, so
//! offset 0 for a driver is the first byte of its partition.

mod memory;
mod ntfs;
mod types;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::container::{EvidenceContainer, VolumeReader};
use crate::error::{EvidenceError, EvidenceResult};

pub use self::memory::{MemoryDriver, MemoryFilesystem};
pub use self::ntfs::{NtfsDriver, NtfsFilesystem};
pub use types::{DirectoryEntry, EntryKind, Timestamps};

/// Read-only view of one mounted filesystem.
///
/// Directories are listed one level at a time; each child is either an entry
/// or the error that kept it from resolving, so one damaged record does not
/// hide its siblings.
pub trait Filesystem: Send + Sync {
    /// Short filesystem type, e.g. "NTFS"
    fn type_name(&self) -> &str;

    fn root(&self) -> EvidenceResult<DirectoryEntry>;

    /// Children of `dir`. May include `.` and `..`; callers skip them.
    fn entries(&self, dir: &DirectoryEntry) -> EvidenceResult<Vec<EvidenceResult<DirectoryEntry>>>;

    /// Fill `buf` from `offset` within the entry's content. Returns fewer
    /// bytes only at end of file.
    fn read_at(&self, entry: &DirectoryEntry, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize>;

    /// Whether name lookups ignore case
    fn case_insensitive(&self) -> bool {
        false
    }

    /// Resolve an absolute path (`/`-separated) from the root
    fn lookup(&self, path: &str) -> EvidenceResult<DirectoryEntry> {
        let mut current = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if !current.is_dir() {
                return Err(EvidenceError::directory(
                    path,
                    format!("'{}' is not a directory", current.name),
                ));
            }
            let children = self
                .entries(&current)
                .map_err(|e| EvidenceError::directory(path, e))?;
            let found = children.into_iter().flatten().find(|child| {
                if self.case_insensitive() {
                    child.name.eq_ignore_ascii_case(component)
                } else {
                    child.name == component
                }
            });
            current = found.ok_or_else(|| {
                EvidenceError::directory(path, format!("no entry named '{}'", component))
            })?;
        }
        Ok(current)
    }
}

/// Recognises one filesystem type and opens it over a volume window
pub trait FilesystemDriver: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, reader: VolumeReader) -> EvidenceResult<Box<dyn Filesystem>>;
}

/// Ordered filesystem driver registry
#[derive(Clone)]
pub struct Mounter {
    drivers: Vec<Arc<dyn FilesystemDriver>>,
}

impl Default for Mounter {
    fn default() -> Self {
        Self::empty().with_driver(NtfsDriver)
    }
}

impl fmt::Debug for Mounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.driver_names()).finish()
    }
}

impl Mounter {
    /// A registry with no drivers; every mount fails until one is added
    pub fn empty() -> Self {
        Self { drivers: Vec::new() }
    }

    pub fn with_driver(mut self, driver: impl FilesystemDriver + 'static) -> Self {
        self.register(driver);
        self
    }

    /// Append a driver. Drivers are probed in registration order.
    pub fn register(&mut self, driver: impl FilesystemDriver + 'static) {
        self.drivers.push(Arc::new(driver));
    }

    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Mount the filesystem starting `offset` bytes into the container
    #[instrument(skip(self, container), fields(path = %container.path().display()))]
    pub fn mount(&self, container: &Arc<EvidenceContainer>, offset: u64) -> EvidenceResult<FilesystemHandle> {
        if offset >= container.size() {
            return Err(EvidenceError::FilesystemMount {
                offset,
                reason: format!("offset is past the end of the {} byte container", container.size()),
            });
        }

        let mut reasons = Vec::with_capacity(self.drivers.len());
        for driver in &self.drivers {
            let reader = VolumeReader::new(Arc::clone(container), offset);
            let opened = driver
                .open(reader)
                .and_then(|fs| fs.root().map(|root| (fs, root)));
            match opened {
                Ok((fs, root)) => {
                    debug!(offset, driver = driver.name(), "Filesystem mounted");
                    return Ok(FilesystemHandle {
                        container: Arc::clone(container),
                        offset,
                        fs: Arc::from(fs),
                        root,
                    });
                }
                Err(e) => {
                    trace!(offset, driver = driver.name(), error = %e, "Driver declined volume");
                    reasons.push(format!("{}: {}", driver.name(), e));
                }
            }
        }

        if reasons.is_empty() {
            reasons.push("no filesystem drivers registered".to_string());
        }
        Err(EvidenceError::FilesystemMount {
            offset,
            reason: reasons.join("; "),
        })
    }
}

/// A mounted filesystem and where it lives in its container
#[derive(Clone)]
pub struct FilesystemHandle {
    container: Arc<EvidenceContainer>,
    offset: u64,
    fs: Arc<dyn Filesystem>,
    root: DirectoryEntry,
}

impl fmt::Debug for FilesystemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemHandle")
            .field("type", &self.fs.type_name())
            .field("offset", &self.offset)
            .field("root_inode", &self.root.inode)
            .finish()
    }
}

impl FilesystemHandle {
    pub fn container(&self) -> &Arc<EvidenceContainer> {
        &self.container
    }

    /// Byte offset of the filesystem within its container
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn type_name(&self) -> &str {
        self.fs.type_name()
    }

    pub fn root(&self) -> &DirectoryEntry {
        &self.root
    }

    pub fn filesystem(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    /// Resolve `path` to a directory
    pub fn open_directory(&self, path: &str) -> EvidenceResult<DirectoryEntry> {
        let entry = self.fs.lookup(path)?;
        if !entry.is_dir() {
            return Err(EvidenceError::directory(path, "not a directory"));
        }
        Ok(entry)
    }

    pub fn entries(&self, dir: &DirectoryEntry) -> EvidenceResult<Vec<EvidenceResult<DirectoryEntry>>> {
        self.fs.entries(dir)
    }
}
