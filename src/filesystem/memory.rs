//! In-memory filesystem
//!
//! Nodes live in an arena indexed by inode number; directory children are
//! named links into that arena, so one node can appear under several names
//! (hard links) or under its own descendants (cycles). Links can also be
//! marked unreadable to stand in for damaged directory records.

use std::io::Read;

use tracing::trace;

use crate::container::VolumeReader;
use crate::error::{EvidenceError, EvidenceResult};

use super::{DirectoryEntry, EntryKind, Filesystem, FilesystemDriver, Timestamps};

#[derive(Clone, Debug)]
enum Link {
    Entry { name: String, inode: u64 },
    Broken(String),
}

#[derive(Clone, Debug)]
struct Node {
    kind: EntryKind,
    data: Vec<u8>,
    times: Timestamps,
    children: Vec<Link>,
    /// Listing this directory fails
    unreadable: bool,
}

impl Node {
    fn new(kind: EntryKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            data,
            times: Timestamps::default(),
            children: Vec::new(),
            unreadable: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryFilesystem {
    type_name: String,
    nodes: Vec<Node>,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new("MEMFS")
    }
}

impl MemoryFilesystem {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            nodes: vec![Node::new(EntryKind::Directory, Vec::new())],
        }
    }

    pub fn root_inode(&self) -> u64 {
        0
    }

    fn push(&mut self, parent: u64, name: &str, node: Node) -> u64 {
        let inode = self.nodes.len() as u64;
        self.nodes.push(node);
        self.link(parent, name, inode);
        inode
    }

    /// Create a directory under `parent` and return its inode.
    ///
    /// Panics if `parent` is not an inode of this filesystem.
    pub fn add_dir(&mut self, parent: u64, name: &str) -> u64 {
        self.push(parent, name, Node::new(EntryKind::Directory, Vec::new()))
    }

    pub fn add_file(&mut self, parent: u64, name: &str, data: impl Into<Vec<u8>>) -> u64 {
        self.push(parent, name, Node::new(EntryKind::File, data.into()))
    }

    /// Add a non-regular entry (device, socket, ...)
    pub fn add_other(&mut self, parent: u64, name: &str) -> u64 {
        self.push(parent, name, Node::new(EntryKind::Other, Vec::new()))
    }

    /// List an existing inode under `parent` as `name`
    pub fn link(&mut self, parent: u64, name: &str, target: u64) {
        self.nodes[parent as usize].children.push(Link::Entry {
            name: name.to_string(),
            inode: target,
        });
    }

    /// A child of `parent` that fails to resolve with `reason`
    pub fn add_unreadable(&mut self, parent: u64, reason: &str) {
        self.nodes[parent as usize]
            .children
            .push(Link::Broken(reason.to_string()));
    }

    /// Make listing `dir` fail
    pub fn set_unreadable_dir(&mut self, dir: u64) {
        self.nodes[dir as usize].unreadable = true;
    }

    pub fn set_times(&mut self, inode: u64, times: Timestamps) {
        self.nodes[inode as usize].times = times;
    }

    fn node(&self, inode: u64) -> Option<&Node> {
        usize::try_from(inode).ok().and_then(|i| self.nodes.get(i))
    }

    fn entry(&self, name: &str, inode: u64) -> EvidenceResult<DirectoryEntry> {
        let node = self.node(inode).ok_or_else(|| {
            EvidenceError::DirectoryEntry(format!("{}: dangling link to inode {}", name, inode))
        })?;
        Ok(DirectoryEntry {
            name: name.to_string(),
            inode,
            kind: node.kind,
            size: node.data.len() as u64,
            times: node.times,
        })
    }
}

impl Filesystem for MemoryFilesystem {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn root(&self) -> EvidenceResult<DirectoryEntry> {
        self.entry("", self.root_inode())
    }

    fn entries(&self, dir: &DirectoryEntry) -> EvidenceResult<Vec<EvidenceResult<DirectoryEntry>>> {
        let node = self
            .node(dir.inode)
            .ok_or_else(|| EvidenceError::directory(dir.name.clone(), "no such inode"))?;
        if node.kind != EntryKind::Directory {
            return Err(EvidenceError::directory(dir.name.clone(), "not a directory"));
        }
        if node.unreadable {
            return Err(EvidenceError::directory(dir.name.clone(), "directory records unreadable"));
        }

        Ok(node
            .children
            .iter()
            .map(|link| match link {
                Link::Entry { name, inode } => self.entry(name, *inode),
                Link::Broken(reason) => Err(EvidenceError::DirectoryEntry(reason.clone())),
            })
            .collect())
    }

    fn read_at(&self, entry: &DirectoryEntry, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        let node = self
            .node(entry.inode)
            .ok_or_else(|| EvidenceError::content(entry.inode, "no such inode"))?;
        if node.kind == EntryKind::Directory {
            return Err(EvidenceError::content(entry.inode, "is a directory"));
        }
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        Ok(n)
    }
}

/// Mounts prepared [`MemoryFilesystem`]s on volumes that begin with a
/// registered signature
#[derive(Clone, Debug, Default)]
pub struct MemoryDriver {
    volumes: Vec<(Vec<u8>, MemoryFilesystem)>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, signature: &[u8], fs: MemoryFilesystem) -> Self {
        self.volumes.push((signature.to_vec(), fs));
        self
    }
}

impl FilesystemDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, mut reader: VolumeReader) -> EvidenceResult<Box<dyn Filesystem>> {
        let offset = reader.start();
        let longest = self.volumes.iter().map(|(sig, _)| sig.len()).max().unwrap_or(0);
        let mut head = Vec::with_capacity(longest);
        (&mut reader)
            .take(longest as u64)
            .read_to_end(&mut head)
            .map_err(|e| EvidenceError::FilesystemMount {
                offset,
                reason: e.to_string(),
            })?;

        for (signature, fs) in &self.volumes {
            if !signature.is_empty() && head.starts_with(signature) {
                trace!(offset, fs_type = %fs.type_name, "In-memory volume matched");
                return Ok(Box::new(fs.clone()));
            }
        }
        Err(EvidenceError::FilesystemMount {
            offset,
            reason: "no registered in-memory volume signature".to_string(),
        })
    }
}
