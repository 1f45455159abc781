//! Directory entry model shared by every filesystem driver

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Other => "other",
        }
    }
}

/// Entry timestamps. `changed` is the metadata change time (ctime, or the
/// MFT record modification time on NTFS), not the content write time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Filesystem-unique address of the entry's metadata
    pub inode: u64,
    pub kind: EntryKind,
    pub size: u64,
    pub times: Timestamps,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// `.` and `..`, which traversal never follows
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// Lowercased text after the last dot, or "" when the name has none
    pub fn extension(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((_, ext)) => ext.to_lowercase(),
            None => String::new(),
        }
    }
}
