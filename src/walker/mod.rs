//! Depth-first directory traversal
//!
//! [`Walk`] yields every entry beneath a directory, descending into
//! subdirectories as it meets them. The inodes of the directories on the
//! current branch are kept in an ancestor set: a directory whose inode is
//! already an ancestor is yielded but not entered, which breaks cycles,
//! while the same directory reached under two unrelated parents is walked
//! both times. Unreadable entries and directories are counted in
//! [`WalkStats`] and the walk carries on.

mod matcher;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::EvidenceResult;
use crate::filesystem::{DirectoryEntry, Filesystem};

pub use matcher::{ExtensionFilter, MatchLogic, NameMatcher};

/// Cooperative cancellation flag shared between a walk and its controller
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// Directory the entry was listed in (or the directory itself)
    pub path: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    /// Entries yielded
    pub visited: u64,
    pub directories_entered: u64,
    /// Entries accepted by the predicate in [`Walk::run`]
    pub matched: u64,
    pub entries_skipped: u64,
    pub directories_unreadable: u64,
    pub cycles_skipped: u64,
    pub cancelled: bool,
    pub skipped: Vec<SkippedEntry>,
}

impl WalkStats {
    /// Fold another walk's counters into this one
    pub fn merge(&mut self, other: WalkStats) {
        self.visited += other.visited;
        self.directories_entered += other.directories_entered;
        self.matched += other.matched;
        self.entries_skipped += other.entries_skipped;
        self.directories_unreadable += other.directories_unreadable;
        self.cycles_skipped += other.cycles_skipped;
        self.cancelled |= other.cancelled;
        self.skipped.extend(other.skipped);
    }

    fn skip(&mut self, path: &str, reason: impl ToString) {
        self.entries_skipped += 1;
        self.skipped.push(SkippedEntry {
            path: path.to_string(),
            reason: reason.to_string(),
        });
    }

    fn unreadable(&mut self, path: &str, reason: impl ToString) {
        self.directories_unreadable += 1;
        self.skipped.push(SkippedEntry {
            path: path.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalkEntry {
    pub entry: DirectoryEntry,
    /// Absolute path of the entry, starting from the walk's root path
    pub path: String,
    /// 1 for children of the root directory
    pub depth: usize,
}

impl WalkEntry {
    /// Path of the directory holding this entry
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

struct Frame {
    inode: u64,
    path: String,
    children: std::vec::IntoIter<EvidenceResult<DirectoryEntry>>,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Lazy depth-first walk over one filesystem
pub struct Walk<'a> {
    fs: &'a dyn Filesystem,
    frames: Vec<Frame>,
    ancestors: HashSet<u64>,
    stats: WalkStats,
    cancel: Option<CancelToken>,
}

impl<'a> Walk<'a> {
    /// Walk beneath `root`, whose absolute path is `path`
    pub fn new(fs: &'a dyn Filesystem, root: &DirectoryEntry, path: impl Into<String>) -> Self {
        let path = path.into();
        let mut walk = Self {
            fs,
            frames: Vec::new(),
            ancestors: HashSet::new(),
            stats: WalkStats::default(),
            cancel: None,
        };
        walk.enter(root, path);
        walk
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    pub fn into_stats(self) -> WalkStats {
        self.stats
    }

    /// Drive the walk to completion, calling `on_match` for every entry
    /// `predicate` accepts.
    pub fn run<P, F>(mut self, mut predicate: P, mut on_match: F) -> WalkStats
    where
        P: FnMut(&WalkEntry) -> bool,
        F: FnMut(WalkEntry),
    {
        while let Some(item) = self.next() {
            if predicate(&item) {
                self.stats.matched += 1;
                on_match(item);
            }
        }
        self.stats
    }

    fn enter(&mut self, dir: &DirectoryEntry, path: String) {
        match self.fs.entries(dir) {
            Ok(children) => {
                trace!(path = %path, inode = dir.inode, children = children.len(), "Entering directory");
                self.ancestors.insert(dir.inode);
                self.stats.directories_entered += 1;
                self.frames.push(Frame {
                    inode: dir.inode,
                    path,
                    children: children.into_iter(),
                });
            }
            Err(e) => {
                debug!(path = %path, error = %e, "Directory unreadable");
                self.stats.unreadable(&path, e);
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl Iterator for Walk<'_> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        loop {
            if self.cancelled() {
                if !self.stats.cancelled {
                    debug!(visited = self.stats.visited, "Walk cancelled");
                    self.stats.cancelled = true;
                }
                self.frames.clear();
                self.ancestors.clear();
                return None;
            }

            let frame = self.frames.last_mut()?;
            let Some(child) = frame.children.next() else {
                if let Some(done) = self.frames.pop() {
                    self.ancestors.remove(&done.inode);
                }
                continue;
            };

            let entry = match child {
                Ok(entry) => entry,
                Err(e) => {
                    trace!(dir = %frame.path, error = %e, "Skipping unresolvable entry");
                    let dir = frame.path.clone();
                    self.stats.skip(&dir, e);
                    continue;
                }
            };
            if entry.is_pseudo() {
                continue;
            }
            if entry.name.is_empty() {
                let dir = frame.path.clone();
                self.stats.skip(&dir, format!("entry for inode {} has no name", entry.inode));
                continue;
            }

            let path = join_path(&frame.path, &entry.name);
            let depth = self.frames.len();
            self.stats.visited += 1;

            if entry.is_dir() {
                if self.ancestors.contains(&entry.inode) {
                    trace!(path = %path, inode = entry.inode, "Directory loops back to an ancestor; not descending");
                    self.stats.cycles_skipped += 1;
                } else {
                    self.enter(&entry, path.clone());
                }
            }

            return Some(WalkEntry { entry, path, depth });
        }
    }
}
