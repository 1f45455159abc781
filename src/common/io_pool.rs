// Segment file handle pool
//
// Multi-segment evidence (split raw sets, EWF segment sets) can run to
// hundreds of files. The pool keeps a bounded number of them open and
// evicts the least recently used handle when the limit is reached.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::error::{EvidenceError, EvidenceResult};

/// Default maximum number of simultaneously open file handles
pub const DEFAULT_MAX_OPEN_FILES: usize = 32;

// =============================================================================
// File I/O Pool
// =============================================================================

/// Manages segment file handles with LRU eviction
#[derive(Debug)]
pub struct FileIoPool {
    /// Paths to all segment files in order
    file_paths: Vec<PathBuf>,
    /// Currently open file handles (file_index -> File)
    open_handles: HashMap<usize, File>,
    /// Most recently used at the front
    lru_queue: VecDeque<usize>,
    max_open: usize,
}

impl FileIoPool {
    /// Create a new file pool with specified paths and max open limit
    pub fn new(file_paths: Vec<PathBuf>, max_open: usize) -> Self {
        Self {
            file_paths,
            open_handles: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open: max_open.max(1),
        }
    }

    /// Get a file handle, opening it if necessary
    pub fn get_file(&mut self, file_index: usize) -> EvidenceResult<&mut File> {
        if file_index >= self.file_paths.len() {
            return Err(EvidenceError::container(format!(
                "Segment index {} out of range (have {} segments)",
                file_index,
                self.file_paths.len()
            )));
        }

        if self.open_handles.contains_key(&file_index) {
            self.lru_queue.retain(|&x| x != file_index);
            self.lru_queue.push_front(file_index);
            trace!(file_index, "File handle cache hit");
        } else {
            if self.open_handles.len() >= self.max_open {
                if let Some(lru_index) = self.lru_queue.pop_back() {
                    trace!(lru_index, "Evicting LRU file handle");
                    self.open_handles.remove(&lru_index);
                }
            }

            let file_path = &self.file_paths[file_index];
            debug!(file_index, ?file_path, "Opening segment handle");
            let file = File::open(file_path).map_err(|e| {
                EvidenceError::container(format!(
                    "Failed to open segment {}: {}",
                    file_path.display(),
                    e
                ))
            })?;
            self.open_handles.insert(file_index, file);
            self.lru_queue.push_front(file_index);
        }

        self.open_handles.get_mut(&file_index).ok_or_else(|| {
            EvidenceError::container(format!("Segment {} handle vanished", file_index))
        })
    }

    /// Read from one segment at an absolute offset within that segment.
    ///
    /// Fills as much of `buf` as the segment holds; returns the byte count.
    pub fn read_at(&mut self, file_index: usize, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        let file = self.get_file(file_index)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EvidenceError::container(format!("Seek to {} failed: {}", offset, e)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(EvidenceError::container(format!(
                        "Read of segment {} at {} failed: {}",
                        file_index, offset, e
                    )))
                }
            }
        }
        Ok(filled)
    }

    /// Get the number of files in the pool
    pub fn file_count(&self) -> usize {
        self.file_paths.len()
    }

    /// Get all file paths
    pub fn paths(&self) -> &[PathBuf] {
        &self.file_paths
    }

    /// Get the number of currently open handles
    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        self.open_handles.clear();
        self.lru_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_files(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("test_{}.bin", i));
                let mut file = File::create(&path).unwrap();
                file.write_all(&[i as u8; 100]).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_file_pool_evicts_lru() {
        let temp_dir = TempDir::new().unwrap();
        let mut pool = FileIoPool::new(make_files(&temp_dir, 5), 3);

        assert_eq!(pool.file_count(), 5);
        assert_eq!(pool.open_count(), 0);

        pool.get_file(0).unwrap();
        pool.get_file(1).unwrap();
        pool.get_file(2).unwrap();
        assert_eq!(pool.open_count(), 3);

        pool.get_file(3).unwrap();
        assert_eq!(pool.open_count(), 3);

        pool.close_all();
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn test_read_at_short_at_end() {
        let temp_dir = TempDir::new().unwrap();
        let mut pool = FileIoPool::new(make_files(&temp_dir, 2), 2);

        let mut buf = [0u8; 16];
        assert_eq!(pool.read_at(1, 90, &mut buf).unwrap(), 10);
        assert!(buf[..10].iter().all(|&b| b == 1));
        assert_eq!(pool.read_at(1, 200, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_file_pool_out_of_range() {
        let mut pool = FileIoPool::new(vec![], 3);
        assert!(matches!(pool.get_file(0), Err(EvidenceError::Container(_))));
    }
}
