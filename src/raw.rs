// Raw disk image reader (.dd, .raw, .img, .001, .002, ...)
// Presents a monolithic image or a numbered split set as one byte range.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, trace};

use crate::common::FileIoPool;
use crate::error::{EvidenceError, EvidenceResult};

// =============================================================================
// Public Types
// =============================================================================

#[derive(Serialize, Clone, Debug)]
pub struct RawInfo {
    pub segment_count: usize,
    pub total_size: u64,
    pub segment_sizes: Vec<u64>,
}

// =============================================================================
// Raw Image Handle
// =============================================================================

pub struct RawHandle {
    file_pool: FileIoPool,
    segment_sizes: Vec<u64>,
    total_size: u64,
}

impl RawHandle {
    /// Open an already discovered segment list
    pub fn open(segments: Vec<PathBuf>, max_open: usize) -> EvidenceResult<Self> {
        if segments.is_empty() {
            return Err(EvidenceError::container("No raw segments to open"));
        }

        let mut segment_sizes = Vec::with_capacity(segments.len());
        for path in &segments {
            let size = std::fs::metadata(path)
                .map_err(|e| {
                    EvidenceError::container(format!("Cannot stat {}: {}", path.display(), e))
                })?
                .len();
            segment_sizes.push(size);
        }
        let total_size = segment_sizes.iter().sum();
        debug!(segments = segments.len(), total_size, "Opened raw image");

        Ok(RawHandle {
            file_pool: FileIoPool::new(segments, max_open),
            segment_sizes,
            total_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn info(&self) -> RawInfo {
        RawInfo {
            segment_count: self.segment_sizes.len(),
            total_size: self.total_size,
            segment_sizes: self.segment_sizes.clone(),
        }
    }

    /// Read at an absolute image offset, spanning segment boundaries.
    ///
    /// Returns fewer bytes than requested only at the end of the image.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        let mut total_read = 0;
        let mut position = offset;

        while total_read < buf.len() && position < self.total_size {
            let Some((seg_idx, seg_offset)) = self.position_to_segment(position) else {
                break;
            };

            let seg_remaining = self.segment_sizes[seg_idx] - seg_offset;
            let to_read = (buf.len() - total_read).min(seg_remaining as usize);
            trace!(seg_idx, seg_offset, to_read, "Raw segment read");

            let bytes_read = self.file_pool.read_at(
                seg_idx,
                seg_offset,
                &mut buf[total_read..total_read + to_read],
            )?;
            if bytes_read == 0 {
                // Segment shrank after open
                return Err(EvidenceError::container(format!(
                    "Segment {} ended early at offset {}",
                    seg_idx, seg_offset
                )));
            }

            total_read += bytes_read;
            position += bytes_read as u64;
        }

        Ok(total_read)
    }

    /// Convert absolute position to (segment_index, offset_within_segment)
    fn position_to_segment(&self, pos: u64) -> Option<(usize, u64)> {
        let mut offset = pos;
        for (idx, &size) in self.segment_sizes.iter().enumerate() {
            if offset < size {
                return Some((idx, offset));
            }
            offset -= size;
        }
        None
    }

    pub fn close(&mut self) {
        debug!(
            segments = self.file_pool.file_count(),
            open = self.file_pool.open_count(),
            "Closing raw segment handles"
        );
        self.file_pool.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn test_split_set_reads_across_boundaries() {
        let dir = TempDir::new().unwrap();
        let data = pattern(2500);
        let mut paths = Vec::new();
        for (i, chunk) in data.chunks(1000).enumerate() {
            let path = dir.path().join(format!("disk.{:03}", i + 1));
            fs::write(&path, chunk).unwrap();
            paths.push(path);
        }

        let mut handle = RawHandle::open(paths, 2).unwrap();
        assert_eq!(handle.total_size(), 2500);
        assert_eq!(handle.info().segment_sizes, vec![1000, 1000, 500]);

        let mut buf = vec![0u8; 1200];
        assert_eq!(handle.read_at(900, &mut buf).unwrap(), 1200);
        assert_eq!(buf, data[900..2100]);
    }

    #[test]
    fn test_short_read_at_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.dd");
        fs::write(&path, pattern(100)).unwrap();

        let mut handle = RawHandle::open(vec![path], 4).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(handle.read_at(80, &mut buf).unwrap(), 20);
        assert_eq!(handle.read_at(100, &mut buf).unwrap(), 0);
        assert_eq!(handle.read_at(5000, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_empty_segment_list() {
        assert!(RawHandle::open(vec![], 4).is_err());
    }
}
