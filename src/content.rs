//! File content access
//!
//! Everything here streams through [`Filesystem::read_at`] in bounded
//! chunks, so hashing or extracting a multi-gigabyte file never holds more
//! than one buffer of it in memory.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, trace};

use crate::common::path_security::sanitize_filename;
use crate::common::{HashAlgorithm, StreamingHasher, BUFFER_SIZE};
use crate::error::{EvidenceError, EvidenceResult};
use crate::filesystem::{DirectoryEntry, Filesystem};

/// Read `length` bytes at `offset`, clamped to the entry's size
pub fn read_range(fs: &dyn Filesystem, entry: &DirectoryEntry, offset: u64, length: u64) -> EvidenceResult<Vec<u8>> {
    if length == 0 || offset >= entry.size {
        return Ok(Vec::new());
    }
    let wanted = length.min(entry.size - offset);
    let wanted = usize::try_from(wanted)
        .map_err(|_| EvidenceError::content(entry.inode, "range too large for memory"))?;

    let mut data = vec![0u8; wanted];
    let mut filled = 0;
    while filled < wanted {
        let n = fs.read_at(entry, offset + filled as u64, &mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    Ok(data)
}

/// `Read` adapter over one entry's content
pub struct EntryReader<'a> {
    fs: &'a dyn Filesystem,
    entry: &'a DirectoryEntry,
    pos: u64,
}

impl<'a> EntryReader<'a> {
    pub fn new(fs: &'a dyn Filesystem, entry: &'a DirectoryEntry) -> Self {
        Self { fs, entry, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(BUFFER_SIZE);
        let n = self
            .fs
            .read_at(self.entry, self.pos, &mut buf[..len])
            .map_err(io::Error::other)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Hash an entry's content without buffering the whole file
pub fn hash_entry(fs: &dyn Filesystem, entry: &DirectoryEntry, algorithm: HashAlgorithm) -> EvidenceResult<String> {
    let mut hasher = StreamingHasher::new(algorithm);
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut offset = 0u64;
    loop {
        let n = fs.read_at(entry, offset, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        offset += n as u64;
    }
    trace!(inode = entry.inode, bytes = offset, algorithm = %algorithm, "Entry hashed");
    Ok(hasher.finalize())
}

/// Stream an entry's content into `writer`. Returns the bytes copied.
pub fn copy_entry<W: Write>(fs: &dyn Filesystem, entry: &DirectoryEntry, writer: &mut W) -> EvidenceResult<u64> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut offset = 0u64;
    loop {
        let n = fs.read_at(entry, offset, &mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        offset += n as u64;
    }
    Ok(offset)
}

/// Copy an entry to `dest`, creating parent directories and stamping the
/// entry's modification and access times on the written file.
pub fn extract_entry(fs: &dyn Filesystem, entry: &DirectoryEntry, dest: &Path) -> EvidenceResult<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(dest)?);
    let bytes = copy_entry(fs, entry, &mut writer)?;
    writer.flush()?;
    drop(writer);

    if let Some(modified) = entry.times.modified {
        let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
        let atime = entry
            .times
            .accessed
            .map(|t| FileTime::from_unix_time(t.timestamp(), t.timestamp_subsec_nanos()))
            .unwrap_or(mtime);
        filetime::set_file_times(dest, atime, mtime)?;
    }

    debug!(inode = entry.inode, dest = %dest.display(), bytes, "Entry extracted");
    Ok(bytes)
}

/// Write an entry into `scratch_dir` for a decoder that needs a real file.
/// The inode prefix keeps same-named entries from colliding.
pub fn materialize(fs: &dyn Filesystem, entry: &DirectoryEntry, scratch_dir: &Path) -> EvidenceResult<PathBuf> {
    let path = scratch_dir.join(format!("{}_{}", entry.inode, sanitize_filename(&entry.name)));
    extract_entry(fs, entry, &path)?;
    Ok(path)
}
