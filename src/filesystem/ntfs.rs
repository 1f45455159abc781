// NTFS driver backed by the `ntfs` crate

use std::io::{BufReader, SeekFrom};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ntfs::structured_values::{NtfsFileName, NtfsFileNamespace};
use ntfs::{Ntfs, NtfsError, NtfsReadSeek, NtfsTime};
use tracing::debug;

use crate::container::VolumeReader;
use crate::error::{EvidenceError, EvidenceResult};

use super::{DirectoryEntry, EntryKind, Filesystem, FilesystemDriver, Timestamps};

/// Seconds between 1601-01-01 and 1970-01-01
const NT_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

type NtfsReader = BufReader<VolumeReader>;

#[derive(Clone, Copy, Debug, Default)]
pub struct NtfsDriver;

impl FilesystemDriver for NtfsDriver {
    fn name(&self) -> &str {
        "NTFS"
    }

    fn open(&self, reader: VolumeReader) -> EvidenceResult<Box<dyn Filesystem>> {
        Ok(Box::new(NtfsFilesystem::open(reader)?))
    }
}

fn nt_time(time: NtfsTime) -> Option<DateTime<Utc>> {
    let ticks = time.nt_timestamp();
    if ticks == 0 {
        return None;
    }
    let secs = (ticks / 10_000_000) as i64 - NT_EPOCH_OFFSET_SECS;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

pub struct NtfsFilesystem {
    ntfs: Ntfs,
    root_record: u64,
    reader: Mutex<NtfsReader>,
}

impl NtfsFilesystem {
    /// Parse the boot sector and upcase table of the volume in `reader`
    pub fn open(reader: VolumeReader) -> EvidenceResult<Self> {
        let offset = reader.start();
        let mount_err = |e: NtfsError| EvidenceError::FilesystemMount {
            offset,
            reason: e.to_string(),
        };

        let mut fs = BufReader::new(reader);
        let mut ntfs = Ntfs::new(&mut fs).map_err(mount_err)?;
        ntfs.read_upcase_table(&mut fs).map_err(mount_err)?;
        let root_record = ntfs.root_directory(&mut fs).map_err(mount_err)?.file_record_number();
        debug!(
            offset,
            cluster_size = ntfs.cluster_size(),
            sector_size = ntfs.sector_size(),
            "NTFS volume opened"
        );

        Ok(Self {
            ntfs,
            root_record,
            reader: Mutex::new(fs),
        })
    }

    fn lock(&self) -> EvidenceResult<MutexGuard<'_, NtfsReader>> {
        self.reader
            .lock()
            .map_err(|_| EvidenceError::container("NTFS reader poisoned by an earlier panic"))
    }

    /// Build an entry from its index key plus the file record it points at.
    /// Times come from $STANDARD_INFORMATION, size from the unnamed $DATA
    /// stream when present.
    fn describe(&self, fs: &mut NtfsReader, record: u64, file_name: &NtfsFileName) -> EvidenceResult<DirectoryEntry> {
        let name = file_name.name().to_string_lossy();
        let entry_err =
            |e: NtfsError| EvidenceError::DirectoryEntry(format!("{} (record {}): {}", name, record, e));

        let file = self.ntfs.file(fs, record).map_err(entry_err)?;
        let info = file.info().map_err(entry_err)?;
        let kind = if file_name.is_directory() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let size = match kind {
            EntryKind::File => match file.data(fs, "") {
                Some(Ok(item)) => item
                    .to_attribute()
                    .and_then(|attribute| attribute.value(fs).map(|value| value.len()))
                    .unwrap_or_else(|_| file_name.data_size()),
                _ => file_name.data_size(),
            },
            _ => 0,
        };

        Ok(DirectoryEntry {
            name,
            inode: record,
            kind,
            size,
            times: Timestamps {
                created: nt_time(info.creation_time()),
                modified: nt_time(info.modification_time()),
                changed: nt_time(info.mft_record_modification_time()),
                accessed: nt_time(info.access_time()),
            },
        })
    }
}

impl Filesystem for NtfsFilesystem {
    fn type_name(&self) -> &str {
        "NTFS"
    }

    fn case_insensitive(&self) -> bool {
        true
    }

    fn root(&self) -> EvidenceResult<DirectoryEntry> {
        let mut guard = self.lock()?;
        let fs: &mut NtfsReader = &mut guard;
        let root_err = |e: NtfsError| EvidenceError::directory("/", e);
        let file = self.ntfs.file(fs, self.root_record).map_err(root_err)?;
        let info = file.info().map_err(root_err)?;
        Ok(DirectoryEntry {
            name: String::new(),
            inode: self.root_record,
            kind: EntryKind::Directory,
            size: 0,
            times: Timestamps {
                created: nt_time(info.creation_time()),
                modified: nt_time(info.modification_time()),
                changed: nt_time(info.mft_record_modification_time()),
                accessed: nt_time(info.access_time()),
            },
        })
    }

    fn entries(&self, dir: &DirectoryEntry) -> EvidenceResult<Vec<EvidenceResult<DirectoryEntry>>> {
        let label = if dir.name.is_empty() { "/" } else { dir.name.as_str() };
        let dir_err = |e: NtfsError| EvidenceError::directory(label, e);

        let mut guard = self.lock()?;
        let fs: &mut NtfsReader = &mut guard;
        let file = self.ntfs.file(fs, dir.inode).map_err(dir_err)?;
        let index = file.directory_index(fs).map_err(dir_err)?;
        let mut iter = index.entries();

        let mut out = Vec::new();
        while let Some(item) = iter.next(fs) {
            let index_entry = match item {
                Ok(index_entry) => index_entry,
                Err(e) => {
                    out.push(Err(EvidenceError::DirectoryEntry(e.to_string())));
                    continue;
                }
            };
            let file_name = match index_entry.key() {
                Some(Ok(file_name)) => file_name,
                Some(Err(e)) => {
                    out.push(Err(EvidenceError::DirectoryEntry(e.to_string())));
                    continue;
                }
                None => continue,
            };
            // Short 8.3 aliases duplicate a long-name entry
            if file_name.namespace() == NtfsFileNamespace::Dos {
                continue;
            }
            let record = index_entry.file_reference().file_record_number();
            out.push(self.describe(fs, record, &file_name));
        }
        Ok(out)
    }

    fn read_at(&self, entry: &DirectoryEntry, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        if entry.is_dir() {
            return Err(EvidenceError::content(entry.inode, "is a directory"));
        }
        let read_err = |e: NtfsError| EvidenceError::content(entry.inode, e);

        let mut guard = self.lock()?;
        let fs: &mut NtfsReader = &mut guard;
        let file = self.ntfs.file(fs, entry.inode).map_err(read_err)?;
        let Some(item) = file.data(fs, "") else {
            return Ok(0);
        };
        let item = item.map_err(read_err)?;
        let attribute = item.to_attribute().map_err(read_err)?;
        let mut value = attribute.value(fs).map_err(read_err)?;
        if offset >= value.len() {
            return Ok(0);
        }
        value.seek(fs, SeekFrom::Start(offset)).map_err(read_err)?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = value.read(fs, &mut buf[filled..]).map_err(read_err)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{EvidenceContainer, ImageKind};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_nt_time_conversion() {
        assert_eq!(nt_time(NtfsTime::from(0u64)), None);
        // 2009-07-25 23:59:59 UTC
        let ticks = (1_248_566_399 + NT_EPOCH_OFFSET_SECS as u64) * 10_000_000;
        let time = nt_time(NtfsTime::from(ticks)).unwrap();
        assert_eq!(time.timestamp(), 1_248_566_399);
    }

    #[test]
    fn test_non_ntfs_region_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zeros.dd");
        std::fs::write(&path, vec![0u8; 64 * 1024]).unwrap();
        let container = Arc::new(EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap());

        match NtfsFilesystem::open(VolumeReader::new(container, 4096)) {
            Err(EvidenceError::FilesystemMount { offset, .. }) => assert_eq!(offset, 4096),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("zeroed region mounted as NTFS"),
        }
    }
}
