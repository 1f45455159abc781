//! Evidence driver
//!
//! [`Evidence`] ties the layers together: it opens the container, reads the
//! partition table, mounts every usable partition (or the whole image when
//! there is no table) and runs the traversal modes over the mounted volumes.
//!
//! Failures are contained at the smallest scope that makes sense. An
//! unreadable partition table falls back to mounting the whole image, a
//! partition no driver recognises is recorded in
//! [`Evidence::mount_failures`], and unreadable entries or content are
//! counted in the per-operation reports. Only container and argument errors
//! end the run.

mod hashlist;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::common::audit;
use crate::common::path_security::{is_safe_path, sanitize_filename, sanitize_relative_path};
use crate::common::HashAlgorithm;
use crate::container::{ContainerOptions, EvidenceContainer, ImageKind};
use crate::content::{extract_entry, hash_entry};
use crate::error::{EvidenceError, EvidenceResult};
use crate::filesystem::{DirectoryEntry, FilesystemHandle, Mounter, NtfsDriver};
use crate::volume::{read_partitions, Partition, PartitionTable, TableScheme, MIN_USABLE_SECTORS};
use crate::walker::{CancelToken, ExtensionFilter, MatchLogic, NameMatcher, SkippedEntry, Walk, WalkEntry, WalkStats};

pub use hashlist::HashList;

/// Partition label reported for a filesystem mounted without a partition table
pub const WHOLE_IMAGE_LABEL: usize = 1;

#[derive(Clone, Debug)]
pub struct EvidenceOptions {
    /// `None` sniffs the container signature
    pub image_kind: Option<ImageKind>,
    /// `None` tries every supported partition table scheme
    pub table_hint: Option<TableScheme>,
    /// Partitions this small or smaller are not mounted
    pub min_usable_sectors: u64,
    pub container: ContainerOptions,
}

impl Default for EvidenceOptions {
    fn default() -> Self {
        Self {
            image_kind: None,
            table_hint: None,
            min_usable_sectors: MIN_USABLE_SECTORS,
            container: ContainerOptions::default(),
        }
    }
}

// =============================================================================
// Volumes and report types
// =============================================================================

/// One mounted filesystem
#[derive(Clone, Debug)]
pub struct Volume {
    index: usize,
    partition: Option<Partition>,
    fs: FilesystemHandle,
}

impl Volume {
    /// Position among the evidence's mounted volumes
    pub fn index(&self) -> usize {
        self.index
    }

    /// The partition this filesystem lives in, or `None` for a whole-image mount
    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    /// Partition address as shown in listings
    pub fn label(&self) -> usize {
        self.partition.as_ref().map_or(WHOLE_IMAGE_LABEL, |p| p.addr)
    }

    pub fn filesystem(&self) -> &FilesystemHandle {
        &self.fs
    }

    /// Byte offset of the filesystem within the container
    pub fn offset(&self) -> u64 {
        self.fs.offset()
    }

    pub fn type_name(&self) -> &str {
        self.fs.type_name()
    }

    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            index: self.index,
            label: self.label(),
            offset: self.offset(),
            filesystem: self.type_name().to_string(),
            partition: self.partition.clone(),
        }
    }

    fn walk(&self, path: &str, cancel: &CancelToken) -> EvidenceResult<Walk<'_>> {
        let dir = self.fs.open_directory(path)?;
        Ok(Walk::new(self.fs.filesystem(), &dir, normalize_path(path)).with_cancel(cancel.clone()))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct VolumeSummary {
    pub index: usize,
    pub label: usize,
    pub offset: u64,
    pub filesystem: String,
    pub partition: Option<Partition>,
}

/// A usable partition (or the whole image) that could not be mounted
#[derive(Clone, Debug, Serialize)]
pub struct MountFailure {
    pub partition: Option<Partition>,
    pub offset: u64,
    pub reason: String,
}

/// A file found by name
#[derive(Clone, Debug, Serialize)]
pub struct FileMatch {
    pub name: String,
    pub path: String,
    pub entry: DirectoryEntry,
    pub volume: usize,
    pub partition: usize,
}

/// Result of a name search: the matches plus what the walk could not read
#[derive(Clone, Debug, Default, Serialize)]
pub struct FindReport {
    pub matches: Vec<FileMatch>,
    pub stats: WalkStats,
}

#[derive(Clone, Debug, Serialize)]
pub struct DirectoryListing {
    pub volume: usize,
    pub partition: usize,
    pub path: String,
    pub directory: DirectoryEntry,
    pub entries: Vec<DirectoryEntry>,
    /// Children that failed to resolve
    pub unreadable: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtractedFile {
    pub volume: usize,
    pub partition: usize,
    pub source: String,
    pub destination: PathBuf,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExtractReport {
    pub extracted: Vec<ExtractedFile>,
    /// Matching files whose content could not be read
    pub failed: Vec<SkippedEntry>,
    pub stats: WalkStats,
}

#[derive(Clone, Debug, Serialize)]
pub struct HashMatch {
    pub volume: usize,
    pub partition: usize,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanReport {
    pub hashed: u64,
    pub matches: u64,
    /// Files whose content could not be hashed
    pub failed: Vec<SkippedEntry>,
    pub stats: WalkStats,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.hashed += other.hashed;
        self.matches += other.matches;
        self.failed.extend(other.failed);
        self.stats.merge(other.stats);
    }
}

/// `/`-rooted path with empty and `.` components removed
fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
    format!("/{}", parts.join("/"))
}

// =============================================================================
// Evidence
// =============================================================================

#[derive(Debug)]
pub struct Evidence {
    container: Arc<EvidenceContainer>,
    table: Option<PartitionTable>,
    table_error: Option<String>,
    volumes: Vec<Volume>,
    mount_failures: Vec<MountFailure>,
    cancel: CancelToken,
}

impl Evidence {
    /// Open evidence and mount its filesystems with the default drivers
    pub fn open(path: impl AsRef<Path>, options: &EvidenceOptions) -> EvidenceResult<Self> {
        Self::open_with(path, options, &Mounter::default())
    }

    #[instrument(skip(path, options, mounter), fields(path = %path.as_ref().display()))]
    pub fn open_with(path: impl AsRef<Path>, options: &EvidenceOptions, mounter: &Mounter) -> EvidenceResult<Self> {
        let container = Arc::new(EvidenceContainer::open_with(
            path.as_ref(),
            options.image_kind,
            &options.container,
        )?);

        let (table, table_error) = match read_partitions(&container, options.table_hint) {
            Ok(table) => (table, None),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Unable to read partition table; treating image as a single filesystem");
                (None, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let mut evidence = Self {
            container,
            table: None,
            table_error,
            volumes: Vec::new(),
            mount_failures: Vec::new(),
            cancel: CancelToken::new(),
        };

        match &table {
            Some(table) => {
                for partition in table.usable(options.min_usable_sectors) {
                    match table.byte_offset(partition) {
                        Ok(offset) => evidence.mount_one(mounter, Some(partition.clone()), offset),
                        Err(e) => evidence.record_failure(Some(partition.clone()), 0, e.to_string()),
                    }
                }
            }
            None => evidence.mount_one(mounter, None, 0),
        }
        evidence.table = table;

        info!(
            volumes = evidence.volumes.len(),
            failures = evidence.mount_failures.len(),
            "Evidence opened"
        );
        Ok(evidence)
    }

    fn mount_one(&mut self, mounter: &Mounter, partition: Option<Partition>, offset: u64) {
        match mounter.mount(&self.container, offset) {
            Ok(fs) => {
                debug!(offset, fs_type = fs.type_name(), "Volume mounted");
                self.volumes.push(Volume {
                    index: self.volumes.len(),
                    partition,
                    fs,
                });
            }
            Err(e) => self.record_failure(partition, offset, e.to_string()),
        }
    }

    fn record_failure(&mut self, partition: Option<Partition>, offset: u64, reason: String) {
        let label = partition.as_ref().map_or(WHOLE_IMAGE_LABEL, |p| p.addr);
        audit::log_volume_skipped(label, offset, &reason);
        self.mount_failures.push(MountFailure {
            partition,
            offset,
            reason,
        });
    }

    pub fn container(&self) -> &Arc<EvidenceContainer> {
        &self.container
    }

    /// `None` when no table was found or it could not be read
    pub fn partition_table(&self) -> Option<&PartitionTable> {
        self.table.as_ref()
    }

    /// Why the partition table could not be read, if it could not
    pub fn table_error(&self) -> Option<&str> {
        self.table_error.as_deref()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn mount_failures(&self) -> &[MountFailure] {
        &self.mount_failures
    }

    /// Token that stops every traversal on this evidence when cancelled
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// True if `partition` holds an NTFS volume
    pub fn detect_ntfs(&self, partition: &Partition) -> bool {
        let Some(offset) = self.table.as_ref().and_then(|table| table.byte_offset(partition).ok()) else {
            return false;
        };
        Mounter::empty()
            .with_driver(NtfsDriver)
            .mount(&self.container, offset)
            .is_ok()
    }

    /// Start a walk at `path` on `volume`. A path missing from the volume is
    /// logged and yields `None`.
    fn start_walk<'v>(&self, volume: &'v Volume, path: &str) -> EvidenceResult<Option<Walk<'v>>> {
        match volume.walk(path, &self.cancel) {
            Ok(walk) => Ok(Some(walk)),
            Err(e) if e.is_recoverable() => {
                debug!(volume = volume.index, path, error = %e, "Start directory not available on volume");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Files beneath `path` on every volume whose name satisfies `logic`
    pub fn recurse_files(
        &self,
        pattern: &str,
        path: &str,
        logic: MatchLogic,
        case_sensitive: bool,
    ) -> EvidenceResult<FindReport> {
        let matcher = NameMatcher::new(pattern, logic, case_sensitive);
        let mut report = FindReport::default();

        for volume in &self.volumes {
            let Some(walk) = self.start_walk(volume, path)? else {
                continue;
            };
            let matches = &mut report.matches;
            let stats = walk.run(
                |item| item.entry.is_file() && matcher.matches(&item.entry.name),
                |item| {
                    matches.push(FileMatch {
                        name: item.entry.name.clone(),
                        path: item.path,
                        entry: item.entry,
                        volume: volume.index,
                        partition: volume.label(),
                    })
                },
            );
            debug!(
                volume = volume.index,
                matched = stats.matched,
                skipped = stats.entries_skipped,
                "Name search finished"
            );
            report.stats.merge(stats);
        }
        Ok(report)
    }

    /// One-level listing of `path` on every volume that has it
    pub fn query_directory(&self, path: &str) -> Vec<DirectoryListing> {
        let mut listings = Vec::new();
        for volume in &self.volumes {
            let directory = match volume.fs.open_directory(path) {
                Ok(directory) => directory,
                Err(e) => {
                    debug!(volume = volume.index, path, error = %e, "Directory not available on volume");
                    continue;
                }
            };
            let children = match volume.fs.entries(&directory) {
                Ok(children) => children,
                Err(e) => {
                    warn!(volume = volume.index, path, error = %e, "Directory unreadable");
                    continue;
                }
            };

            let mut entries = Vec::with_capacity(children.len());
            let mut unreadable = 0;
            for child in children {
                match child {
                    Ok(entry) if !entry.is_pseudo() => entries.push(entry),
                    Ok(_) => {}
                    Err(_) => unreadable += 1,
                }
            }
            listings.push(DirectoryListing {
                volume: volume.index,
                partition: volume.label(),
                path: normalize_path(path),
                directory,
                entries,
                unreadable,
            });
        }
        listings
    }

    /// Every entry (files and directories) beneath `path` on every volume.
    /// An error from `on_entry` stops the listing.
    pub fn list_entries<F>(&self, path: &str, mut on_entry: F) -> EvidenceResult<WalkStats>
    where
        F: FnMut(&Volume, &WalkEntry) -> EvidenceResult<()>,
    {
        let mut total = WalkStats::default();
        for volume in &self.volumes {
            let Some(mut walk) = self.start_walk(volume, path)? else {
                continue;
            };
            for item in walk.by_ref() {
                on_entry(volume, &item)?;
            }
            total.merge(walk.into_stats());
        }
        Ok(total)
    }

    /// Copy files whose extension is in `filter` to
    /// `<out_dir>/<ext>/<directory path>/<name>`.
    ///
    /// Files whose content cannot be read are reported in
    /// [`ExtractReport::failed`]; failing to write the output is an error.
    pub fn extract_by_extension(&self, filter: &ExtensionFilter, path: &str, out_dir: &Path) -> EvidenceResult<ExtractReport> {
        if filter.is_empty() {
            return Err(EvidenceError::InvalidArgument("no file extensions given".to_string()));
        }
        fs::create_dir_all(out_dir)?;

        let mut report = ExtractReport::default();
        let evidence_path = self.container.path().display().to_string();

        for volume in &self.volumes {
            let Some(mut walk) = self.start_walk(volume, path)? else {
                continue;
            };
            let mut matched = 0;
            for item in walk.by_ref() {
                if !item.entry.is_file() || !filter.matches(&item.entry) {
                    continue;
                }
                matched += 1;

                let dest = extraction_path(out_dir, volume, &item);
                if !dest.strip_prefix(out_dir).is_ok_and(is_safe_path) {
                    warn!(path = %item.path, dest = %dest.display(), "Destination escapes output directory; not extracted");
                    report.failed.push(SkippedEntry {
                        path: item.path,
                        reason: "unsafe destination path".to_string(),
                    });
                    continue;
                }
                match extract_entry(volume.fs.filesystem(), &item.entry, &dest) {
                    Ok(bytes) => {
                        audit::log_data_export(&format!("{}:{}", evidence_path, item.path), &dest, bytes);
                        report.extracted.push(ExtractedFile {
                            volume: volume.index,
                            partition: volume.label(),
                            source: item.path,
                            destination: dest,
                            bytes,
                        });
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(path = %item.path, error = %e, "File content unreadable; not extracted");
                        // A partial copy would be mistaken for the real file
                        let _ = fs::remove_file(&dest);
                        report.failed.push(SkippedEntry {
                            path: item.path,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            let mut stats = walk.into_stats();
            stats.matched = matched;
            report.stats.merge(stats);
        }

        info!(
            extracted = report.extracted.len(),
            failed = report.failed.len(),
            "Extension extraction finished"
        );
        Ok(report)
    }

    /// Hash every file on every volume and report those whose digest is in
    /// `list`. `on_match` fires as each match is found.
    pub fn scan_hashes<F>(&self, list: &HashList, mut on_match: F) -> ScanReport
    where
        F: FnMut(&HashMatch),
    {
        let mut report = ScanReport::default();
        for volume in &self.volumes {
            report.merge(self.scan_volume(volume, list, &mut on_match));
        }
        report
    }

    /// [`Evidence::scan_hashes`] with volumes scanned in parallel
    pub fn par_scan_hashes<F>(&self, list: &HashList, on_match: F) -> ScanReport
    where
        F: Fn(&HashMatch) + Sync,
    {
        self.volumes
            .par_iter()
            .map(|volume| self.scan_volume(volume, list, &mut |m: &HashMatch| on_match(m)))
            .reduce(ScanReport::default, |mut acc, report| {
                acc.merge(report);
                acc
            })
    }

    fn scan_volume(&self, volume: &Volume, list: &HashList, on_match: &mut dyn FnMut(&HashMatch)) -> ScanReport {
        let mut report = ScanReport::default();
        let mut walk = match volume.walk("/", &self.cancel) {
            Ok(walk) => walk,
            Err(e) => {
                warn!(volume = volume.index, error = %e, "Root directory unreadable; volume not scanned");
                report.stats.directories_unreadable += 1;
                report.failed.push(SkippedEntry {
                    path: "/".to_string(),
                    reason: e.to_string(),
                });
                return report;
            }
        };

        let evidence_path = self.container.path().display().to_string();
        let algorithm = list.algorithm();
        for item in walk.by_ref() {
            if !item.entry.is_file() {
                continue;
            }
            let digest = match hash_entry(volume.fs.filesystem(), &item.entry, algorithm) {
                Ok(digest) => digest,
                Err(e) => {
                    debug!(path = %item.path, error = %e, "File not hashed");
                    report.failed.push(SkippedEntry {
                        path: item.path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.hashed += 1;
            if list.contains(&digest) {
                report.matches += 1;
                audit::log_hash_match(
                    &format!("{}:{}", evidence_path, item.path),
                    volume.label(),
                    algorithm.name(),
                    &digest,
                );
                on_match(&HashMatch {
                    volume: volume.index,
                    partition: volume.label(),
                    path: item.path,
                    name: item.entry.name,
                    size: item.entry.size,
                    algorithm,
                    digest,
                });
            }
        }

        let mut stats = walk.into_stats();
        stats.matched = report.matches;
        report.stats = stats;
        report
    }

    /// Unmount every volume and release the container's file handles
    pub fn close(self) {
        let Evidence {
            container, volumes, ..
        } = self;
        drop(volumes);
        if let Ok(container) = Arc::try_unwrap(container) {
            container.close();
        }
    }
}

/// `<out_dir>/<ext>/<sanitized directory path>/<sanitized name>`.
///
/// An existing file is never overwritten: the name gets the partition label
/// as a `p<label>_` prefix, then a numeric suffix ahead of the extension
/// until the path is free.
fn extraction_path(out_dir: &Path, volume: &Volume, item: &WalkEntry) -> PathBuf {
    let dir = out_dir
        .join(sanitize_filename(&item.entry.extension()))
        .join(sanitize_relative_path(item.parent()));
    let name = sanitize_filename(&item.entry.name);
    let dest = dir.join(&name);
    if !dest.exists() {
        return dest;
    }

    let prefixed = format!("p{}_{}", volume.label(), name);
    let dest = dir.join(&prefixed);
    if !dest.exists() {
        return dest;
    }

    let (stem, ext) = match prefixed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (prefixed.as_str(), String::new()),
    };
    (1u64..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::compute_hash;
    use crate::filesystem::{MemoryDriver, MemoryFilesystem};
    use crate::volume::testing::mbr_entry;
    use tempfile::TempDir;

    const SECTOR: usize = 512;

    fn volume_a() -> MemoryFilesystem {
        let mut fs = MemoryFilesystem::new("MEMFS-A");
        let windows = fs.add_dir(0, "Windows");
        let system32 = fs.add_dir(windows, "System32");
        fs.add_file(system32, "notepad.exe", b"MZ".to_vec());
        let users = fs.add_dir(0, "Users");
        let alice = fs.add_dir(users, "alice");
        fs.add_file(alice, "NTUSER.DAT", b"regf-alice".to_vec());
        fs.add_file(alice, "notes.TXT", b"meeting at noon".to_vec());
        fs.add_file(alice, "report.doc", b"quarterly".to_vec());
        fs.add_file(alice, "README", b"no extension".to_vec());
        fs.link(alice, "Users-junction", users);
        fs.add_unreadable(users, "corrupt index record");
        fs
    }

    fn volume_b() -> MemoryFilesystem {
        let mut fs = MemoryFilesystem::new("MEMFS-B");
        let data = fs.add_dir(0, "data");
        fs.add_file(data, "a.txt", b"alpha".to_vec());
        fs.add_file(data, "b.DOC", b"bravo".to_vec());
        fs.add_file(data, "c", b"charlie".to_vec());
        fs.add_file(0, "ntuser.dat", b"regf-default".to_vec());
        fs
    }

    fn mounter() -> Mounter {
        Mounter::empty().with_driver(
            MemoryDriver::new()
                .with_volume(b"MEMVOL-A", volume_a())
                .with_volume(b"MEMVOL-B", volume_b()),
        )
    }

    /// DOS disk: two recognised volumes, one too small to mount and one no
    /// driver recognises
    fn partitioned_disk(dir: &TempDir) -> PathBuf {
        let mut disk = vec![0u8; 13_000 * SECTOR];
        mbr_entry(&mut disk[..SECTOR], 0, 0x07, 2048, 4096);
        mbr_entry(&mut disk[..SECTOR], 1, 0x07, 6144, 4096);
        mbr_entry(&mut disk[..SECTOR], 2, 0x83, 10_240, 100);
        mbr_entry(&mut disk[..SECTOR], 3, 0x83, 10_340, 2100);
        disk[2048 * SECTOR..2048 * SECTOR + 8].copy_from_slice(b"MEMVOL-A");
        disk[6144 * SECTOR..6144 * SECTOR + 8].copy_from_slice(b"MEMVOL-B");
        let path = dir.path().join("disk.dd");
        fs::write(&path, disk).unwrap();
        path
    }

    fn open(path: &Path) -> Evidence {
        let options = EvidenceOptions {
            image_kind: Some(ImageKind::Raw),
            ..EvidenceOptions::default()
        };
        Evidence::open_with(path, &options, &mounter()).unwrap()
    }

    #[test]
    fn test_mounts_usable_partitions_only() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));

        assert_eq!(evidence.partition_table().unwrap().scheme, TableScheme::Dos);
        let mounted: Vec<(usize, &str)> = evidence
            .volumes()
            .iter()
            .map(|v| (v.label(), v.type_name()))
            .collect();
        assert_eq!(mounted, [(2, "MEMFS-A"), (3, "MEMFS-B")]);
        assert_eq!(evidence.volumes()[1].offset(), 6144 * SECTOR as u64);

        assert_eq!(evidence.mount_failures().len(), 1);
        assert_eq!(evidence.mount_failures()[0].offset, 10_340 * SECTOR as u64);
        assert!(evidence.table_error().is_none());
        assert!(!evidence.detect_ntfs(evidence.volumes()[0].partition().unwrap()));
    }

    #[test]
    fn test_recurse_files_across_volumes() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));

        let found = evidence.recurse_files("ntuser.dat", "/", MatchLogic::Equal, false).unwrap();
        let described: Vec<(usize, &str, &str)> = found
            .matches
            .iter()
            .map(|m| (m.partition, m.name.as_str(), m.path.as_str()))
            .collect();
        assert_eq!(
            described,
            [
                (2, "NTUSER.DAT", "/Users/alice/NTUSER.DAT"),
                (3, "ntuser.dat", "/ntuser.dat"),
            ]
        );
        // Volume A's corrupt index record is skipped, not matched
        assert_eq!(found.stats.matched, 2);
        assert_eq!(found.stats.entries_skipped, 1);
        assert_eq!(found.stats.cycles_skipped, 1);

        let exact = evidence.recurse_files("ntuser.dat", "/", MatchLogic::Equal, true).unwrap();
        assert_eq!(exact.matches.len(), 1);
        assert_eq!(exact.matches[0].volume, 1);

        let scoped = evidence.recurse_files("NT", "/Users", MatchLogic::StartsWith, false).unwrap();
        assert_eq!(scoped.matches.len(), 1);
        assert_eq!(scoped.matches[0].path, "/Users/alice/NTUSER.DAT");
        assert_eq!(scoped.stats.entries_skipped, 1);

        let nowhere = evidence.recurse_files("x", "/nowhere", MatchLogic::Contains, false).unwrap();
        assert!(nowhere.matches.is_empty());
        assert_eq!(nowhere.stats.entries_skipped, 0);
    }

    #[test]
    fn test_query_directory() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));

        let listings = evidence.query_directory("/Users/");
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].path, "/Users");
        assert_eq!(listings[0].entries.len(), 1);
        assert_eq!(listings[0].unreadable, 1);

        let roots = evidence.query_directory("/");
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn test_list_entries_survives_cycle_and_bad_entry() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));

        let mut rows = Vec::new();
        let stats = evidence
            .list_entries("/", |volume, item| {
                rows.push((volume.label(), item.path.clone(), item.entry.kind));
                Ok(())
            })
            .unwrap();

        assert!(rows.contains(&(2, "/Users/alice/Users-junction".to_string(), crate::filesystem::EntryKind::Directory)));
        assert!(rows.contains(&(3, "/data/c".to_string(), crate::filesystem::EntryKind::File)));
        assert_eq!(rows.len(), 10 + 5);
        assert_eq!(stats.cycles_skipped, 1);
        assert_eq!(stats.entries_skipped, 1);

        let stopped = evidence.list_entries("/", |_, _| Err(EvidenceError::InvalidArgument("stop".into())));
        assert!(matches!(stopped, Err(EvidenceError::InvalidArgument(_))));
    }

    #[test]
    fn test_extract_by_extension() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));
        let out = dir.path().join("out");

        let report = evidence
            .extract_by_extension(&ExtensionFilter::parse("txt,doc"), "/", &out)
            .unwrap();
        let mut sources: Vec<&str> = report.extracted.iter().map(|f| f.source.as_str()).collect();
        sources.sort_unstable();
        assert_eq!(
            sources,
            ["/Users/alice/notes.TXT", "/Users/alice/report.doc", "/data/a.txt", "/data/b.DOC"]
        );
        assert!(report.failed.is_empty());
        assert_eq!(report.stats.matched, 4);

        assert_eq!(fs::read(out.join("txt/Users/alice/notes.TXT")).unwrap(), b"meeting at noon");
        assert_eq!(fs::read(out.join("doc/data/b.DOC")).unwrap(), b"bravo");
        assert!(!out.join("txt/data/c").exists());

        assert!(matches!(
            evidence.extract_by_extension(&ExtensionFilter::parse(" , "), "/", &out),
            Err(EvidenceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_repeated_extraction_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));
        let out = dir.path().join("out");
        let filter = ExtensionFilter::parse("txt");

        let mut destinations = Vec::new();
        for _ in 0..3 {
            let report = evidence.extract_by_extension(&filter, "/Users", &out).unwrap();
            assert_eq!(report.extracted.len(), 1);
            destinations.push(report.extracted[0].destination.clone());
        }

        let alice = out.join("txt/Users/alice");
        assert_eq!(
            destinations,
            [
                alice.join("notes.TXT"),
                alice.join("p2_notes.TXT"),
                alice.join("p2_notes_1.TXT"),
            ]
        );
        for dest in &destinations {
            assert_eq!(fs::read(dest).unwrap(), b"meeting at noon");
        }
    }

    #[test]
    fn test_unaddressable_gpt_falls_back_to_whole_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpt.dd");
        let mut image = vec![0u8; 64 * SECTOR];
        image[..8].copy_from_slice(b"MEMVOL-B");
        let header = &mut image[SECTOR..SECTOR + 92];
        header[..8].copy_from_slice(b"EFI PART");
        header[72..80].copy_from_slice(&(u64::MAX / 4).to_le_bytes());
        header[80..84].copy_from_slice(&128u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());
        fs::write(&path, image).unwrap();

        let evidence = open(&path);
        assert!(evidence.partition_table().is_none());
        assert!(evidence.table_error().unwrap().contains("GPT entry array"));
        assert_eq!(evidence.volumes().len(), 1);
        assert_eq!(evidence.volumes()[0].type_name(), "MEMFS-B");
    }

    #[test]
    fn test_hash_scan_serial_and_parallel() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));
        let list = HashList::parse(&format!(
            "{}\n{}\n",
            compute_hash(b"regf-alice", HashAlgorithm::Md5),
            compute_hash(b"not on disk", HashAlgorithm::Md5)
        ))
        .unwrap();

        let mut seen = Vec::new();
        let report = evidence.scan_hashes(&list, |m| seen.push(m.path.clone()));
        assert_eq!(seen, ["/Users/alice/NTUSER.DAT"]);
        assert_eq!(report.matches, 1);
        assert_eq!(report.hashed, 9);

        let parallel_seen = std::sync::Mutex::new(Vec::new());
        let parallel = evidence.par_scan_hashes(&list, |m| parallel_seen.lock().unwrap().push(m.digest.clone()));
        assert_eq!(parallel.matches, 1);
        assert_eq!(parallel.hashed, report.hashed);
        assert_eq!(
            parallel_seen.into_inner().unwrap(),
            [compute_hash(b"regf-alice", HashAlgorithm::Md5)]
        );
    }

    #[test]
    fn test_no_table_mounts_whole_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logical.dd");
        let mut image = vec![0u8; 64 * 1024];
        image[..8].copy_from_slice(b"MEMVOL-B");
        fs::write(&path, image).unwrap();

        let evidence = open(&path);
        assert!(evidence.partition_table().is_none());
        assert!(evidence.table_error().is_none());
        assert_eq!(evidence.volumes().len(), 1);
        assert_eq!(evidence.volumes()[0].label(), WHOLE_IMAGE_LABEL);
        assert_eq!(evidence.volumes()[0].offset(), 0);
        evidence.close();
    }

    #[test]
    fn test_corrupt_table_falls_back_to_whole_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.dd");
        let mut image = vec![0u8; 8192 * SECTOR];
        image[..8].copy_from_slice(b"MEMVOL-A");
        // Extended partition whose EBR has no boot signature
        mbr_entry(&mut image[..SECTOR], 0, 0x05, 4000, 4000);
        fs::write(&path, image).unwrap();

        let evidence = open(&path);
        assert!(evidence.partition_table().is_none());
        assert!(evidence.table_error().unwrap().contains("Extended partition table"));
        assert_eq!(evidence.volumes().len(), 1);
        assert_eq!(evidence.volumes()[0].type_name(), "MEMFS-A");
    }

    #[test]
    fn test_cancelled_evidence_walks_nothing() {
        let dir = TempDir::new().unwrap();
        let evidence = open(&partitioned_disk(&dir));
        evidence.cancel_token().cancel();
        let found = evidence.recurse_files("ntuser.dat", "/", MatchLogic::Equal, false).unwrap();
        assert!(found.matches.is_empty());
        assert!(found.stats.cancelled);
        let stats = evidence.list_entries("/", |_, _| Ok(())).unwrap();
        assert!(stats.cancelled);
    }

    #[test]
    fn test_missing_evidence_is_fatal() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Evidence::open(dir.path().join("nope.E01"), &EvidenceOptions::default()),
            Err(EvidenceError::Container(_))
        ));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("Windows//System32/"), "/Windows/System32");
        assert_eq!(normalize_path("/./Users"), "/Users");
    }
}
