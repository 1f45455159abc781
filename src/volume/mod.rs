//! Partition table readers
//!
//! [`read_partitions`] tries GPT, DOS, Apple and Sun tables in that order (or
//! only the hinted scheme) and returns a listing in the classic volume-system
//! shape: table structures, extended containers, allocated partitions and
//! the unallocated gaps between them, ordered by start sector.

mod dos;
mod gpt;
mod mac;
mod sun;
mod types;

use tracing::{debug, instrument, warn};

use crate::container::EvidenceContainer;
use crate::error::{EvidenceError, EvidenceResult};

pub use types::{Partition, PartitionKind, PartitionTable, TableScheme, MIN_USABLE_SECTORS};

/// Entries found by one scheme parser, before gaps are filled in
#[derive(Debug)]
pub(crate) struct ParsedTable {
    pub block_size: u32,
    pub entries: Vec<Partition>,
}

fn parse_scheme(container: &EvidenceContainer, scheme: TableScheme) -> EvidenceResult<Option<ParsedTable>> {
    match scheme {
        TableScheme::Dos => dos::parse(container),
        TableScheme::Gpt => gpt::parse(container),
        TableScheme::Mac => mac::parse(container),
        TableScheme::Sun => sun::parse(container),
    }
}

/// Read the container's partition table.
///
/// `Ok(None)` means no table was recognised and the container should be
/// treated as a single filesystem. With a hint, a missing or corrupt table
/// of that scheme is an error.
#[instrument(skip(container), fields(path = %container.path().display()))]
pub fn read_partitions(container: &EvidenceContainer, hint: Option<TableScheme>) -> EvidenceResult<Option<PartitionTable>> {
    if let Some(scheme) = hint {
        let parsed = parse_scheme(container, scheme)?.ok_or_else(|| {
            EvidenceError::partition_table(format!("No {} partition table found", scheme))
        })?;
        return Ok(Some(finish_listing(container, scheme, parsed)));
    }

    let mut first_error = None;
    for scheme in TableScheme::AUTODETECT_ORDER {
        match parse_scheme(container, scheme) {
            Ok(Some(parsed)) => {
                debug!(%scheme, entries = parsed.entries.len(), "Partition table detected");
                return Ok(Some(finish_listing(container, scheme, parsed)));
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(%scheme, error = %e, "Partition table signature found but table unreadable");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            debug!("No partition table found");
            Ok(None)
        }
    }
}

/// Add unallocated gaps, sort by start sector and assign addresses.
///
/// Gaps are measured against allocated partitions and explicit free-space
/// entries; table structures and extended containers overlap the space they
/// describe.
fn finish_listing(container: &EvidenceContainer, scheme: TableScheme, parsed: ParsedTable) -> PartitionTable {
    let ParsedTable { block_size, mut entries } = parsed;
    let total_sectors = container.size() / block_size.max(1) as u64;

    let mut covered: Vec<(u64, u64)> = entries
        .iter()
        .filter(|p| matches!(p.kind, PartitionKind::Allocated | PartitionKind::Unallocated))
        .map(|p| (p.start, p.end()))
        .collect();
    covered.sort_unstable();

    let mut gaps = Vec::new();
    let mut cursor = 0u64;
    for (start, end) in covered {
        if start > cursor {
            gaps.push(Partition::new("Unallocated", cursor, start - cursor, PartitionKind::Unallocated));
        }
        cursor = cursor.max(end);
    }
    if cursor < total_sectors {
        gaps.push(Partition::new(
            "Unallocated",
            cursor,
            total_sectors - cursor,
            PartitionKind::Unallocated,
        ));
    }

    entries.extend(gaps);
    entries.sort_by_key(|p| (p.start, p.kind.sort_rank()));
    for (addr, partition) in entries.iter_mut().enumerate() {
        partition.addr = addr;
    }

    PartitionTable {
        scheme,
        block_size,
        partitions: entries,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Byte-level partition table builders shared by the parser tests

    /// One MBR partition entry at slot `slot` of a 512-byte sector
    pub fn mbr_entry(sector: &mut [u8], slot: usize, part_type: u8, start: u32, len: u32) {
        let base = 446 + slot * 16;
        sector[base] = 0x00;
        sector[base + 4] = part_type;
        sector[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
        sector[base + 12..base + 16].copy_from_slice(&len.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
    }

    /// Disk image with a primary NTFS partition and an extended chain of two
    /// logical Linux partitions
    pub fn dos_disk(total_sectors: u64) -> Vec<u8> {
        let mut disk = vec![0u8; (total_sectors * 512) as usize];
        {
            let mbr = &mut disk[..512];
            mbr_entry(mbr, 0, 0x07, 2048, 8192);
            mbr_entry(mbr, 1, 0x05, 10240, 10240);
        }
        {
            // First EBR at 10240: logical at +63, next EBR at ext+5120
            let ebr = &mut disk[10240 * 512..10241 * 512];
            mbr_entry(ebr, 0, 0x83, 63, 4000);
            mbr_entry(ebr, 1, 0x05, 5120, 5120);
        }
        {
            let ebr = &mut disk[15360 * 512..15361 * 512];
            mbr_entry(ebr, 0, 0x83, 63, 5000);
        }
        disk
    }
}

#[cfg(test)]
mod tests {
    use super::testing::dos_disk;
    use super::*;
    use crate::container::ImageKind;
    use tempfile::TempDir;

    fn open_bytes(dir: &TempDir, name: &str, data: &[u8]) -> EvidenceContainer {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap()
    }

    #[test]
    fn test_dos_listing_shape() {
        let dir = TempDir::new().unwrap();
        let container = open_bytes(&dir, "dos.dd", &dos_disk(22_000));

        let table = read_partitions(&container, None).unwrap().unwrap();
        assert_eq!(table.scheme, TableScheme::Dos);
        assert_eq!(table.block_size, 512);

        let rows: Vec<(&str, u64, u64)> = table
            .partitions
            .iter()
            .map(|p| (p.description.as_str(), p.start, p.length))
            .collect();
        assert_eq!(
            rows,
            [
                ("Primary Table (#0)", 0, 1),
                ("Unallocated", 0, 2048),
                ("NTFS / exFAT (0x07)", 2048, 8192),
                ("DOS Extended (0x05)", 10240, 10240),
                ("Extended Table (#1)", 10240, 1),
                ("Unallocated", 10240, 63),
                ("Linux (0x83)", 10303, 4000),
                ("Unallocated", 14303, 1120),
                ("Extended Table (#2)", 15360, 1),
                ("Linux (0x83)", 15423, 5000),
                ("Unallocated", 20423, 1577),
            ]
        );

        for (i, p) in table.partitions.iter().enumerate() {
            assert_eq!(p.addr, i);
        }
        let usable: Vec<u64> = table.usable(MIN_USABLE_SECTORS).map(|p| p.start).collect();
        assert_eq!(usable, [2048, 10303, 15423]);
        assert_eq!(table.byte_offset(&table.partitions[2]).unwrap(), 2048 * 512);
    }

    #[test]
    fn test_no_table_is_none() {
        let dir = TempDir::new().unwrap();
        let container = open_bytes(&dir, "blank.dd", &vec![0u8; 64 * 1024]);
        assert!(read_partitions(&container, None).unwrap().is_none());
    }

    #[test]
    fn test_hint_mismatch_is_error() {
        let dir = TempDir::new().unwrap();
        let container = open_bytes(&dir, "dos.dd", &dos_disk(22_000));
        assert!(matches!(
            read_partitions(&container, Some(TableScheme::Gpt)),
            Err(EvidenceError::PartitionTable(_))
        ));
        assert!(read_partitions(&container, Some(TableScheme::Dos)).unwrap().is_some());
    }
}
