// DOS / MBR partition tables, including extended partition chains

use std::collections::HashSet;

use tracing::{trace, warn};

use crate::common::binary::u32_le;
use crate::container::EvidenceContainer;
use crate::error::{EvidenceError, EvidenceResult};

use super::{ParsedTable, Partition, PartitionKind};

const SECTOR: u64 = 512;
const ENTRY_TABLE: usize = 446;
/// EBR chains longer than this are treated as corrupt
const MAX_EXTENDED_TABLES: usize = 1024;

struct MbrEntry {
    boot_flag: u8,
    part_type: u8,
    start: u32,
    length: u32,
}

fn entries(sector: &[u8]) -> [MbrEntry; 4] {
    std::array::from_fn(|slot| {
        let base = ENTRY_TABLE + slot * 16;
        MbrEntry {
            boot_flag: sector[base],
            part_type: sector[base + 4],
            start: u32_le(sector, base + 8),
            length: u32_le(sector, base + 12),
        }
    })
}

fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510] == 0x55 && sector[511] == 0xAA
}

/// NTFS and FAT volume boot records carry the same 0x55AA trailer
fn is_volume_boot_record(sector: &[u8]) -> bool {
    &sector[3..11] == b"NTFS    "
        || &sector[3..11] == b"EXFAT   "
        || &sector[54..59] == b"FAT12"
        || &sector[54..59] == b"FAT16"
        || &sector[82..87] == b"FAT32"
}

fn is_extended(part_type: u8) -> bool {
    matches!(part_type, 0x05 | 0x0F | 0x85)
}

pub(crate) fn type_name(part_type: u8) -> &'static str {
    match part_type {
        0x01 => "DOS FAT12",
        0x04 | 0x06 => "DOS FAT16",
        0x05 => "DOS Extended",
        0x07 => "NTFS / exFAT",
        0x0B | 0x0C => "Win95 FAT32",
        0x0E => "Win95 FAT16",
        0x0F => "Win95 Extended",
        0x12 => "Hibernation",
        0x27 => "Windows Recovery",
        0x82 => "Linux Swap / Solaris x86",
        0x83 => "Linux",
        0x85 => "Linux Extended",
        0x8E => "Linux Logical Volume Manager",
        0xA5 => "FreeBSD",
        0xA8 => "Mac OS X",
        0xAF => "Mac OS X HFS",
        0xEE => "GPT Safety Partition",
        0xEF => "EFI System Partition",
        0xFB => "VMware VMFS",
        _ => "Unknown Type",
    }
}

fn describe(part_type: u8) -> String {
    format!("{} (0x{:02X})", type_name(part_type), part_type)
}

fn read_sector(container: &EvidenceContainer, lba: u64) -> EvidenceResult<Vec<u8>> {
    container.read(lba * SECTOR, SECTOR as usize)
}

pub(crate) fn parse(container: &EvidenceContainer) -> EvidenceResult<Option<ParsedTable>> {
    let mbr = read_sector(container, 0)?;
    if !has_boot_signature(&mbr) || is_volume_boot_record(&mbr) {
        return Ok(None);
    }

    let primary = entries(&mbr);
    if primary.iter().any(|e| e.boot_flag != 0x00 && e.boot_flag != 0x80) {
        trace!("Boot flags invalid; not a DOS partition table");
        return Ok(None);
    }
    if primary.iter().all(|e| e.part_type == 0) {
        return Ok(None);
    }

    let mut out = vec![Partition::new("Primary Table (#0)", 0, 1, PartitionKind::TableMetadata)];
    let mut table_number = 0usize;

    for entry in primary.iter().filter(|e| e.part_type != 0 && e.length != 0) {
        let description = describe(entry.part_type);
        if is_extended(entry.part_type) {
            out.push(Partition::new(
                description,
                entry.start as u64,
                entry.length as u64,
                PartitionKind::Extended,
            ));
            walk_extended_chain(container, entry.start as u64, &mut table_number, &mut out)?;
        } else {
            out.push(Partition::new(
                description,
                entry.start as u64,
                entry.length as u64,
                PartitionKind::Allocated,
            ));
        }
    }

    Ok(Some(ParsedTable {
        block_size: SECTOR as u32,
        entries: out,
    }))
}

/// Follow the EBR chain. Logical partition starts are relative to their EBR;
/// next-EBR links are relative to the start of the outer extended partition.
fn walk_extended_chain(
    container: &EvidenceContainer,
    extended_base: u64,
    table_number: &mut usize,
    out: &mut Vec<Partition>,
) -> EvidenceResult<()> {
    let mut visited = HashSet::new();
    let mut ebr_lba = extended_base;

    loop {
        if !visited.insert(ebr_lba) {
            warn!(ebr_lba, "Extended partition chain loops; stopping");
            break;
        }
        if visited.len() > MAX_EXTENDED_TABLES {
            return Err(EvidenceError::partition_table("Extended partition chain too long"));
        }

        let ebr = read_sector(container, ebr_lba)?;
        if !has_boot_signature(&ebr) {
            return Err(EvidenceError::partition_table(format!(
                "Extended partition table at sector {} has no boot signature",
                ebr_lba
            )));
        }

        *table_number += 1;
        out.push(Partition::new(
            format!("Extended Table (#{})", table_number),
            ebr_lba,
            1,
            PartitionKind::TableMetadata,
        ));

        let mut next = None;
        for entry in entries(&ebr).iter().filter(|e| e.part_type != 0 && e.length != 0) {
            if is_extended(entry.part_type) {
                next.get_or_insert(extended_base + entry.start as u64);
            } else {
                out.push(Partition::new(
                    describe(entry.part_type),
                    ebr_lba + entry.start as u64,
                    entry.length as u64,
                    PartitionKind::Allocated,
                ));
            }
        }

        match next {
            Some(lba) => ebr_lba = lba,
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{dos_disk, mbr_entry};
    use super::*;
    use crate::container::ImageKind;
    use tempfile::TempDir;

    fn open_bytes(dir: &TempDir, data: &[u8]) -> EvidenceContainer {
        let path = dir.path().join("disk.dd");
        std::fs::write(&path, data).unwrap();
        EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap()
    }

    #[test]
    fn test_extended_chain() {
        let dir = TempDir::new().unwrap();
        let parsed = parse(&open_bytes(&dir, &dos_disk(22_000))).unwrap().unwrap();
        let logical: Vec<u64> = parsed
            .entries
            .iter()
            .filter(|p| p.description == "Linux (0x83)")
            .map(|p| p.start)
            .collect();
        assert_eq!(logical, [10303, 15423]);
    }

    #[test]
    fn test_looping_chain_terminates() {
        let dir = TempDir::new().unwrap();
        let mut disk = vec![0u8; 4096 * 512];
        mbr_entry(&mut disk[..512], 0, 0x0F, 1000, 3000);
        // EBR points back at itself
        mbr_entry(&mut disk[1000 * 512..1001 * 512], 0, 0x83, 63, 100);
        mbr_entry(&mut disk[1000 * 512..1001 * 512], 1, 0x05, 0, 3000);

        let parsed = parse(&open_bytes(&dir, &disk)).unwrap().unwrap();
        let tables = parsed
            .entries
            .iter()
            .filter(|p| p.description.starts_with("Extended Table"))
            .count();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_ntfs_boot_sector_is_not_a_table() {
        let dir = TempDir::new().unwrap();
        let mut disk = vec![0u8; 8 * 512];
        disk[3..11].copy_from_slice(b"NTFS    ");
        disk[510] = 0x55;
        disk[511] = 0xAA;
        assert!(parse(&open_bytes(&dir, &disk)).unwrap().is_none());
    }

    #[test]
    fn test_broken_ebr_is_error() {
        let dir = TempDir::new().unwrap();
        let mut disk = vec![0u8; 4096 * 512];
        mbr_entry(&mut disk[..512], 0, 0x05, 1000, 3000);
        assert!(matches!(
            parse(&open_bytes(&dir, &disk)),
            Err(EvidenceError::PartitionTable(_))
        ));
    }
}
