// GUID Partition Table

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::common::binary::{u32_le, u64_le, utf16le_to_string};
use crate::container::EvidenceContainer;
use crate::error::{EvidenceError, EvidenceResult};

use super::{ParsedTable, Partition, PartitionKind};

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
/// Logical sector sizes a GPT header is searched for under
const CANDIDATE_BLOCK_SIZES: [u32; 2] = [512, 4096];
const MAX_ENTRIES: u32 = 16_384;

fn type_name(type_guid: &Uuid) -> Option<&'static str> {
    let name = match type_guid.to_string().to_uppercase().as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System Partition",
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft reserved partition",
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Basic data partition",
        "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC" => "Windows Recovery Environment",
        "5808C8AA-7E8F-42E0-85D2-E1E90434CFB3" => "LDM metadata partition",
        "AF9B60A0-1431-4F62-BC68-3311714A69AD" => "LDM data partition",
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem",
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
        "E6D6D379-F507-44C2-A23C-238F2A3DF928" => "Linux LVM",
        "48465300-0000-11AA-AA11-00306543ECAC" => "Apple HFS+",
        "7C3457EF-0000-11AA-AA11-00306543ECAC" => "Apple APFS",
        "21686148-6449-6E6F-744E-656564454649" => "BIOS boot partition",
        _ => return None,
    };
    Some(name)
}

pub(crate) fn parse(container: &EvidenceContainer) -> EvidenceResult<Option<ParsedTable>> {
    for block_size in CANDIDATE_BLOCK_SIZES {
        let header = container.read(block_size as u64, 92)?;
        if header.len() == 92 && &header[..8] == GPT_SIGNATURE {
            debug!(block_size, "GPT header found");
            return parse_with_block_size(container, &header, block_size).map(Some);
        }
    }
    Ok(None)
}

fn parse_with_block_size(container: &EvidenceContainer, header: &[u8], block_size: u32) -> EvidenceResult<ParsedTable> {
    let entries_lba = u64_le(header, 72);
    let entry_count = u32_le(header, 80);
    let entry_size = u32_le(header, 84);

    if !(128..=4096).contains(&entry_size) || entry_count > MAX_ENTRIES {
        return Err(EvidenceError::partition_table(format!(
            "Implausible GPT entry array: {} entries of {} bytes",
            entry_count, entry_size
        )));
    }

    let array_offset = entries_lba.checked_mul(block_size as u64).ok_or_else(|| {
        EvidenceError::partition_table(format!("GPT entry array LBA {} is past any addressable offset", entries_lba))
    })?;
    let array_len = entry_count as usize * entry_size as usize;
    let array = container.read(array_offset, array_len)?;
    if array.len() < array_len {
        return Err(EvidenceError::partition_table("GPT entry array runs past end of image"));
    }

    let table_sectors = (array_len as u64).div_ceil(block_size as u64).max(1);
    let total_sectors = container.size() / block_size as u64;
    let mut out = vec![
        Partition::new("Safety Table", 0, 1, PartitionKind::TableMetadata),
        Partition::new("GPT Header", 1, 1, PartitionKind::TableMetadata),
        Partition::new("Partition Table", entries_lba, table_sectors, PartitionKind::TableMetadata),
    ];

    for raw in array.chunks_exact(entry_size as usize) {
        let Ok(type_bytes) = <[u8; 16]>::try_from(&raw[..16]) else {
            continue;
        };
        if type_bytes.iter().all(|&b| b == 0) {
            continue;
        }
        let type_guid = Uuid::from_bytes_le(type_bytes);
        let first = u64_le(raw, 32);
        let last = u64_le(raw, 40);
        if last < first {
            trace!(first, last, "Skipping inverted GPT entry");
            continue;
        }
        if last >= total_sectors {
            warn!(first, last, total_sectors, "Skipping GPT entry that ends past the image");
            continue;
        }

        let name = utf16le_to_string(&raw[56..128]);
        let description = if !name.trim().is_empty() {
            name
        } else {
            type_name(&type_guid)
                .map(str::to_string)
                .unwrap_or_else(|| type_guid.to_string())
        };
        out.push(Partition::new(description, first, last - first + 1, PartitionKind::Allocated));
    }

    Ok(ParsedTable {
        block_size,
        entries: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ImageKind;
    use tempfile::TempDir;

    const BASIC_DATA: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";
    const EFI_SYSTEM: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";

    fn gpt_entry(array: &mut [u8], slot: usize, type_guid: &str, first: u64, last: u64, name: &str) {
        let base = slot * 128;
        let guid = Uuid::parse_str(type_guid).unwrap();
        array[base..base + 16].copy_from_slice(&guid.to_bytes_le());
        array[base + 32..base + 40].copy_from_slice(&first.to_le_bytes());
        array[base + 40..base + 48].copy_from_slice(&last.to_le_bytes());
        for (i, unit) in name.encode_utf16().enumerate() {
            array[base + 56 + i * 2..base + 58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    fn gpt_disk(block_size: usize, sectors: usize) -> Vec<u8> {
        let mut disk = vec![0u8; block_size * sectors];
        // Protective MBR
        disk[446 + 4] = 0xEE;
        disk[510] = 0x55;
        disk[511] = 0xAA;

        let header = &mut disk[block_size..block_size + 92];
        header[..8].copy_from_slice(GPT_SIGNATURE);
        header[72..80].copy_from_slice(&2u64.to_le_bytes());
        header[80..84].copy_from_slice(&128u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());

        let array = &mut disk[2 * block_size..2 * block_size + 128 * 128];
        gpt_entry(array, 0, EFI_SYSTEM, 40, 40 + 2999, "");
        gpt_entry(array, 1, BASIC_DATA, 4096, 4096 + 9999, "Data");
        disk
    }

    #[test]
    fn test_gpt_512() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpt.dd");
        std::fs::write(&path, gpt_disk(512, 16_000)).unwrap();
        let container = EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap();

        let parsed = parse(&container).unwrap().unwrap();
        assert_eq!(parsed.block_size, 512);
        let described: Vec<(&str, u64, u64)> = parsed
            .entries
            .iter()
            .map(|p| (p.description.as_str(), p.start, p.length))
            .collect();
        assert_eq!(
            described,
            [
                ("Safety Table", 0, 1),
                ("GPT Header", 1, 1),
                ("Partition Table", 2, 32),
                ("EFI System Partition", 40, 3000),
                ("Data", 4096, 10000),
            ]
        );
    }

    #[test]
    fn test_gpt_4096_and_autodetect_prefers_gpt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gpt4k.dd");
        let mut disk = gpt_disk(4096, 64);
        let array = &mut disk[2 * 4096..2 * 4096 + 128 * 128];
        gpt_entry(array, 0, EFI_SYSTEM, 6, 29, "");
        gpt_entry(array, 1, BASIC_DATA, 30, 63, "Data");
        std::fs::write(&path, disk).unwrap();
        let container = EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap();

        let table = super::super::read_partitions(&container, None).unwrap().unwrap();
        assert_eq!(table.scheme, super::super::TableScheme::Gpt);
        assert_eq!(table.block_size, 4096);
        assert!(table
            .partitions
            .iter()
            .any(|p| p.description == "Data" && p.start == 30 && p.length == 34));
        let meta = table.partitions.iter().find(|p| p.description == "Partition Table").unwrap();
        assert_eq!(meta.length, 4);
    }

    #[test]
    fn test_corrupt_entry_array() {
        let dir = TempDir::new().unwrap();
        let mut disk = gpt_disk(512, 64);
        disk[512 + 84..512 + 88].copy_from_slice(&7u32.to_le_bytes());
        let path = dir.path().join("bad.dd");
        std::fs::write(&path, disk).unwrap();
        let container = EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap();
        assert!(matches!(parse(&container), Err(EvidenceError::PartitionTable(_))));
    }

    #[test]
    fn test_unaddressable_entry_array() {
        let dir = TempDir::new().unwrap();
        let mut disk = gpt_disk(512, 64);
        disk[512 + 72..512 + 80].copy_from_slice(&(u64::MAX / 4).to_le_bytes());
        let path = dir.path().join("far.dd");
        std::fs::write(&path, disk).unwrap();
        let container = EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap();

        let err = parse(&container).unwrap_err();
        assert!(matches!(err, EvidenceError::PartitionTable(_)));
        assert!(err.to_string().contains("addressable"), "{}", err);
    }

    #[test]
    fn test_entries_past_image_end_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut disk = gpt_disk(512, 12_000);
        let array = &mut disk[2 * 512..2 * 512 + 128 * 128];
        gpt_entry(array, 2, BASIC_DATA, 5000, u64::MAX, "Runaway");
        let path = dir.path().join("short.dd");
        std::fs::write(&path, disk).unwrap();
        let container = EvidenceContainer::open(&path, Some(ImageKind::Raw)).unwrap();

        let parsed = parse(&container).unwrap().unwrap();
        let names: Vec<&str> = parsed.entries.iter().map(|p| p.description.as_str()).collect();
        // "Data" ends at sector 14095 of a 12000 sector image
        assert_eq!(names, ["Safety Table", "GPT Header", "Partition Table", "EFI System Partition"]);
    }
}
