// Sun SPARC disk label (VTOC in sector 0)

use tracing::trace;

use crate::common::binary::{u16_be, u32_be};
use crate::container::EvidenceContainer;
use crate::error::{EvidenceError, EvidenceResult};

use super::{ParsedTable, Partition, PartitionKind};

const SECTOR: usize = 512;
const SUN_MAGIC: u16 = 0xDABE;
const MAGIC_OFFSET: usize = 508;
const MAX_PARTS: usize = 8;
const TAGS_OFFSET: usize = 142;
const NHEAD_OFFSET: usize = 436;
const NSECT_OFFSET: usize = 438;
const MAP_OFFSET: usize = 444;
const BACKUP_TAG: u16 = 5;

fn tag_name(tag: u16) -> &'static str {
    match tag {
        0 => "Unassigned",
        1 => "boot",
        2 => "/",
        3 => "swap",
        4 => "/usr",
        5 => "backup",
        6 => "stand",
        7 => "/var",
        8 => "/home",
        9 => "alt sector",
        10 => "cache",
        _ => "Unknown Type",
    }
}

/// XOR of every big-endian word in the label, including the stored checksum
fn checksum_ok(label: &[u8]) -> bool {
    label
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc ^ u16::from_be_bytes([w[0], w[1]]))
        == 0
}

pub(crate) fn parse(container: &EvidenceContainer) -> EvidenceResult<Option<ParsedTable>> {
    let label = container.read(0, SECTOR)?;
    if label.len() < SECTOR || u16_be(&label, MAGIC_OFFSET) != SUN_MAGIC {
        return Ok(None);
    }
    if !checksum_ok(&label) {
        return Err(EvidenceError::partition_table("Sun disk label checksum mismatch"));
    }

    let nparts = (u16_be(&label, 140) as usize).min(MAX_PARTS);
    let nhead = u16_be(&label, NHEAD_OFFSET) as u64;
    let nsect = u16_be(&label, NSECT_OFFSET) as u64;
    if nparts > 0 && (nhead == 0 || nsect == 0) {
        return Err(EvidenceError::partition_table("Sun disk label has zero geometry"));
    }
    let sectors_per_cylinder = nhead * nsect;

    let mut out = vec![Partition::new("Partition Table", 0, 1, PartitionKind::TableMetadata)];
    for slot in 0..nparts {
        let tag = u16_be(&label, TAGS_OFFSET + slot * 4);
        let start_cyl = u32_be(&label, MAP_OFFSET + slot * 8) as u64;
        let length = u32_be(&label, MAP_OFFSET + slot * 8 + 4) as u64;
        if length == 0 {
            continue;
        }
        let kind = if tag == BACKUP_TAG {
            PartitionKind::TableMetadata
        } else {
            PartitionKind::Allocated
        };
        let start = start_cyl * sectors_per_cylinder;
        trace!(slot, tag, start, length, "Sun VTOC entry");
        out.push(Partition::new(
            format!("{} (0x{:02X})", tag_name(tag), tag),
            start,
            length,
            kind,
        ));
    }

    Ok(Some(ParsedTable {
        block_size: SECTOR as u32,
        entries: out,
    }))
}
