// Apple Partition Map

use tracing::trace;

use crate::common::binary::{bytes_to_string, u16_be, u32_be};
use crate::container::EvidenceContainer;
use crate::error::{EvidenceError, EvidenceResult};

use super::{ParsedTable, Partition, PartitionKind};

const BLOCK: u64 = 512;
const MAX_MAP_ENTRIES: u32 = 4096;

struct MapEntry {
    map_count: u32,
    start: u32,
    length: u32,
    name: String,
    part_type: String,
}

fn read_map_entry(container: &EvidenceContainer, block: u64) -> EvidenceResult<Option<MapEntry>> {
    let data = container.read(block * BLOCK, BLOCK as usize)?;
    if data.len() < BLOCK as usize || &data[..2] != b"PM" {
        return Ok(None);
    }
    Ok(Some(MapEntry {
        map_count: u32_be(&data, 4),
        start: u32_be(&data, 8),
        length: u32_be(&data, 12),
        name: bytes_to_string(&data[16..48]),
        part_type: bytes_to_string(&data[48..80]),
    }))
}

fn classify(part_type: &str) -> PartitionKind {
    match part_type {
        "Apple_Free" => PartitionKind::Unallocated,
        "Apple_partition_map" => PartitionKind::TableMetadata,
        _ => PartitionKind::Allocated,
    }
}

pub(crate) fn parse(container: &EvidenceContainer) -> EvidenceResult<Option<ParsedTable>> {
    let driver = container.read(0, 4)?;
    if driver.len() == 4 && &driver[..2] == b"ER" {
        trace!(block_size = u16_be(&driver, 2), "Apple driver descriptor");
    }

    let Some(first) = read_map_entry(container, 1)? else {
        return Ok(None);
    };
    if first.map_count == 0 || first.map_count > MAX_MAP_ENTRIES {
        return Err(EvidenceError::partition_table(format!(
            "Implausible Apple partition map size {}",
            first.map_count
        )));
    }

    let mut out = Vec::with_capacity(first.map_count as usize);
    let map_count = first.map_count;
    let mut entry = Some(first);
    for block in 1..=map_count as u64 {
        if block > 1 {
            entry = read_map_entry(container, block)?;
        }
        let Some(current) = entry.take() else {
            return Err(EvidenceError::partition_table(format!(
                "Apple partition map entry {} missing its signature",
                block
            )));
        };
        let description = if current.part_type.is_empty() {
            current.name.clone()
        } else {
            current.part_type.clone()
        };
        trace!(block, name = %current.name, part_type = %current.part_type, "APM entry");
        out.push(Partition::new(
            description,
            current.start as u64,
            current.length as u64,
            classify(&current.part_type),
        ));
    }

    Ok(Some(ParsedTable {
        block_size: BLOCK as u32,
        entries: out,
    }))
}
