//! Partition table data model

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{EvidenceError, EvidenceResult};

/// Partitions of this many sectors or fewer are never mounted
pub const MIN_USABLE_SECTORS: u64 = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TableScheme {
    Dos,
    Gpt,
    Mac,
    Sun,
}

impl TableScheme {
    pub const AUTODETECT_ORDER: [TableScheme; 4] =
        [TableScheme::Gpt, TableScheme::Dos, TableScheme::Mac, TableScheme::Sun];

    pub fn name(&self) -> &'static str {
        match self {
            TableScheme::Dos => "DOS",
            TableScheme::Gpt => "GPT",
            TableScheme::Mac => "MAC",
            TableScheme::Sun => "SUN",
        }
    }
}

impl FromStr for TableScheme {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DOS" | "MBR" => Ok(TableScheme::Dos),
            "GPT" => Ok(TableScheme::Gpt),
            "MAC" | "APM" => Ok(TableScheme::Mac),
            "SUN" => Ok(TableScheme::Sun),
            other => Err(EvidenceError::partition_table(format!(
                "Unknown partition table type '{}' (expected DOS, GPT, MAC or SUN)",
                other
            ))),
        }
    }
}

impl fmt::Display for TableScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionKind {
    /// Holds a filesystem (or at least claims to)
    Allocated,
    /// Space no table entry covers
    Unallocated,
    /// DOS extended container; its logical partitions are listed separately
    Extended,
    /// The partition table structures themselves
    TableMetadata,
}

impl PartitionKind {
    /// Listing order among rows that start on the same sector
    pub(crate) fn sort_rank(&self) -> u8 {
        match self {
            PartitionKind::Extended => 0,
            PartitionKind::TableMetadata => 1,
            PartitionKind::Unallocated => 2,
            PartitionKind::Allocated => 3,
        }
    }
}

/// One row of a volume's partition listing. Start and length are in sectors
/// of the table's block size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub addr: usize,
    pub description: String,
    pub start: u64,
    pub length: u64,
    pub kind: PartitionKind,
}

impl Partition {
    pub fn new(description: impl Into<String>, start: u64, length: u64, kind: PartitionKind) -> Self {
        Self {
            addr: 0,
            description: description.into(),
            start,
            length,
            kind,
        }
    }

    /// Build a row from a listing description alone, classifying by the
    /// keywords volume listings use.
    pub fn from_description(description: impl Into<String>, start: u64, length: u64) -> Self {
        let description = description.into();
        let kind = if description.contains("Unallocated") {
            PartitionKind::Unallocated
        } else if description.contains("Extended Table")
            || description.contains("Primary Table")
            || description.contains("Safety Table")
            || description.contains("GPT Header")
            || description.contains("Partition Table")
        {
            PartitionKind::TableMetadata
        } else if description.contains("Extended") {
            PartitionKind::Extended
        } else {
            PartitionKind::Allocated
        };
        Self::new(description, start, length, kind)
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// True if this partition should be mounted: allocated and larger than
    /// `min_sectors`.
    pub fn is_usable(&self, min_sectors: u64) -> bool {
        self.length > min_sectors
            && self.kind == PartitionKind::Allocated
            && !self.description.contains("Unallocated")
            && !self.description.contains("Extended")
            && !self.description.contains("Primary Table")
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PartitionTable {
    pub scheme: TableScheme,
    /// Bytes per sector for `start`/`length`
    pub block_size: u32,
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn usable(&self, min_sectors: u64) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(move |p| p.is_usable(min_sectors))
    }

    /// Byte offset of a partition within the container
    pub fn byte_offset(&self, partition: &Partition) -> EvidenceResult<u64> {
        partition.start.checked_mul(self.block_size as u64).ok_or_else(|| {
            EvidenceError::partition_table(format!(
                "Partition {} starts at sector {}, past any addressable byte offset",
                partition.addr, partition.start
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_classification() {
        let rows = [
            Partition::from_description("Unallocated", 0, 100),
            Partition::from_description("NTFS / exFAT (0x07)", 2048, 500_000),
            Partition::from_description("Primary Table (#0)", 0, 1),
            Partition::from_description("DOS Extended (0x05)", 600_000, 400_000),
            Partition::from_description("Linux (0x83)", 700_000, 2048),
        ];
        let usable: Vec<_> = rows
            .iter()
            .filter(|p| p.is_usable(MIN_USABLE_SECTORS))
            .map(|p| p.description.as_str())
            .collect();
        assert_eq!(usable, ["NTFS / exFAT (0x07)"]);
        assert_eq!(rows[3].kind, PartitionKind::Extended);
        assert_eq!(rows[2].kind, PartitionKind::TableMetadata);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let small = Partition::new("FAT12", 63, 2000, PartitionKind::Allocated);
        assert!(!small.is_usable(MIN_USABLE_SECTORS));
        assert!(small.is_usable(1000));
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("gpt".parse::<TableScheme>().unwrap(), TableScheme::Gpt);
        assert_eq!("Sun".parse::<TableScheme>().unwrap(), TableScheme::Sun);
        assert!(matches!(
            "BSD".parse::<TableScheme>(),
            Err(EvidenceError::PartitionTable(_))
        ));
    }
}
