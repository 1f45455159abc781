//! Type definitions for EWF (Expert Witness Format) v1 images

use std::collections::BTreeMap;

use serde::Serialize;

// =============================================================================
// Core Constants
// =============================================================================

pub const EWF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";

/// Signature(8) + fields_start(1) + segment_number(2) + fields_end(2)
pub(crate) const FILE_HEADER_SIZE: u64 = 13;
/// type(16) + next(8) + size(8) + padding(40) + checksum(4)
pub(crate) const SECTION_DESCRIPTOR_SIZE: u64 = 76;
/// entry_count(4) + padding(4) + base_offset(8) + padding(4) + checksum(4)
pub(crate) const TABLE_HEADER_SIZE: usize = 24;

pub(crate) const COMPRESSED_FLAG: u32 = 0x8000_0000;
pub(crate) const MAX_SECTIONS_PER_SEGMENT: usize = 65_536;
/// Header sections larger than this are not acquisition metadata
pub(crate) const MAX_HEADER_SECTION: u64 = 4 * 1024 * 1024;
/// Largest chunk a volume section may declare
pub(crate) const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

pub const DEFAULT_CHUNK_CACHE_ENTRIES: usize = 256;

// =============================================================================
// Section Structures
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct SectionDescriptor {
    pub section_type: String,
    /// Offset of this descriptor within its segment file
    pub offset: u64,
    /// Offset of the next descriptor, segment-local
    pub next_offset: u64,
    /// Section size including the descriptor
    pub size: u64,
}

impl SectionDescriptor {
    pub fn data_offset(&self) -> u64 {
        self.offset.saturating_add(SECTION_DESCRIPTOR_SIZE)
    }

    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(SECTION_DESCRIPTOR_SIZE)
    }
}

/// Media geometry from the `volume`/`disk` section
#[derive(Clone, Debug, Serialize)]
pub struct VolumeSection {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
}

impl VolumeSection {
    pub fn chunk_size(&self) -> u64 {
        self.sectors_per_chunk as u64 * self.bytes_per_sector as u64
    }

    /// `None` when the declared geometry does not fit in 64 bits
    pub fn checked_media_size(&self) -> Option<u64> {
        self.sector_count.checked_mul(self.bytes_per_sector as u64)
    }

    pub fn media_size(&self) -> u64 {
        self.sector_count.saturating_mul(self.bytes_per_sector as u64)
    }
}

/// Where one chunk lives on disk
#[derive(Clone, Debug)]
pub(crate) struct ChunkLocation {
    pub segment_index: usize,
    /// Offset within the segment file
    pub offset: u64,
    /// Bytes stored on disk, including the checksum of uncompressed chunks
    pub stored_size: u64,
    pub compressed: bool,
}

// =============================================================================
// Public Metadata
// =============================================================================

/// Acquisition metadata carried by an EWF image
#[derive(Clone, Debug, Default, Serialize)]
pub struct EwfMetadata {
    /// Header values keyed by descriptive name (case_number, examiner_name, ...)
    pub header_values: BTreeMap<String, String>,
    /// MD5 of the acquired media, lowercase hex
    pub md5: Option<String>,
    /// SHA-1 of the acquired media, lowercase hex
    pub sha1: Option<String>,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub media_size: u64,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub segment_count: usize,
}
