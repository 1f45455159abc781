//! EwfHandle - random access over an EWF segment set

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use tracing::{debug, trace, warn};

use crate::common::binary::{bytes_to_string, u32_le, u64_le};
use crate::common::FileIoPool;
use crate::error::{EvidenceError, EvidenceResult};

use super::cache::ChunkCache;
use super::header::parse_header_section;
use super::types::*;

// =============================================================================
// Segment Walk State
// =============================================================================

/// Everything gathered while walking the section chains of all segments
#[derive(Default)]
struct SectionWalk {
    volume: Option<VolumeSection>,
    chunks: Vec<ChunkLocation>,
    metadata: EwfMetadata,
}

// =============================================================================
// EWF Handle
// =============================================================================

#[derive(Debug)]
pub struct EwfHandle {
    file_pool: FileIoPool,
    volume: VolumeSection,
    chunks: Vec<ChunkLocation>,
    chunk_cache: ChunkCache,
    metadata: EwfMetadata,
}

impl EwfHandle {
    /// Open an ordered EWF segment list
    pub fn open(segments: Vec<PathBuf>, max_open: usize, cache_entries: usize) -> EvidenceResult<Self> {
        if segments.is_empty() {
            return Err(EvidenceError::container("No EWF segments to open"));
        }
        let segment_count = segments.len();
        let mut file_pool = FileIoPool::new(segments, max_open);

        let mut walk = SectionWalk::default();
        for segment_index in 0..segment_count {
            Self::walk_segment(&mut file_pool, segment_index, &mut walk)?;
        }

        let volume = walk
            .volume
            .ok_or_else(|| EvidenceError::container("EWF image has no volume section"))?;
        if volume.bytes_per_sector == 0 || volume.sectors_per_chunk == 0 {
            return Err(EvidenceError::container("EWF volume section has zero geometry"));
        }
        if volume.chunk_size() > MAX_CHUNK_SIZE {
            return Err(EvidenceError::container(format!(
                "EWF chunk size {} exceeds {} bytes",
                volume.chunk_size(),
                MAX_CHUNK_SIZE
            )));
        }
        if volume.checked_media_size().is_none() {
            return Err(EvidenceError::container(format!(
                "EWF volume section declares {} sectors of {} bytes, more than 64-bit offsets can address",
                volume.sector_count, volume.bytes_per_sector
            )));
        }

        let expected_chunks = volume.media_size().div_ceil(volume.chunk_size());
        if (walk.chunks.len() as u64) < expected_chunks {
            warn!(
                found = walk.chunks.len(),
                expected = expected_chunks,
                "EWF chunk table is incomplete; reads beyond it will fail"
            );
        }

        let mut metadata = walk.metadata;
        metadata.bytes_per_sector = volume.bytes_per_sector;
        metadata.sector_count = volume.sector_count;
        metadata.media_size = volume.media_size();
        metadata.chunk_count = volume.chunk_count;
        metadata.sectors_per_chunk = volume.sectors_per_chunk;
        metadata.segment_count = segment_count;

        debug!(
            segments = segment_count,
            chunks = walk.chunks.len(),
            media_size = metadata.media_size,
            "Opened EWF image"
        );

        Ok(Self {
            file_pool,
            volume,
            chunks: walk.chunks,
            chunk_cache: ChunkCache::new(cache_entries),
            metadata,
        })
    }

    /// Follow one segment's section chain from the file header to `next`/`done`
    fn walk_segment(pool: &mut FileIoPool, segment_index: usize, walk: &mut SectionWalk) -> EvidenceResult<()> {
        let segment_size = pool
            .get_file(segment_index)?
            .metadata()
            .map_err(|e| EvidenceError::container(format!("Cannot stat EWF segment: {}", e)))?
            .len();

        let mut header = [0u8; FILE_HEADER_SIZE as usize];
        let n = pool.read_at(segment_index, 0, &mut header)?;
        if n < header.len() || &header[..8] != EWF_SIGNATURE {
            return Err(EvidenceError::container(format!(
                "Segment {} is not an EWF segment (bad signature)",
                segment_index + 1
            )));
        }
        let segment_number = u16::from_le_bytes([header[9], header[10]]);
        if segment_number as usize != segment_index + 1 {
            warn!(segment_index, segment_number, "EWF segment number out of sequence");
        }

        // End of the most recent `sectors` section; bounds the last chunk of a table
        let mut sectors_end: Option<u64> = None;
        let mut offset = FILE_HEADER_SIZE;

        for _ in 0..MAX_SECTIONS_PER_SEGMENT {
            if offset
                .checked_add(SECTION_DESCRIPTOR_SIZE)
                .map_or(true, |end| end > segment_size)
            {
                warn!(segment_index, offset, "Section chain runs past end of segment");
                break;
            }
            let section = Self::read_section_descriptor(pool, segment_index, offset)?;
            trace!(
                segment_index,
                section = %section.section_type,
                offset,
                size = section.size,
                "EWF section"
            );

            match section.section_type.as_str() {
                "header" | "header2" => {
                    let utf16 = section.section_type == "header2";
                    match Self::read_section_data(pool, segment_index, segment_size, &section, MAX_HEADER_SECTION)
                        .and_then(|data| parse_header_section(&data, utf16))
                    {
                        Ok(values) => {
                            for (key, value) in values {
                                if utf16 {
                                    walk.metadata.header_values.insert(key, value);
                                } else {
                                    walk.metadata.header_values.entry(key).or_insert(value);
                                }
                            }
                        }
                        Err(e) => warn!(segment_index, error = %e, "Unreadable EWF header section"),
                    }
                }
                "volume" | "disk" => {
                    if walk.volume.is_none() {
                        walk.volume = Some(Self::read_volume_section(pool, segment_index, segment_size, &section)?);
                    }
                }
                "sectors" => {
                    sectors_end = Some(section.offset.saturating_add(section.size).min(segment_size));
                }
                "table" => {
                    let limit = sectors_end.unwrap_or(section.offset);
                    let chunks = Self::read_table_section(pool, segment_index, segment_size, &section, limit)?;
                    trace!(segment_index, entries = chunks.len(), "EWF table");
                    walk.chunks.extend(chunks);
                }
                "hash" => {
                    let data = Self::read_section_data(pool, segment_index, segment_size, &section, 16)?;
                    if data.len() == 16 && data.iter().any(|&b| b != 0) {
                        walk.metadata.md5 = Some(hex::encode(&data));
                    }
                }
                "digest" => {
                    let data = Self::read_section_data(pool, segment_index, segment_size, &section, 36)?;
                    if data.len() >= 16 && data[..16].iter().any(|&b| b != 0) {
                        walk.metadata.md5 = Some(hex::encode(&data[..16]));
                    }
                    if data.len() >= 36 && data[16..36].iter().any(|&b| b != 0) {
                        walk.metadata.sha1 = Some(hex::encode(&data[16..36]));
                    }
                }
                "next" | "done" => break,
                // table2 mirrors table; error2, session, data carry nothing we read
                _ => {}
            }

            if section.next_offset <= offset {
                trace!(segment_index, "Section chain ended");
                break;
            }
            offset = section.next_offset;
        }
        Ok(())
    }

    fn read_section_descriptor(pool: &mut FileIoPool, segment_index: usize, offset: u64) -> EvidenceResult<SectionDescriptor> {
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE as usize];
        let n = pool.read_at(segment_index, offset, &mut buf)?;
        if n < buf.len() {
            return Err(EvidenceError::container(format!(
                "Truncated EWF section descriptor at offset {} in segment {}",
                offset,
                segment_index + 1
            )));
        }
        Ok(SectionDescriptor {
            section_type: bytes_to_string(&buf[..16]),
            offset,
            next_offset: u64_le(&buf, 16),
            size: u64_le(&buf, 24),
        })
    }

    /// Up to `limit` bytes of a section's data. A section claiming more bytes
    /// than its segment holds is an error.
    fn read_section_data(
        pool: &mut FileIoPool,
        segment_index: usize,
        segment_size: u64,
        section: &SectionDescriptor,
        limit: u64,
    ) -> EvidenceResult<Vec<u8>> {
        let wanted = section.data_size().min(limit);
        let available = segment_size.saturating_sub(section.data_offset());
        if wanted > available {
            return Err(EvidenceError::container(format!(
                "EWF {} section at offset {} in segment {} declares {} bytes but only {} remain",
                section.section_type,
                section.offset,
                segment_index + 1,
                section.data_size(),
                available
            )));
        }
        let mut data = vec![0u8; wanted as usize];
        let n = pool.read_at(segment_index, section.data_offset(), &mut data)?;
        data.truncate(n);
        Ok(data)
    }

    fn read_volume_section(
        pool: &mut FileIoPool,
        segment_index: usize,
        segment_size: u64,
        section: &SectionDescriptor,
    ) -> EvidenceResult<VolumeSection> {
        let data = Self::read_section_data(pool, segment_index, segment_size, section, 24)?;
        if data.len() < 24 {
            return Err(EvidenceError::container("Truncated EWF volume section"));
        }
        let volume = VolumeSection {
            chunk_count: u32_le(&data, 4),
            sectors_per_chunk: u32_le(&data, 8),
            bytes_per_sector: u32_le(&data, 12),
            sector_count: u64_le(&data, 16),
        };
        debug!(?volume, "EWF volume section");
        Ok(volume)
    }

    /// Decode a chunk table. `data_end` bounds the final chunk's stored size.
    fn read_table_section(
        pool: &mut FileIoPool,
        segment_index: usize,
        segment_size: u64,
        section: &SectionDescriptor,
        data_end: u64,
    ) -> EvidenceResult<Vec<ChunkLocation>> {
        let data = Self::read_section_data(pool, segment_index, segment_size, section, u64::MAX)?;
        if data.len() < TABLE_HEADER_SIZE {
            return Err(EvidenceError::container("Truncated EWF table section"));
        }

        let entry_count = u32_le(&data, 0) as usize;
        let base_offset = u64_le(&data, 8);
        let available = (data.len() - TABLE_HEADER_SIZE) / 4;
        if entry_count > available {
            warn!(entry_count, available, "EWF table shorter than its entry count");
        }

        let entries: Vec<u32> = (0..entry_count.min(available))
            .map(|i| u32_le(&data, TABLE_HEADER_SIZE + i * 4))
            .collect();

        let chunk_offset = |entry: u32| {
            base_offset
                .checked_add((entry & !COMPRESSED_FLAG) as u64)
                .ok_or_else(|| EvidenceError::container(format!("EWF table base offset {} overflows", base_offset)))
        };

        let mut chunks = Vec::with_capacity(entries.len());
        for (i, &entry) in entries.iter().enumerate() {
            let offset = chunk_offset(entry)?;
            let end = match entries.get(i + 1) {
                Some(&next) => chunk_offset(next)?,
                None => data_end,
            };
            chunks.push(ChunkLocation {
                segment_index,
                offset,
                stored_size: end.saturating_sub(offset),
                compressed: entry & COMPRESSED_FLAG != 0,
            });
        }
        Ok(chunks)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    pub fn media_size(&self) -> u64 {
        self.volume.media_size()
    }

    pub fn bytes_per_sector(&self) -> u32 {
        self.volume.bytes_per_sector
    }

    pub fn metadata(&self) -> &EwfMetadata {
        &self.metadata
    }

    pub fn segment_paths(&self) -> &[PathBuf] {
        self.file_pool.paths()
    }

    /// Expected decoded length of a chunk; the final chunk may be short
    fn chunk_length(&self, chunk_index: usize) -> usize {
        let chunk_size = self.volume.chunk_size();
        let start = (chunk_index as u64).saturating_mul(chunk_size);
        chunk_size.min(self.media_size().saturating_sub(start)) as usize
    }

    /// Read and decode one chunk, through the cache
    pub fn read_chunk(&mut self, chunk_index: usize) -> EvidenceResult<Arc<Vec<u8>>> {
        if let Some(data) = self.chunk_cache.get(chunk_index) {
            return Ok(data);
        }

        let location = self.chunks.get(chunk_index).cloned().ok_or_else(|| {
            EvidenceError::container(format!("Chunk {} missing from EWF chunk table", chunk_index))
        })?;
        let expected = self.chunk_length(chunk_index);
        let chunk_size = self.volume.chunk_size();

        let mut data = if location.compressed {
            let mut stored = vec![0u8; location.stored_size.min(chunk_size.saturating_mul(2)) as usize];
            let n = self
                .file_pool
                .read_at(location.segment_index, location.offset, &mut stored)?;
            stored.truncate(n);

            let mut decoded = Vec::with_capacity(chunk_size as usize);
            ZlibDecoder::new(stored.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| {
                    EvidenceError::container(format!("Chunk {} decompression failed: {}", chunk_index, e))
                })?;
            decoded
        } else {
            let mut raw = vec![0u8; expected];
            let n = self
                .file_pool
                .read_at(location.segment_index, location.offset, &mut raw)?;
            raw.truncate(n);
            raw
        };

        if data.len() < expected {
            return Err(EvidenceError::container(format!(
                "Chunk {} decoded to {} bytes, expected {}",
                chunk_index,
                data.len(),
                expected
            )));
        }
        data.truncate(expected);

        let data = Arc::new(data);
        self.chunk_cache.insert(chunk_index, Arc::clone(&data));
        Ok(data)
    }

    /// Read at a media offset, spanning chunks. Short only at end of media.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        let media_size = self.media_size();
        let chunk_size = self.volume.chunk_size();
        let mut total = 0;
        let mut position = offset;

        while total < buf.len() && position < media_size {
            let chunk_index = (position / chunk_size) as usize;
            let within = (position % chunk_size) as usize;
            let chunk = self.read_chunk(chunk_index)?;
            if within >= chunk.len() {
                break;
            }
            let n = (buf.len() - total).min(chunk.len() - within);
            buf[total..total + n].copy_from_slice(&chunk[within..within + n]);
            total += n;
            position += n as u64;
        }
        Ok(total)
    }

    pub fn close(&mut self) {
        self.chunk_cache.clear();
        self.file_pool.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{write_ewf_set, EwfFixture};
    use super::*;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) % 251) as u8).collect()
    }

    #[test]
    fn test_single_segment_compressed() {
        let dir = TempDir::new().unwrap();
        let data = pattern(512 * 20 + 512 * 3);
        let paths = write_ewf_set(dir.path(), "disk", &data, &EwfFixture::default());

        let mut handle = EwfHandle::open(paths, 4, 8).unwrap();
        assert_eq!(handle.media_size(), data.len() as u64);

        let mut buf = vec![0u8; data.len()];
        assert_eq!(handle.read_at(0, &mut buf).unwrap(), data.len());
        assert_eq!(buf, data);

        let meta = handle.metadata();
        assert_eq!(meta.header_values["case_number"], "CASE-1");
        assert_eq!(meta.md5.as_deref(), Some(crate::common::compute_hash(&data, crate::common::HashAlgorithm::Md5).as_str()));
        assert_eq!(meta.bytes_per_sector, 512);
    }

    #[test]
    fn test_multi_segment_uncompressed_spanning_read() {
        let dir = TempDir::new().unwrap();
        let data = pattern(512 * 4 * 7);
        let fixture = EwfFixture {
            compress: false,
            chunks_per_segment: 3,
            ..EwfFixture::default()
        };
        let paths = write_ewf_set(dir.path(), "disk", &data, &fixture);
        assert_eq!(paths.len(), 3);

        let mut handle = EwfHandle::open(paths, 2, 2).unwrap();
        // Crosses the segment 1 / segment 2 boundary (chunk 2 -> chunk 3)
        let start = 512 * 4 * 3 - 100;
        let mut buf = vec![0u8; 300];
        assert_eq!(handle.read_at(start as u64, &mut buf).unwrap(), 300);
        assert_eq!(buf, data[start..start + 300]);
        assert!(handle.metadata().sha1.is_some());
    }

    #[test]
    fn test_short_read_past_media_end() {
        let dir = TempDir::new().unwrap();
        let data = pattern(512 * 5);
        let paths = write_ewf_set(dir.path(), "disk", &data, &EwfFixture::default());

        let mut handle = EwfHandle::open(paths, 4, 8).unwrap();
        let mut buf = vec![0u8; 1024];
        assert_eq!(handle.read_at(512 * 5 - 10, &mut buf).unwrap(), 10);
        assert_eq!(handle.read_at(512 * 5, &mut buf).unwrap(), 0);
    }

    fn segment_header() -> Vec<u8> {
        let mut out = EWF_SIGNATURE.to_vec();
        out.push(1);
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    fn descriptor(out: &mut Vec<u8>, section_type: &str, next: u64, size: u64) {
        let mut name = [0u8; 16];
        name[..section_type.len()].copy_from_slice(section_type.as_bytes());
        out.extend_from_slice(&name);
        out.extend_from_slice(&next.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&[0u8; 44]);
    }

    #[test]
    fn test_oversized_table_section_is_container_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crafted.E01");
        let mut segment = segment_header();
        descriptor(&mut segment, "table", FILE_HEADER_SIZE, u64::MAX - 1);
        segment.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, &segment).unwrap();

        let err = EwfHandle::open(vec![path.clone()], 4, 8).unwrap_err();
        assert!(matches!(err, EvidenceError::Container(_)));
        assert!(err.to_string().contains("only 32 remain"), "{}", err);

        assert!(matches!(
            crate::container::EvidenceContainer::open(&path, Some(crate::container::ImageKind::Ewf)),
            Err(EvidenceError::Container(_))
        ));
    }

    #[test]
    fn test_section_chain_offset_overflow_stops_walk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.E01");
        let mut segment = segment_header();
        // An `error2` section pointing the chain at the end of the address space
        descriptor(&mut segment, "error2", u64::MAX - 10, 76);
        std::fs::write(&path, &segment).unwrap();

        let err = EwfHandle::open(vec![path], 4, 8).unwrap_err();
        assert!(err.to_string().contains("no volume section"), "{}", err);
    }

    #[test]
    fn test_unaddressable_geometry_is_container_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geometry.E01");
        let mut segment = segment_header();
        let mut volume = vec![0u8; 94];
        volume[8..12].copy_from_slice(&64u32.to_le_bytes());
        volume[12..16].copy_from_slice(&512u32.to_le_bytes());
        volume[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        let done_offset = segment.len() as u64 + 76 + volume.len() as u64;
        descriptor(&mut segment, "volume", done_offset, 76 + volume.len() as u64);
        segment.extend_from_slice(&volume);
        descriptor(&mut segment, "done", done_offset, 76);
        std::fs::write(&path, &segment).unwrap();

        let err = EwfHandle::open(vec![path], 4, 8).unwrap_err();
        assert!(matches!(err, EvidenceError::Container(_)));
        assert!(err.to_string().contains("64-bit"), "{}", err);
    }

    #[test]
    fn test_bad_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.E01");
        std::fs::write(&path, vec![0u8; 200]).unwrap();
        assert!(matches!(
            EwfHandle::open(vec![path], 4, 8),
            Err(EvidenceError::Container(_))
        ));
    }
}
