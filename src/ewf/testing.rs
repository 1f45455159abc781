//! Synthetic EWF segment sets for tests

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::common::{compute_hash, HashAlgorithm};

use super::types::EWF_SIGNATURE;

pub(crate) struct EwfFixture {
    pub sectors_per_chunk: u32,
    pub compress: bool,
    pub chunks_per_segment: usize,
    pub case_number: &'static str,
}

impl Default for EwfFixture {
    fn default() -> Self {
        Self {
            sectors_per_chunk: 4,
            compress: true,
            chunks_per_segment: 64,
            case_number: "CASE-1",
        }
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn push_section(out: &mut Vec<u8>, section_type: &str, data: &[u8], terminal: bool) {
    let offset = out.len() as u64;
    let size = 76 + data.len() as u64;
    let next = if terminal { offset } else { offset + size };

    let mut name = [0u8; 16];
    name[..section_type.len()].copy_from_slice(section_type.as_bytes());
    out.extend_from_slice(&name);
    out.extend_from_slice(&next.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&[0u8; 44]);
    out.extend_from_slice(data);
}

/// Write `data` as an EWF v1 segment set `<base>.E01, .E02, ...` in `dir`
pub(crate) fn write_ewf_set(dir: &Path, base: &str, data: &[u8], fixture: &EwfFixture) -> Vec<PathBuf> {
    assert_eq!(data.len() % 512, 0, "media must be whole sectors");
    let chunk_size = fixture.sectors_per_chunk as usize * 512;
    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
    let mut groups: Vec<&[&[u8]]> = chunks.chunks(fixture.chunks_per_segment).collect();
    if groups.is_empty() {
        groups.push(&[]);
    }

    let md5 = hex::decode(compute_hash(data, HashAlgorithm::Md5)).unwrap();
    let sha1 = hex::decode(compute_hash(data, HashAlgorithm::Sha1)).unwrap();
    let mut paths = Vec::new();

    for (i, group) in groups.iter().enumerate() {
        let mut out = Vec::new();
        out.extend_from_slice(EWF_SIGNATURE);
        out.push(1);
        out.extend_from_slice(&((i + 1) as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        if i == 0 {
            let header = format!(
                "1\nmain\nc\tn\ta\te\tt\tm\n{}\tEV-1\tTest disk\tExaminer\tnone\t2017 3 1 12 0 0\n\n",
                fixture.case_number
            );
            push_section(&mut out, "header", &zlib(header.as_bytes()), false);

            let mut volume = vec![0u8; 94];
            volume[4..8].copy_from_slice(&(chunks.len() as u32).to_le_bytes());
            volume[8..12].copy_from_slice(&fixture.sectors_per_chunk.to_le_bytes());
            volume[12..16].copy_from_slice(&512u32.to_le_bytes());
            volume[16..24].copy_from_slice(&(data.len() as u64 / 512).to_le_bytes());
            push_section(&mut out, "volume", &volume, false);
        }

        let base_offset = out.len() as u64 + 76;
        let mut sectors = Vec::new();
        let mut entries = Vec::new();
        for chunk in group.iter() {
            let relative = sectors.len() as u32;
            if fixture.compress {
                entries.push(relative | 0x8000_0000);
                sectors.extend(zlib(chunk));
            } else {
                entries.push(relative);
                sectors.extend_from_slice(chunk);
                sectors.extend_from_slice(&[0u8; 4]);
            }
        }
        push_section(&mut out, "sectors", &sectors, false);

        let mut table = Vec::new();
        table.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        table.extend_from_slice(&[0u8; 4]);
        table.extend_from_slice(&base_offset.to_le_bytes());
        table.extend_from_slice(&[0u8; 8]);
        for entry in &entries {
            table.extend_from_slice(&entry.to_le_bytes());
        }
        table.extend_from_slice(&[0u8; 4]);
        push_section(&mut out, "table", &table, false);
        push_section(&mut out, "table2", &table, false);

        if i + 1 == groups.len() {
            let mut digest = md5.clone();
            digest.extend_from_slice(&sha1);
            digest.extend_from_slice(&[0u8; 44]);
            push_section(&mut out, "digest", &digest, false);
            let mut hash = md5.clone();
            hash.extend_from_slice(&[0u8; 20]);
            push_section(&mut out, "hash", &hash, false);
            push_section(&mut out, "done", &[], true);
        } else {
            push_section(&mut out, "next", &[], true);
        }

        let path = dir.join(format!("{}.E{:02}", base, i + 1));
        std::fs::write(&path, &out).unwrap();
        paths.push(path);
    }
    paths
}
