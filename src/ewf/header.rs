//! Acquisition header parsing (`header` and `header2` sections)
//!
//! Both sections hold zlib-compressed text: a category count, a category
//! name (`main`), a tab-separated key line and a tab-separated value line.
//! `header` is ASCII, `header2` is UTF-16LE with a byte-order mark.

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::ZlibDecoder;
use tracing::trace;

use crate::error::{EvidenceError, EvidenceResult};

/// Map the short header keys onto readable names
fn header_key_name(key: &str) -> &str {
    match key {
        "a" => "description",
        "c" => "case_number",
        "n" => "evidence_number",
        "e" => "examiner_name",
        "t" => "notes",
        "av" => "acquiry_software_version",
        "ov" => "acquiry_operating_system",
        "m" => "acquiry_date",
        "u" => "system_date",
        "p" => "password",
        "r" => "compression_level",
        "md" => "model",
        "sn" => "serial_number",
        "l" => "device_label",
        "pid" => "process_identifier",
        "dc" => "unknown_dc",
        "ext" => "extents",
        other => other,
    }
}

pub(crate) fn decompress(data: &[u8]) -> EvidenceResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EvidenceError::container(format!("Header decompression failed: {}", e)))?;
    Ok(out)
}

fn decode_text(data: &[u8], utf16: bool) -> String {
    if utf16 {
        let body = data.strip_prefix(&[0xff, 0xfe]).unwrap_or(data);
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(data).into_owned()
    }
}

/// Parse decompressed header text into named values.
///
/// Empty values are dropped.
pub(crate) fn parse_header_text(text: &str) -> BTreeMap<String, String> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut values = BTreeMap::new();

    let Some(main_idx) = lines.iter().position(|l| l.trim() == "main") else {
        return values;
    };
    let (Some(keys), Some(vals)) = (lines.get(main_idx + 1), lines.get(main_idx + 2)) else {
        return values;
    };

    for (key, value) in keys.split('\t').zip(vals.split('\t')) {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        trace!(key, value, "EWF header value");
        values.insert(header_key_name(key).to_string(), value.to_string());
    }
    values
}

/// Decompress and parse one header section's data
pub(crate) fn parse_header_section(data: &[u8], utf16: bool) -> EvidenceResult<BTreeMap<String, String>> {
    let raw = decompress(data)?;
    Ok(parse_header_text(&decode_text(&raw, utf16)))
}
