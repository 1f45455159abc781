// Byte-slice field readers for on-disk structures
//
// Partition tables and EWF sections are read into buffers first and decoded
// from there. Out-of-range fields read as zero; every caller validates the
// buffer length before decoding.

fn field<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(src) = buf.get(offset..offset + N) {
        out.copy_from_slice(src);
    }
    out
}

// =============================================================================
// Little-endian
// =============================================================================

pub fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(field(buf, offset))
}

pub fn u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(field(buf, offset))
}

pub fn u64_le(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(field(buf, offset))
}

// =============================================================================
// Big-endian (Apple Partition Map, Sun VTOC)
// =============================================================================

pub fn u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(field(buf, offset))
}

pub fn u32_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(field(buf, offset))
}

// =============================================================================
// Strings
// =============================================================================

/// Decode a fixed-width, NUL-padded ASCII field
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Decode a NUL-terminated UTF-16LE field (GPT partition names)
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
