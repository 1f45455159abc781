//! EWF (Expert Witness Format, .E01) image reader
//!
//! - `types` - format constants, section and metadata structures
//! - `header` - acquisition header (`header`/`header2`) decoding
//! - `cache` - LRU cache of decompressed chunks
//! - `handle` - segment walk, chunk table and random-access reads

mod cache;
mod handle;
mod header;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::EwfHandle;
pub use types::{EwfMetadata, VolumeSection, DEFAULT_CHUNK_CACHE_ENTRIES, EWF_SIGNATURE};

/// True if the buffer starts with the EWF v1 signature
pub fn has_ewf_signature(header: &[u8]) -> bool {
    header.len() >= EWF_SIGNATURE.len() && &header[..EWF_SIGNATURE.len()] == EWF_SIGNATURE
}
