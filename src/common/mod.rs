// Utilities shared by the container readers, partition parsers and scanners

pub mod audit;
pub mod binary;
pub mod hash;
pub mod io_pool;
pub mod path_security;
pub mod segments;

pub use hash::{compute_hash, HashAlgorithm, StreamingHasher};
pub use io_pool::{FileIoPool, DEFAULT_MAX_OPEN_FILES};
pub use segments::{discover_ewf_segments, discover_numbered_segments};

/// Read size used when streaming file content (hashing, extraction)
pub const BUFFER_SIZE: usize = 1024 * 1024;
