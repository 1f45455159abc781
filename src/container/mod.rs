//! Evidence containers
//!
//! An [`EvidenceContainer`] presents a raw image, a numbered split set or an
//! EWF segment set as one addressable byte range. The backing reader is
//! chosen once at open time and held behind a mutex, so a container can be
//! shared through `Arc` by every filesystem mounted on it.

mod reader;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::common::{audit, discover_ewf_segments, discover_numbered_segments, DEFAULT_MAX_OPEN_FILES};
use crate::error::{EvidenceError, EvidenceResult};
use crate::ewf::{self, EwfHandle, EwfMetadata};
use crate::raw::{RawHandle, RawInfo};

pub use reader::VolumeReader;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

// =============================================================================
// Image Kind
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Raw,
    Ewf,
}

impl ImageKind {
    /// Sniff the image kind from the first bytes of a file
    pub fn detect(path: &Path) -> EvidenceResult<Self> {
        let mut file = File::open(path).map_err(|e| {
            EvidenceError::container(format!("Cannot open {}: {}", path.display(), e))
        })?;
        let mut header = [0u8; 8];
        let n = file.read(&mut header).map_err(|e| {
            EvidenceError::container(format!("Cannot read {}: {}", path.display(), e))
        })?;

        if ewf::has_ewf_signature(&header[..n]) {
            Ok(ImageKind::Ewf)
        } else {
            Ok(ImageKind::Raw)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageKind::Raw => "raw",
            ImageKind::Ewf => "ewf",
        }
    }
}

impl FromStr for ImageKind {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "dd" => Ok(ImageKind::Raw),
            "ewf" | "e01" => Ok(ImageKind::Ewf),
            other => Err(EvidenceError::InvalidArgument(format!(
                "Unknown image type '{}' (expected raw or ewf)",
                other
            ))),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Container
// =============================================================================

/// Tuning knobs for container readers
#[derive(Clone, Debug)]
pub struct ContainerOptions {
    /// Segment file handles kept open at once
    pub max_open_files: usize,
    /// Decompressed EWF chunks kept in memory
    pub chunk_cache_entries: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            chunk_cache_entries: ewf::DEFAULT_CHUNK_CACHE_ENTRIES,
        }
    }
}

enum ImageBackend {
    Raw(RawHandle),
    Ewf(EwfHandle),
}

/// Summary of an opened container, for reports
#[derive(Clone, Debug, Serialize)]
pub struct ContainerInfo {
    pub path: String,
    pub kind: ImageKind,
    pub size: u64,
    pub sector_size: u32,
    pub segments: Vec<String>,
    /// Per-segment sizes, for raw images
    pub raw: Option<RawInfo>,
    pub ewf: Option<EwfMetadata>,
}

pub struct EvidenceContainer {
    kind: ImageKind,
    path: PathBuf,
    segment_paths: Vec<PathBuf>,
    size: u64,
    sector_size: u32,
    ewf_metadata: Option<EwfMetadata>,
    backend: Mutex<ImageBackend>,
}

impl fmt::Debug for EvidenceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvidenceContainer")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("segments", &self.segment_paths.len())
            .field("size", &self.size)
            .finish()
    }
}

impl EvidenceContainer {
    /// Open evidence with default options. `None` sniffs the kind.
    pub fn open(path: impl AsRef<Path>, kind: Option<ImageKind>) -> EvidenceResult<Self> {
        Self::open_with(path, kind, &ContainerOptions::default())
    }

    #[instrument(skip(path, options), fields(path = %path.as_ref().display()))]
    pub fn open_with(path: impl AsRef<Path>, kind: Option<ImageKind>, options: &ContainerOptions) -> EvidenceResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EvidenceError::container(format!(
                "Evidence file not found: {}",
                path.display()
            )));
        }

        let kind = match kind {
            Some(kind) => kind,
            None => ImageKind::detect(path)?,
        };
        debug!(%kind, "Opening evidence container");

        let (backend, segment_paths, size, sector_size, ewf_metadata) = match kind {
            ImageKind::Raw => {
                let segments = discover_numbered_segments(path)?;
                let handle = RawHandle::open(segments.clone(), options.max_open_files)?;
                let size = handle.total_size();
                (ImageBackend::Raw(handle), segments, size, DEFAULT_SECTOR_SIZE, None)
            }
            ImageKind::Ewf => {
                let segments = discover_ewf_segments(path)?;
                let handle = EwfHandle::open(
                    segments.clone(),
                    options.max_open_files,
                    options.chunk_cache_entries,
                )?;
                let size = handle.media_size();
                let sector_size = handle.bytes_per_sector();
                let metadata = handle.metadata().clone();
                (ImageBackend::Ewf(handle), segments, size, sector_size, Some(metadata))
            }
        };

        audit::log_container_opened(path, kind.name(), segment_paths.len(), size);

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            segment_paths,
            size,
            sector_size,
            ewf_metadata,
            backend: Mutex::new(backend),
        })
    }

    fn backend(&self) -> EvidenceResult<MutexGuard<'_, ImageBackend>> {
        self.backend
            .lock()
            .map_err(|_| EvidenceError::container("Container reader poisoned by an earlier panic"))
    }

    /// Fill `buf` from `offset`. Returns fewer bytes only at the end of the
    /// container, and 0 at or past it.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> EvidenceResult<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min((self.size - offset) as usize);
        let buf = &mut buf[..len];

        match &mut *self.backend()? {
            ImageBackend::Raw(handle) => handle.read_at(offset, buf),
            ImageBackend::Ewf(handle) => handle.read_at(offset, buf),
        }
    }

    /// Read up to `length` bytes at `offset`
    pub fn read(&self, offset: u64, length: usize) -> EvidenceResult<Vec<u8>> {
        let available = self.size.saturating_sub(offset).min(length as u64) as usize;
        let mut data = vec![0u8; available];
        let n = self.read_at(offset, &mut data)?;
        data.truncate(n);
        Ok(data)
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total addressable size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn segment_paths(&self) -> &[PathBuf] {
        &self.segment_paths
    }

    /// Acquisition metadata, for EWF images
    pub fn ewf_metadata(&self) -> Option<&EwfMetadata> {
        self.ewf_metadata.as_ref()
    }

    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            path: self.path.display().to_string(),
            kind: self.kind,
            size: self.size,
            sector_size: self.sector_size,
            segments: self
                .segment_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            raw: self.backend().ok().and_then(|backend| match &*backend {
                ImageBackend::Raw(handle) => Some(handle.info()),
                ImageBackend::Ewf(_) => None,
            }),
            ewf: self.ewf_metadata.clone(),
        }
    }

    /// Release every file handle
    pub fn close(self) {
        if let Ok(mut backend) = self.backend.into_inner() {
            match &mut backend {
                ImageBackend::Raw(handle) => handle.close(),
                ImageBackend::Ewf(handle) => handle.close(),
            }
        }
    }
}
