//! evidence-walk: forensic triage over disk images
//!
//! Layers, bottom up:
//! - [`container`]: raw (single or split) and EWF images as one flat byte space
//! - [`volume`]: DOS, GPT, Apple and Sun partition tables
//! - [`filesystem`]: pluggable filesystem drivers (NTFS by default)
//! - [`walker`]: cycle-safe depth-first directory traversal
//! - [`content`]: streaming reads, hashing and extraction of file content
//! - [`evidence`]: the driver tying the layers together
//!
//! ```no_run
//! use evidence_walk::evidence::{Evidence, EvidenceOptions};
//! use evidence_walk::walker::MatchLogic;
//!
//! let evidence = Evidence::open("disk.E01", &EvidenceOptions::default())?;
//! let report = evidence.recurse_files("SYSTEM", "/Windows/System32/config", MatchLogic::Equal, false)?;
//! for found in &report.matches {
//!     println!("PARTITION {} {}", found.partition, found.path);
//! }
//! println!("{} entries could not be read", report.stats.entries_skipped);
//! # Ok::<(), evidence_walk::error::EvidenceError>(())
//! ```

pub mod common;
pub mod container;
pub mod content;
pub mod error;
pub mod evidence;
pub mod ewf;
pub mod filesystem;
pub mod logging;
pub mod raw;
pub mod report;
pub mod volume;
pub mod walker;

pub use container::{EvidenceContainer, ImageKind};
pub use error::{EvidenceError, EvidenceResult};
pub use evidence::{Evidence, EvidenceOptions};
