//! Forensic Audit Logging
//!
//! Chain-of-custody events on the `forensic_audit` target. Each event carries
//! an RFC 3339 timestamp so the log can be filed with the case notes.

use std::path::Path;
use tracing::{info, span, warn, Level};

/// Log evidence container opened
pub fn log_container_opened(path: &Path, container_type: &str, segments: usize, size: u64) {
    let _span = span!(
        Level::INFO,
        "evidence_access",
        operation = "container_open",
        path = %path.display(),
    )
    .entered();

    info!(
        target: "forensic_audit",
        operation = "container_open",
        path = %path.display(),
        container_type = container_type,
        segments = segments,
        size = size,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Evidence container opened"
    );
}

/// Log a partition or volume that could not be mounted
pub fn log_volume_skipped(volume: usize, offset: u64, reason: &str) {
    warn!(
        target: "forensic_audit",
        operation = "volume_skipped",
        volume = volume,
        offset = offset,
        reason = reason,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Volume skipped"
    );
}

/// Log a file whose digest appears in the investigator's hash list
pub fn log_hash_match(evidence_path: &str, volume: usize, algorithm: &str, digest: &str) {
    info!(
        target: "forensic_audit",
        operation = "hash_match",
        path = evidence_path,
        volume = volume,
        algorithm = algorithm,
        digest = digest,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Hash list match"
    );
}

/// Log a file copied out of the evidence
pub fn log_data_export(evidence_path: &str, destination: &Path, bytes_exported: u64) {
    info!(
        target: "forensic_audit",
        operation = "data_export",
        source = evidence_path,
        destination = %destination.display(),
        bytes_exported = bytes_exported,
        timestamp = %chrono::Utc::now().to_rfc3339(),
        "Evidence data exported"
    );
}
