// Segment discovery for multi-file evidence
//
// Handles:
// - Numbered raw segments: .001, .002, .003, ...
// - EWF segments: .E01 ... .E99, then .EAA ... .EZZ, .FAA ...
//
// Siblings are found by scanning the parent directory, so the caller can
// pass any member of a raw split set, or the primary EWF segment, in any
// letter case.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::error::{EvidenceError, EvidenceResult};

fn file_name_of(path: &Path) -> EvidenceResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EvidenceError::container(format!("Invalid evidence path: {}", path.display())))
}

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Directory entries whose file name matches `pattern`, with the first
/// capture group as the sort key
fn scan_siblings(dir: &Path, pattern: &Regex) -> EvidenceResult<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        EvidenceError::container(format!("Cannot list {}: {}", dir.display(), e))
    })?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(caps) = pattern.captures(&name) {
            if let Some(key) = caps.get(1) {
                trace!(segment = %name, "Found segment");
                found.push((key.as_str().to_uppercase(), entry.path()));
            }
        }
    }
    Ok(found)
}

// =============================================================================
// Numbered Segment Discovery (.001, .002, etc.)
// =============================================================================

/// True when the file name ends in a purely numeric extension of 3+ digits
pub fn is_numbered_segment(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.len() >= 3 && ext.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Discover the full raw split set from any one member
///
/// A path without a numeric extension is a monolithic image and is returned
/// on its own. Segments are ordered by segment number.
pub fn discover_numbered_segments(path: &Path) -> EvidenceResult<Vec<PathBuf>> {
    let filename = file_name_of(path)?;
    if !path.is_file() {
        return Err(EvidenceError::container(format!(
            "Evidence file not found: {}",
            path.display()
        )));
    }

    let base = match filename.rsplit_once('.') {
        Some((base, _)) if is_numbered_segment(&filename) => base.to_string(),
        _ => {
            debug!(path = %path.display(), "Single raw image (non-segmented)");
            return Ok(vec![path.to_path_buf()]);
        }
    };

    let pattern = Regex::new(&format!(r"(?i)^{}\.(\d{{3,}})$", regex::escape(&base)))
        .map_err(|e| EvidenceError::container(format!("Bad segment pattern: {}", e)))?;
    let mut found = scan_siblings(parent_of(path), &pattern)?;
    found.sort_by_key(|(num, _)| num.parse::<u64>().unwrap_or(u64::MAX));

    for (expected, (num, _)) in (1u64..).zip(found.iter()) {
        if num.parse::<u64>().ok() != Some(expected) {
            warn!(base = %base, expected, found = %num, "Gap in numbered segment set");
            break;
        }
    }

    debug!(base = %base, segment_count = found.len(), "Numbered segments discovered");
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

// =============================================================================
// EWF Segment Discovery (.E01, .E02, ...)
// =============================================================================

/// Discover the EWF segment set belonging to a primary segment path
///
/// Extensions are compared upper-cased and sorted lexicographically, which
/// puts .E01-.E99 before .EAA and .EZZ before .FAA.
pub fn discover_ewf_segments(path: &Path) -> EvidenceResult<Vec<PathBuf>> {
    let filename = file_name_of(path)?;
    if !path.is_file() {
        return Err(EvidenceError::container(format!(
            "Evidence file not found: {}",
            path.display()
        )));
    }

    let base = match filename.rsplit_once('.') {
        Some((base, ext)) if ext.len() == 3 => base.to_string(),
        _ => return Ok(vec![path.to_path_buf()]),
    };

    let pattern = Regex::new(&format!(r"(?i)^{}\.([e-z][0-9a-z]{{2}})$", regex::escape(&base)))
        .map_err(|e| EvidenceError::container(format!("Bad segment pattern: {}", e)))?;
    let mut found = scan_siblings(parent_of(path), &pattern)?;
    found.sort_by(|a, b| a.0.cmp(&b.0));

    if found.is_empty() {
        return Ok(vec![path.to_path_buf()]);
    }

    debug!(base = %base, segment_count = found.len(), "EWF segments discovered");
    Ok(found.into_iter().map(|(_, p)| p).collect())
}
