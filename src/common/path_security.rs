//! Path Security Utilities
//!
//! Names inside evidence are attacker-controlled. Everything extracted to the
//! examiner's disk goes through these helpers so that an entry called
//! `..\..\Windows` cannot escape the output directory.

use std::path::{Path, PathBuf};

/// Sanitize a single file name.
///
/// Removes or replaces:
/// - Path separators
/// - Null bytes and control characters
/// - Windows reserved characters
///
/// Returns `_` if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());

    for c in filename.chars() {
        match c {
            '\0'..='\x1f' | '\x7f' => continue,
            '/' | '\\' => sanitized.push('_'),
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => continue,
            _ => sanitized.push(c),
        }
    }

    // Leading/trailing dots and spaces are trouble on Windows and "." / ".."
    // must never survive.
    let trimmed = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map an in-evidence directory path like `/Windows/System32` onto a relative
/// host path, sanitizing every component.
///
/// Empty components and `.`/`..` are dropped.
pub fn sanitize_relative_path(evidence_path: &str) -> PathBuf {
    evidence_path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .map(sanitize_filename)
        .collect()
}

/// True if the path has no parent-directory components or NUL bytes
pub fn is_safe_path(path: &Path) -> bool {
    use std::path::Component;

    path.components().all(|component| match component {
        Component::ParentDir => false,
        Component::Normal(s) => !s.to_string_lossy().contains('\0'),
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.docx"), "report.docx");
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_filename("what?<>.txt"), "what.txt");
        assert_eq!(sanitize_filename(".."), "_");
        assert_eq!(sanitize_filename("  .hidden. "), "hidden");
        assert_eq!(sanitize_filename("nul\0byte"), "nulbyte");
    }

    #[test]
    fn test_sanitize_relative_path() {
        let path = sanitize_relative_path("/Windows/../System32/./config");
        assert_eq!(path, PathBuf::from("Windows").join("System32").join("config"));
        assert!(is_safe_path(&path));
        assert_eq!(sanitize_relative_path("/"), PathBuf::new());
    }

    #[test]
    fn test_is_safe_path() {
        assert!(!is_safe_path(Path::new("a/../b")));
        assert!(is_safe_path(Path::new("a/b/c.txt")));
    }
}
