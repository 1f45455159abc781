// Known-file hash lists: one hex digest per line

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::common::hash::{guess_algorithm_from_hash, is_valid_hash};
use crate::common::HashAlgorithm;
use crate::error::{EvidenceError, EvidenceResult};

/// Set of digests of a single algorithm.
///
/// The algorithm is inferred from the first line that looks like a digest
/// unless one is given up front (64 hex digits could be SHA-256 or BLAKE3).
/// Lines that are not digests of that algorithm are skipped. A line may
/// carry trailing text after the digest (`md5sum` output), and `#` starts a
/// comment line.
#[derive(Clone, Debug)]
pub struct HashList {
    algorithm: HashAlgorithm,
    digests: HashSet<String>,
    skipped_lines: usize,
}

impl HashList {
    pub fn load(path: &Path, algorithm: Option<HashAlgorithm>) -> EvidenceResult<Self> {
        let text = fs::read_to_string(path)?;
        let list = Self::parse_as(&text, algorithm).map_err(|e| match e {
            EvidenceError::InvalidArgument(reason) => {
                EvidenceError::InvalidArgument(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;
        debug!(
            path = %path.display(),
            algorithm = %list.algorithm,
            digests = list.len(),
            "Hash list loaded"
        );
        Ok(list)
    }

    pub fn parse(text: &str) -> EvidenceResult<Self> {
        Self::parse_as(text, None)
    }

    pub fn parse_as(text: &str, forced: Option<HashAlgorithm>) -> EvidenceResult<Self> {
        let mut detected = forced;
        let mut digests = HashSet::new();
        let mut skipped_lines = 0;

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };
            let digest = token.to_lowercase();
            let algorithm = match detected {
                Some(algorithm) => algorithm,
                None => match guess_algorithm_from_hash(&digest) {
                    Some(guessed) => *detected.insert(guessed),
                    None => {
                        skipped_lines += 1;
                        continue;
                    }
                },
            };
            if is_valid_hash(&digest, algorithm) {
                digests.insert(digest);
            } else {
                skipped_lines += 1;
            }
        }

        let Some(algorithm) = detected.filter(|_| !digests.is_empty()) else {
            return Err(EvidenceError::InvalidArgument(
                match forced {
                    Some(forced) => format!("no valid {} digests found in hash list", forced),
                    None => "no valid MD5, SHA-1 or SHA-256 digests found in hash list".to_string(),
                },
            ));
        };
        if skipped_lines > 0 {
            warn!(skipped_lines, algorithm = %algorithm, "Hash list lines skipped");
        }
        Ok(Self {
            algorithm,
            digests,
            skipped_lines,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Lines that were not usable digests of the list's algorithm
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.digests.contains(&digest.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MD5_ABC: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn test_algorithm_inferred_from_first_digest() {
        let text = format!(
            "# known bad\n\n{}  abc.txt\nA9993E364706816ABA3E25717850C26C9CD0D89D\nnot-a-hash\n",
            MD5_ABC.to_uppercase()
        );
        let list = HashList::parse(&text).unwrap();
        assert_eq!(list.algorithm(), HashAlgorithm::Md5);
        assert_eq!(list.len(), 1);
        assert_eq!(list.skipped_lines(), 2);
        assert!(list.contains(MD5_ABC));
        assert!(list.contains(&MD5_ABC.to_uppercase()));
    }

    #[test]
    fn test_sha1_list() {
        let list = HashList::parse("a9993e364706816aba3e25717850c26c9cd0d89d\n").unwrap();
        assert_eq!(list.algorithm(), HashAlgorithm::Sha1);
    }

    #[test]
    fn test_explicit_algorithm() {
        let blake3 = crate::common::compute_hash(b"abc", HashAlgorithm::Blake3);
        let text = format!("{}\n{}\n", blake3, MD5_ABC);
        let list = HashList::parse_as(&text, Some(HashAlgorithm::Blake3)).unwrap();
        assert_eq!(list.algorithm(), HashAlgorithm::Blake3);
        assert!(list.contains(&blake3));
        assert_eq!(list.skipped_lines(), 1);

        assert!(HashList::parse_as(MD5_ABC, Some(HashAlgorithm::Sha512)).is_err());
    }

    #[test]
    fn test_empty_list_is_rejected() {
        assert!(matches!(
            HashList::parse("# nothing\nxyz\n"),
            Err(EvidenceError::InvalidArgument(_))
        ));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashes.txt");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(HashList::load(&path, None), Err(EvidenceError::InvalidArgument(_))));
        assert!(matches!(
            HashList::load(&dir.path().join("missing.txt"), None),
            Err(EvidenceError::Io(_))
        ));
    }
}
