//! File name predicates used by the lookup and extraction walks

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::EvidenceError;
use crate::filesystem::DirectoryEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLogic {
    Contains,
    StartsWith,
    EndsWith,
    Equal,
}

impl MatchLogic {
    pub fn name(&self) -> &'static str {
        match self {
            MatchLogic::Contains => "contains",
            MatchLogic::StartsWith => "startswith",
            MatchLogic::EndsWith => "endswith",
            MatchLogic::Equal => "equal",
        }
    }
}

impl FromStr for MatchLogic {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contains" => Ok(MatchLogic::Contains),
            "startswith" => Ok(MatchLogic::StartsWith),
            "endswith" => Ok(MatchLogic::EndsWith),
            "equal" | "equals" => Ok(MatchLogic::Equal),
            other => Err(EvidenceError::InvalidArgument(format!(
                "Unknown match logic '{}' (expected contains, startswith, endswith or equal)",
                other
            ))),
        }
    }
}

impl fmt::Display for MatchLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compares file names against a fixed pattern
#[derive(Clone, Debug)]
pub struct NameMatcher {
    pattern: String,
    logic: MatchLogic,
    case_sensitive: bool,
}

impl NameMatcher {
    pub fn new(pattern: &str, logic: MatchLogic, case_sensitive: bool) -> Self {
        let pattern = if case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        };
        Self {
            pattern,
            logic,
            case_sensitive,
        }
    }

    pub fn logic(&self) -> MatchLogic {
        self.logic
    }

    pub fn matches(&self, name: &str) -> bool {
        let folded;
        let name = if self.case_sensitive {
            name
        } else {
            folded = name.to_lowercase();
            folded.as_str()
        };
        match self.logic {
            MatchLogic::Contains => name.contains(&self.pattern),
            MatchLogic::StartsWith => name.starts_with(&self.pattern),
            MatchLogic::EndsWith => name.ends_with(&self.pattern),
            MatchLogic::Equal => name == self.pattern,
        }
    }
}

/// Case-insensitive set of file extensions, without leading dots
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: BTreeSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    /// Parse a comma-delimited list such as `"txt,.DOC, pdf"`
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    /// Files without an extension never match
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        let ext = entry.extension();
        !ext.is_empty() && self.extensions.contains(&ext)
    }
}
