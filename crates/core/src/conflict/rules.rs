//! Declarative conflict-resolution rules.
//!
//! A rule document maps a repository path to hints for resolving conflicts
//! in that file. The only hint today is `ignore_lines`: regular expressions
//! selecting line ranges of the integration side that are always replaced by
//! the incoming side (generated or environment-specific lines).
//!
//! ```toml
//! [VERSION]
//! ignore_lines = ["^version=.*"]
//!
//! ["config/settings.js"]
//! ignore_lines = ["^  buildId: .*$"]
//! ```
//!
//! Documents with a `.json` extension are parsed as JSON instead.

use std::collections::BTreeMap;
use std::path::Path;

use regex_lite::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::RulesError;

/// On-disk shape of a single rule.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawRule {
    #[serde(default, alias = "ignoreLines")]
    ignore_lines: Vec<String>,
}

/// Resolution hints for one file.
#[derive(Debug, Clone)]
pub struct ConflictRule {
    pub target_file: String,
    /// Compiled in multi-line mode, in document order.
    pub ignore_lines: Vec<Regex>,
}

impl ConflictRule {
    /// Compile a rule from pattern text.
    pub fn new(target_file: impl Into<String>, patterns: &[&str]) -> Result<Self, RulesError> {
        let target_file = target_file.into();
        let ignore_lines = patterns
            .iter()
            .map(|p| compile_pattern(&target_file, p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            target_file,
            ignore_lines,
        })
    }

    pub fn has_ignore_lines(&self) -> bool {
        !self.ignore_lines.is_empty()
    }
}

/// `^` and `$` match at line boundaries; `.` never crosses a newline.
fn compile_pattern(file: &str, pattern: &str) -> Result<Regex, RulesError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| RulesError::InvalidPattern {
            file: file.to_string(),
            pattern: pattern.to_string(),
            detail: e.to_string(),
        })
}

/// All rules of one integration session, keyed by exact path.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, ConflictRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a rule document; the format is chosen by file extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RulesError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading conflict rules");
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let raw: BTreeMap<String, RawRule> = if is_json {
            serde_json::from_str(&contents).map_err(|e| RulesError::ParseError {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?
        } else {
            toml::from_str(&contents).map_err(|e| RulesError::ParseError {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?
        };

        let set = Self::from_raw(raw)?;
        debug!(count = set.len(), "conflict rules loaded");
        Ok(set)
    }

    /// Parse a TOML rule document.
    pub fn from_toml(contents: &str) -> Result<Self, RulesError> {
        let raw: BTreeMap<String, RawRule> =
            toml::from_str(contents).map_err(|e| RulesError::ParseError {
                path: "<inline>".into(),
                detail: e.to_string(),
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, RawRule>) -> Result<Self, RulesError> {
        let mut rules = BTreeMap::new();
        for (file, rule) in raw {
            let patterns: Vec<&str> = rule.ignore_lines.iter().map(String::as_str).collect();
            let compiled = ConflictRule::new(file.clone(), &patterns)?;
            rules.insert(file, compiled);
        }
        Ok(Self { rules })
    }

    pub fn get(&self, file: &str) -> Option<&ConflictRule> {
        self.rules.get(file)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
