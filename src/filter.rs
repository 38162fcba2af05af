//! Candidate file selection for a resource group directory

use crate::error::SyncError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filter rules of a resource group
///
/// A file name is a candidate when every supplied predicate holds; absent
/// predicates always hold.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct FilterRule {
    /// Only these exact names are candidates, when present
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,

    /// These exact names are never candidates
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Regex the name has to match from its first character
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Compiled form of a [`FilterRule`]
#[derive(Debug, Clone)]
pub struct FileFilter {
    whitelist: Option<HashSet<String>>,
    blacklist: HashSet<String>,
    pattern: Option<Regex>,
}

impl FileFilter {
    pub fn new(rule: &FilterRule) -> Result<Self, SyncError> {
        let pattern = rule
            .pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
                    SyncError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    }
                })
            })
            .transpose()?;

        Ok(Self {
            whitelist: rule
                .whitelist
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            blacklist: rule.blacklist.iter().cloned().collect(),
            pattern,
        })
    }

    /// Check a bare file name against all predicates
    pub fn matches(&self, name: &str) -> bool {
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(name) {
                return false;
            }
        }

        if self.blacklist.contains(name) {
            return false;
        }

        self.pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(name))
    }

    /// Lazily list regular files directly inside `dir` that pass the filter.
    ///
    /// Sub-directories and symlinks are never candidates. Order follows the
    /// directory enumeration.
    pub fn candidates<'a>(
        &'a self,
        dir: &Path,
    ) -> Result<impl Iterator<Item = PathBuf> + 'a, SyncError> {
        let entries = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir, e))?;

        Ok(entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable directory entry: {}", e);
                    return None;
                }
            };

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                return None;
            }

            let name = entry.file_name();
            let name = name.to_str()?;
            if self.matches(name) {
                Some(entry.path())
            } else {
                debug!("Filtered out {}", name);
                None
            }
        }))
    }
}
