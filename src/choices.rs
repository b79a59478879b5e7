//! Remembered rejections from interactive runs.
//!
//! `search` and `snowball` ask about every unknown candidate. Rejections are
//! written to JSON files right away so that an interrupted run can be resumed
//! without answering the same questions again.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Load a choice file; a missing or unreadable file yields the default.
fn load<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        debug!("Choice file not found: {:?}", path);
        return T::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => {
                info!("Loaded previous choices from {:?} (reset with --reset-choices)", path);
                value
            }
            Err(e) => {
                warn!("Failed to parse choices in {:?}: {}", path, e);
                T::default()
            }
        },
        Err(e) => {
            warn!("Failed to read choice file {:?}: {}", path, e);
            T::default()
        }
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn reset(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
        info!("Cleared choices at {:?}", path);
    }
    Ok(())
}

/// Rejected DBLP cite keys, per normalized search query
#[derive(Debug)]
pub struct DblpChoices {
    path: PathBuf,
    rejected: BTreeMap<String, BTreeSet<String>>,
}

impl DblpChoices {
    /// Open the choice file, deleting it first when `reset_choices` is set.
    pub fn open(path: impl Into<PathBuf>, reset_choices: bool) -> Result<Self> {
        let path = path.into();
        if reset_choices {
            reset(&path)?;
        }
        let rejected = load(&path);
        Ok(Self { path, rejected })
    }

    pub fn is_rejected(&self, query: &str, cite_key: &str) -> bool {
        self.rejected
            .get(query)
            .is_some_and(|keys| keys.contains(cite_key))
    }

    /// Remember a rejection and persist it.
    pub fn reject(&mut self, query: &str, cite_key: &str) -> Result<()> {
        self.rejected
            .entry(query.to_string())
            .or_default()
            .insert(cite_key.to_string());
        save(&self.path, &self.rejected)
    }
}

/// Rejected Semantic Scholar entries, by [`crate::semanticscholar::PaperRef::identifier`]
#[derive(Debug)]
pub struct SemanticScholarChoices {
    path: PathBuf,
    rejected: BTreeSet<String>,
}

impl SemanticScholarChoices {
    pub fn open(path: impl Into<PathBuf>, reset_choices: bool) -> Result<Self> {
        let path = path.into();
        if reset_choices {
            reset(&path)?;
        }
        let rejected = load(&path);
        Ok(Self { path, rejected })
    }

    pub fn is_rejected(&self, identifier: &str) -> bool {
        self.rejected.contains(identifier)
    }

    pub fn reject(&mut self, identifier: &str) -> Result<()> {
        self.rejected.insert(identifier.to_string());
        save(&self.path, &self.rejected)
    }

    pub fn len(&self) -> usize {
        self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dblp_choices_persist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".choices.dblp.json");

        let mut choices = DblpChoices::open(&path, false)?;
        assert!(!choices.is_rejected("crypto*", "DBLP:a/b"));
        choices.reject("crypto*", "DBLP:a/b")?;

        let reopened = DblpChoices::open(&path, false)?;
        assert!(reopened.is_rejected("crypto*", "DBLP:a/b"));
        assert!(!reopened.is_rejected("other", "DBLP:a/b"));

        let reset = DblpChoices::open(&path, true)?;
        assert!(!reset.is_rejected("crypto*", "DBLP:a/b"));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_semanticscholar_choices_persist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".choices.semanticscholar.json");

        let mut choices = SemanticScholarChoices::open(&path, false)?;
        assert!(choices.is_empty());
        choices.reject("abc")?;
        choices.reject("abc")?;
        assert_eq!(choices.len(), 1);

        let reopened = SemanticScholarChoices::open(&path, false)?;
        assert!(reopened.is_rejected("abc"));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_starts_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".choices.semanticscholar.json");
        std::fs::write(&path, "not json")?;
        let choices = SemanticScholarChoices::open(&path, false)?;
        assert!(choices.is_empty());
        Ok(())
    }
}
