//! Lexicon resource
//!
//! Read-only mapping from surface forms to semantic or normalization tags.
//! Loaded once per process and shared as `Arc<Lexicon>` by every feature
//! pipeline that needs it.

use std::collections::HashMap;
use std::path::Path;

use crate::{MedError, Result};

/// Surface form -> tags terminology mapping
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    /// Normalized surface form -> tags (sorted, deduplicated)
    entries: HashMap<String, Vec<String>>,
    /// Longest entry, in whitespace-separated words
    max_phrase_words: usize,
}

impl Lexicon {
    /// Create an empty lexicon
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lexicon from (surface form, tag) pairs
    pub fn from_entries<I, S, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: Into<String>,
    {
        let mut lexicon = Self::new();
        for (surface, tag) in entries {
            lexicon.insert(surface.as_ref(), tag.into());
        }
        lexicon
    }

    /// Load a tab-separated lexicon file.
    ///
    /// Each non-empty line is `surface<TAB>tag[,tag...]`; lines starting with
    /// `#` are comments.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MedError::io(path, e))?;
        let lexicon = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            entries = lexicon.len(),
            "lexicon loaded"
        );
        Ok(lexicon)
    }

    /// Parse lexicon content in the TSV layout accepted by [`Lexicon::load`]
    pub fn parse(content: &str) -> Result<Self> {
        let mut lexicon = Self::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (surface, tags) = line.split_once('\t').ok_or_else(|| {
                MedError::MalformedAnnotation {
                    record: line.to_string(),
                    line: idx + 1,
                    reason: "expected surface<TAB>tags".to_string(),
                }
            })?;
            for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                lexicon.insert(surface, tag.to_string());
            }
        }
        Ok(lexicon)
    }

    fn insert(&mut self, surface: &str, tag: String) {
        let key = normalize(surface);
        if key.is_empty() {
            return;
        }
        let words = key.split(' ').count();
        self.max_phrase_words = self.max_phrase_words.max(words);

        let tags = self.entries.entry(key).or_default();
        if let Err(pos) = tags.binary_search(&tag) {
            tags.insert(pos, tag);
        }
    }

    /// Tags for a surface form (case and whitespace insensitive)
    pub fn lookup(&self, surface: &str) -> Option<&[String]> {
        self.entries.get(&normalize(surface)).map(|v| v.as_slice())
    }

    /// Tags for a phrase given as separate words
    pub fn lookup_words<S: AsRef<str>>(&self, words: &[S]) -> Option<&[String]> {
        let phrase = words
            .iter()
            .map(|w| w.as_ref().to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        self.entries.get(&phrase).map(|v| v.as_slice())
    }

    pub fn contains(&self, surface: &str) -> bool {
        self.lookup(surface).is_some()
    }

    /// Length in words of the longest entry
    pub fn max_phrase_words(&self) -> usize {
        self.max_phrase_words
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(surface: &str) -> String {
    surface
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let lexicon = Lexicon::from_entries([("Aspirin", "DRUG"), ("aspirin", "NSAID")]);
        assert_eq!(
            lexicon.lookup("ASPIRIN"),
            Some(&["DRUG".to_string(), "NSAID".to_string()][..])
        );
        assert!(lexicon.lookup("ibuprofen").is_none());
    }

    #[test]
    fn test_multi_word_entries() {
        let lexicon = Lexicon::from_entries([("heart  attack", "DISORDER"), ("mg", "UNIT")]);
        assert_eq!(lexicon.max_phrase_words(), 2);
        assert!(lexicon.lookup_words(&["Heart", "attack"]).is_some());
        assert!(lexicon.contains("heart attack"));
    }

    #[test]
    fn test_load_tsv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# clinical abbreviations").unwrap();
        writeln!(file, "bid\tFREQUENCY").unwrap();
        writeln!(file, "po\tROUTE, ABBREVIATION").unwrap();
        writeln!(file).unwrap();

        let lexicon = Lexicon::load(file.path()).unwrap();
        assert_eq!(lexicon.len(), 2);
        assert_eq!(lexicon.lookup("PO").unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_line() {
        let err = Lexicon::parse("aspirin DRUG").unwrap_err();
        assert!(matches!(err, MedError::MalformedAnnotation { line: 1, .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Lexicon::load("/nonexistent/lexicon.tsv").unwrap_err();
        assert!(matches!(err, MedError::Io { .. }));
    }
}
