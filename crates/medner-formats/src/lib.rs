//! medner Formats - Annotation format converters
//!
//! Supports reading and writing:
//! - BRAT standoff (`.ann`)
//! - i2b2 concept/relation files (`.con`)
//! - JSON annotation dictionaries (`.json`)
//!
//! Each converter implements the `AnnotationFormat` trait. The caller always
//! picks the format explicitly through [`FormatKind`]; content is never
//! probed to guess it, so a parse failure is always attributable to the
//! format that was asked for.

use std::fmt;

use medner_core::{Document, IngestConfig, MedError, OverlapPolicy, Result};

pub mod brat;
pub mod con;
pub mod corpus;
pub mod json;

pub use brat::BratFormat;
pub use con::ConFormat;
pub use corpus::{load_corpus, load_texts, read_bundle, write_corpus};
pub use json::JsonFormat;

// ============================================================================
// Bundle Types
// ============================================================================

/// Raw text plus the annotation file that describes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationBundle {
    /// Bundle name (file stem)
    pub name: String,

    /// Raw document text
    pub text: String,

    /// Annotation file content
    pub annotations: String,
}

impl AnnotationBundle {
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        annotations: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            annotations: annotations.into(),
        }
    }
}

/// Options controlling how a bundle is parsed
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Abort on the first malformed record
    pub strict: bool,

    /// Applied to the resulting document
    pub overlap_policy: OverlapPolicy,
}

impl ParseOptions {
    /// Strict parsing
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }
}

impl From<&IngestConfig> for ParseOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            strict: config.strict,
            overlap_policy: config.overlap_policy,
        }
    }
}

/// A parsed document plus the records that were skipped
#[derive(Debug)]
pub struct ParseOutcome {
    pub document: Document,

    /// `MalformedAnnotation` errors for skipped records, in file order
    pub skipped: Vec<MedError>,
}

// ============================================================================
// Format Trait
// ============================================================================

/// Bidirectional converter between an external annotation format and
/// [`Document`]
pub trait AnnotationFormat: Send + Sync {
    /// Format handled by this converter
    fn kind(&self) -> FormatKind;

    /// Parse a bundle. Identical input always yields an identical document.
    fn parse(&self, bundle: &AnnotationBundle, options: &ParseOptions) -> Result<ParseOutcome>;

    /// Serialize a document back into the external format
    fn serialize(&self, document: &Document) -> Result<AnnotationBundle>;
}

/// Supported annotation formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Brat,
    Con,
    Json,
}

impl FormatKind {
    /// File extension of the annotation file
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Brat => "ann",
            Self::Con => "con",
            Self::Json => "json",
        }
    }

    /// Converter for this format
    pub fn converter(&self) -> Box<dyn AnnotationFormat> {
        match self {
            Self::Brat => Box::new(BratFormat::new()),
            Self::Con => Box::new(ConFormat::new()),
            Self::Json => Box::new(JsonFormat::new()),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Brat => write!(f, "brat"),
            Self::Con => write!(f, "con"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for FormatKind {
    type Err = MedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "brat" | "ann" => Ok(Self::Brat),
            "con" | "i2b2" => Ok(Self::Con),
            "json" => Ok(Self::Json),
            other => Err(MedError::InvalidConfig(format!(
                "unsupported annotation format: {other}"
            ))),
        }
    }
}

// ============================================================================
// Record bookkeeping shared by the converters
// ============================================================================

/// Collects skipped records, or aborts on the first one in strict mode
pub(crate) struct RecordLog<'a> {
    bundle: &'a str,
    strict: bool,
    skipped: Vec<MedError>,
}

impl<'a> RecordLog<'a> {
    pub(crate) fn new(bundle: &'a str, options: &ParseOptions) -> Self {
        Self {
            bundle,
            strict: options.strict,
            skipped: Vec::new(),
        }
    }

    /// Report a malformed record
    pub(crate) fn malformed(
        &mut self,
        record: &str,
        line: usize,
        reason: impl Into<String>,
    ) -> Result<()> {
        let error = MedError::MalformedAnnotation {
            record: record.to_string(),
            line,
            reason: reason.into(),
        };
        if self.strict {
            return Err(error);
        }
        tracing::warn!(bundle = %self.bundle, %error, "skipping annotation record");
        self.skipped.push(error);
        Ok(())
    }

    pub(crate) fn finish(self, document: Document) -> ParseOutcome {
        tracing::debug!(
            bundle = %self.bundle,
            entities = document.entity_count(),
            relations = document.relation_count(),
            skipped = self.skipped.len(),
            "bundle parsed"
        );
        ParseOutcome {
            document,
            skipped: self.skipped,
        }
    }
}

/// Collapse runs of whitespace so surface text comparisons ignore layout
pub(crate) fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_kind_parse() {
        assert_eq!("BRAT".parse::<FormatKind>().unwrap(), FormatKind::Brat);
        assert_eq!("i2b2".parse::<FormatKind>().unwrap(), FormatKind::Con);
        assert_eq!("json".parse::<FormatKind>().unwrap(), FormatKind::Json);
        assert!("xml".parse::<FormatKind>().is_err());
    }

    #[test]
    fn test_converter_matches_kind() {
        for kind in [FormatKind::Brat, FormatKind::Con, FormatKind::Json] {
            assert_eq!(kind.converter().kind(), kind);
        }
    }

    #[test]
    fn test_strict_log_aborts() {
        let mut log = RecordLog::new("doc", &ParseOptions::strict());
        assert!(log.malformed("T1", 1, "bad").is_err());

        let mut lenient = RecordLog::new("doc", &ParseOptions::default());
        assert!(lenient.malformed("T1", 1, "bad").is_ok());
        let outcome = lenient.finish(Document::new("doc", ""));
        assert_eq!(outcome.skipped.len(), 1);
    }
}
