//! medner Core - Document model, error taxonomy and shared resources
//!
//! This crate defines the core abstractions used throughout medner:
//! - The document model (text, tokens, sentences, entities, relations)
//! - The lexicon resource shared read-only by feature extraction
//! - Common error types
//! - Batch reporting for per-item recoverable failures
//! - Configuration management

pub mod batch;
pub mod config;
pub mod document;
pub mod lexicon;

pub use batch::{BatchReport, ItemFailure};
pub use config::{
    ConfigError, EvaluationConfig, IngestConfig, LoggingConfig, MedConfig, NerConfig,
    RelationConfig,
};
pub use document::{
    Document, EntitiesOverlapping, Entity, EntityId, OverlapPolicy, Provenance, Relation,
    RelationId, Sentence, Span, Token,
};
pub use lexicon::Lexicon;

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for medner operations
#[derive(Error, Debug)]
pub enum MedError {
    /// A single annotation record could not be understood
    #[error("Malformed annotation record {record:?} (line {line}): {reason}")]
    MalformedAnnotation {
        record: String,
        line: usize,
        reason: String,
    },

    /// Entity spans that do not fall on token boundaries after annotation
    #[error("Alignment error in document {document}: {} entity span(s) do not match token boundaries: {}", .spans.len(), format_spans(.spans))]
    Alignment { document: String, spans: Vec<Span> },

    #[error("Invalid span {span}: {reason}")]
    InvalidSpan { span: Span, reason: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Entity {span} ({label}) overlaps entity {existing} of a different type")]
    OverlappingEntity {
        span: Span,
        label: String,
        existing: EntityId,
    },

    /// Two extractor units declare the same feature key
    #[error("Duplicate feature name {name:?} declared by {first} and {second}")]
    DuplicateFeatureName {
        name: String,
        first: String,
        second: String,
    },

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("Empty corpus: no documents to evaluate")]
    EmptyCorpus,

    #[error("Model has not been trained")]
    ModelNotTrained,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MedError {
    /// Build an IO error tagged with the path that caused it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for MedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn format_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, MedError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_message_lists_spans() {
        let err = MedError::Alignment {
            document: "note-1".to_string(),
            spans: vec![Span::new(3, 7), Span::new(10, 12)],
        };
        let message = err.to_string();
        assert!(message.contains("note-1"));
        assert!(message.contains("[3, 7)"));
        assert!(message.contains("2 entity span(s)"));
    }
}
