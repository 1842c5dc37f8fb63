//! Linguistic annotation
//!
//! A [`LinguisticAnnotator`] turns raw text into tokens and sentences.
//! [`AnnotatorAdapter`] writes that analysis into a [`Document`] and checks
//! that every entity still falls on token boundaries.

use std::ops::Range;
use std::sync::OnceLock;

use rayon::prelude::*;
use regex::Regex;

use medner_core::{BatchReport, Document, MedError, Result, Span, Token};

use crate::units::is_unit;

/// Tokens plus sentence boundaries (as token index ranges)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub tokens: Vec<Token>,
    pub sentences: Vec<Range<usize>>,
}

/// External tokenizer / tagger boundary
pub trait LinguisticAnnotator: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, text: &str) -> Result<Analysis>;
}

// ============================================================================
// Rule-based annotator
// ============================================================================

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d+(?:[.,]\d+)*|[\p{L}\p{M}]+(?:['’][\p{L}\p{M}]+)*|\S")
            .expect("token pattern is valid")
    })
}

const DETERMINERS: &[&str] = &["a", "an", "the", "this", "that", "these", "those", "each", "every", "no"];
const PREPOSITIONS: &[&str] = &[
    "of", "in", "on", "at", "for", "with", "by", "from", "to", "per", "after", "before", "during",
    "via", "into", "over", "under",
];
const CONJUNCTIONS: &[&str] = &["and", "or", "but", "nor"];
const PRONOUNS: &[&str] = &["he", "she", "it", "they", "i", "we", "you", "his", "her", "their", "him", "them"];

/// Coarse universal POS tag from surface form alone
fn heuristic_pos(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let word = lower.as_str();
    if text.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        "NUM"
    } else if text.chars().all(|c| !c.is_alphanumeric()) {
        "PUNCT"
    } else if DETERMINERS.contains(&word) {
        "DET"
    } else if PREPOSITIONS.contains(&word) {
        "ADP"
    } else if CONJUNCTIONS.contains(&word) {
        "CCONJ"
    } else if PRONOUNS.contains(&word) {
        "PRON"
    } else if is_unit(word) {
        "NOUN"
    } else if word.len() > 4 && word.ends_with("ly") {
        "ADV"
    } else if word.len() > 4 && (word.ends_with("ed") || word.ends_with("ing")) {
        "VERB"
    } else {
        "NOUN"
    }
}

fn ends_sentence(token: &str) -> bool {
    matches!(token, "." | "!" | "?")
}

/// Regex tokenizer for clinical text: numbers split from attached units,
/// every punctuation mark its own token, sentences closed on terminal
/// punctuation and blank lines. POS tags are heuristic and lemmas are the
/// lowercase surface form.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAnnotator;

impl LinguisticAnnotator for RuleBasedAnnotator {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn analyze(&self, text: &str) -> Result<Analysis> {
        let mut analysis = Analysis::default();
        let mut sentence_start = 0;
        let mut previous_end = 0;

        for m in token_regex().find_iter(text) {
            let index = analysis.tokens.len();
            let gap = &text[previous_end..m.start()];
            if index > sentence_start && gap.matches('\n').count() >= 2 {
                analysis.sentences.push(sentence_start..index);
                sentence_start = index;
            }

            let surface = m.as_str();
            analysis.tokens.push(
                Token::new(Span::new(m.start(), m.end()), surface)
                    .with_pos(heuristic_pos(surface))
                    .with_lemma(surface.to_lowercase()),
            );
            previous_end = m.end();

            if ends_sentence(surface) {
                analysis.sentences.push(sentence_start..index + 1);
                sentence_start = index + 1;
            }
        }
        if sentence_start < analysis.tokens.len() {
            analysis.sentences.push(sentence_start..analysis.tokens.len());
        }
        Ok(analysis)
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Writes the analysis of a [`LinguisticAnnotator`] into documents
#[derive(Debug, Clone, Default)]
pub struct AnnotatorAdapter<A = RuleBasedAnnotator> {
    annotator: A,
}

impl<A: LinguisticAnnotator> AnnotatorAdapter<A> {
    pub fn new(annotator: A) -> Self {
        Self { annotator }
    }

    pub fn annotator(&self) -> &A {
        &self.annotator
    }

    /// Populate tokens and sentences of `document`. A document that already
    /// carries tokens is left as is. Fails with `Alignment` when an entity
    /// does not start and end on token boundaries; `document` is unchanged
    /// on failure.
    pub fn annotate(&self, document: &mut Document) -> Result<()> {
        if document.is_annotated() {
            tracing::debug!(document = document.name(), "document already annotated");
            return check_alignment(document);
        }

        let analysis = self.annotator.analyze(document.text())?;
        let mut annotated = document.clone();
        for token in analysis.tokens {
            annotated.add_token(token)?;
        }
        for range in analysis.sentences {
            annotated.add_sentence(range)?;
        }
        check_alignment(&annotated)?;

        tracing::debug!(
            document = annotated.name(),
            annotator = self.annotator.name(),
            tokens = annotated.tokens().len(),
            sentences = annotated.sentences().len(),
            "document annotated"
        );
        *document = annotated;
        Ok(())
    }

    /// Annotate many documents in parallel; misaligned documents become
    /// failures instead of aborting the batch
    pub fn annotate_batch(&self, documents: Vec<Document>) -> BatchReport<Document> {
        self.annotate_report(BatchReport {
            items: documents,
            ..Default::default()
        })
    }

    /// Annotate the items of an existing report, keeping its failures and
    /// skipped records
    pub fn annotate_report(&self, report: BatchReport<Document>) -> BatchReport<Document> {
        let BatchReport {
            items,
            failures,
            skipped_records,
        } = report;

        let results: Vec<(String, Result<Document>)> = items
            .into_par_iter()
            .map(|mut document| {
                let name = document.name().to_string();
                let result = self.annotate(&mut document).map(|_| document);
                (name, result)
            })
            .collect();

        let mut out = BatchReport {
            items: Vec::with_capacity(results.len()),
            failures,
            skipped_records,
        };
        for (name, result) in results {
            match result {
                Ok(document) => out.items.push(document),
                Err(error) => {
                    tracing::warn!(document = %name, error = %error, "annotation failed");
                    out.push_failure(name, error);
                }
            }
        }
        tracing::info!(annotator = self.annotator.name(), "{}", out.summary());
        out
    }
}

fn check_alignment(document: &Document) -> Result<()> {
    let spans = document.misaligned_entities();
    if spans.is_empty() {
        Ok(())
    } else {
        Err(MedError::Alignment {
            document: document.name().to_string(),
            spans,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
