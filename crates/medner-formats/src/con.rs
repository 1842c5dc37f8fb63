//! i2b2 concept format (`.con`)
//!
//! Offsets are expressed as `line:token` pairs, lines counted from 1 and
//! tokens counted from 0 over whitespace-separated words of the raw text:
//!
//! ```text
//! c="5 mg" 1:2 1:3||t="dosage"
//! c="aspirin" 1:5 1:5||t="medication"
//! c="5 mg" 1:2 1:3||r="dosage_of"||c="aspirin" 1:5 1:5
//! ```
//!
//! Relation lines may share the file with concept lines.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use medner_core::{Document, Entity, EntityId, MedError, Provenance, Relation, Result, Span};

use crate::{
    normalize_ws, AnnotationBundle, AnnotationFormat, FormatKind, ParseOptions, ParseOutcome,
    RecordLog,
};

fn concept_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^c="(.*)" (\d+):(\d+) (\d+):(\d+)\|\|t="([^"]*)"$"#)
            .expect("concept pattern is a valid regex")
    })
}

fn relation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^c="(.*?)" (\d+):(\d+) (\d+):(\d+)\|\|r="([^"]*)"\|\|c="(.*)" (\d+):(\d+) (\d+):(\d+)$"#,
        )
        .expect("relation pattern is a valid regex")
    })
}

// ============================================================================
// Line/token coordinate grid
// ============================================================================

/// Whitespace tokens of every line, as byte spans into the full text
struct TokenGrid {
    lines: Vec<Vec<Span>>,
}

impl TokenGrid {
    fn new(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut offset = 0;
        for line in text.split('\n') {
            let mut tokens = Vec::new();
            let mut start = None;
            for (i, ch) in line.char_indices() {
                match (ch.is_whitespace(), start) {
                    (false, None) => start = Some(i),
                    (true, Some(s)) => {
                        tokens.push(Span::new(offset + s, offset + i));
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                tokens.push(Span::new(offset + s, offset + line.len()));
            }
            lines.push(tokens);
            offset += line.len() + 1;
        }
        Self { lines }
    }

    /// Token span at 1-based `line`, 0-based `token`
    fn token(&self, line: usize, token: usize) -> Option<Span> {
        self.lines.get(line.checked_sub(1)?)?.get(token).copied()
    }

    /// Span from the start of one token to the end of another
    fn span(&self, from: (usize, usize), to: (usize, usize)) -> Option<Span> {
        let start = self.token(from.0, from.1)?;
        let end = self.token(to.0, to.1)?;
        (start.start < end.end).then(|| Span::new(start.start, end.end))
    }

    /// Coordinates of the first and last whitespace tokens overlapping
    /// `span`, plus the span they cover
    fn covering(&self, span: Span) -> Option<((usize, usize), (usize, usize), Span)> {
        let mut overlapping = self
            .lines
            .iter()
            .enumerate()
            .flat_map(|(l, tokens)| {
                tokens
                    .iter()
                    .enumerate()
                    .map(move |(t, token)| ((l + 1, t), *token))
            })
            .filter(|(_, token)| token.start < span.end && span.start < token.end);
        let (from, first) = overlapping.next()?;
        let (to, last) = overlapping.last().unwrap_or((from, first));
        Some((from, to, Span::new(first.start, last.end)))
    }
}

fn coord(caps: &Captures<'_>, line: usize, token: usize) -> Option<(usize, usize)> {
    Some((caps[line].parse().ok()?, caps[token].parse().ok()?))
}

// ============================================================================
// Converter
// ============================================================================

/// i2b2 concept/relation converter
#[derive(Debug, Clone, Default)]
pub struct ConFormat;

impl ConFormat {
    pub fn new() -> Self {
        Self
    }
}

impl AnnotationFormat for ConFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Con
    }

    fn parse(&self, bundle: &AnnotationBundle, options: &ParseOptions) -> Result<ParseOutcome> {
        if bundle.text.is_empty() && !bundle.annotations.trim().is_empty() {
            return Err(MedError::MalformedAnnotation {
                record: bundle.name.clone(),
                line: 0,
                reason: "concept files need the source text to resolve line:token offsets"
                    .to_string(),
            });
        }

        let grid = TokenGrid::new(&bundle.text);
        let mut log = RecordLog::new(&bundle.name, options);
        let mut document = Document::new(bundle.name.clone(), bundle.text.clone())
            .with_overlap_policy(options.overlap_policy);
        let mut by_span: HashMap<Span, Vec<EntityId>> = HashMap::new();
        let mut relation_lines = Vec::new();

        for (idx, raw) in bundle.annotations.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.contains("||r=") {
                relation_lines.push((line_no, line));
                continue;
            }

            let Some(caps) = concept_regex().captures(line) else {
                log.malformed(line, line_no, "expected c=\"...\" L:T L:T||t=\"...\"")?;
                continue;
            };
            let span = coord(&caps, 2, 3)
                .zip(coord(&caps, 4, 5))
                .and_then(|(from, to)| grid.span(from, to));
            let Some(span) = span else {
                log.malformed(line, line_no, "line:token offsets outside the text")?;
                continue;
            };

            let expected = normalize_ws(&caps[1]).to_lowercase();
            let actual = span
                .slice(&bundle.text)
                .map(|t| normalize_ws(t).to_lowercase());
            if actual.as_deref() != Some(expected.as_str()) {
                log.malformed(
                    line,
                    line_no,
                    format!("concept text {:?} does not match span {span}", &caps[1]),
                )?;
                continue;
            }

            match document.add_entity_with(Entity::gold(span, &caps[6])) {
                Ok(id) => by_span.entry(span).or_default().push(id),
                Err(err) => log.malformed(line, line_no, err.to_string())?,
            }
        }

        for (line_no, line) in relation_lines {
            let Some(caps) = relation_regex().captures(line) else {
                log.malformed(line, line_no, "expected c=\"...\" L:T L:T||r=\"...\"||c=\"...\" L:T L:T")?;
                continue;
            };
            let endpoint = |from: (usize, usize), to: (usize, usize)| {
                let span = grid.span(from, to)?;
                let ids = by_span.get(&span)?;
                if ids.len() > 1 {
                    tracing::warn!(
                        bundle = %bundle.name,
                        line = line_no,
                        entity_span = %span,
                        concepts = ids.len(),
                        "relation endpoint matches several concepts, using the first"
                    );
                }
                ids.first().copied()
            };
            let source = coord(&caps, 2, 3)
                .zip(coord(&caps, 4, 5))
                .and_then(|(from, to)| endpoint(from, to));
            let target = coord(&caps, 8, 9)
                .zip(coord(&caps, 10, 11))
                .and_then(|(from, to)| endpoint(from, to));

            let (Some(source), Some(target)) = (source, target) else {
                log.malformed(line, line_no, "relation arguments do not match any concept")?;
                continue;
            };
            let relation = Relation::new(source, target, &caps[6]).with_provenance(Provenance::Gold);
            if let Err(err) = document.add_relation_with(relation) {
                log.malformed(line, line_no, err.to_string())?;
            }
        }

        Ok(log.finish(document))
    }

    fn serialize(&self, document: &Document) -> Result<AnnotationBundle> {
        let grid = TokenGrid::new(document.text());
        let mut out = String::new();
        let mut concepts: HashMap<EntityId, String> = HashMap::new();

        for (id, entity) in document.entities() {
            let Some((from, to, covered)) = grid.covering(entity.span) else {
                return Err(MedError::InvalidSpan {
                    span: entity.span,
                    reason: "entity covers no whitespace token".to_string(),
                });
            };
            if covered != entity.span {
                tracing::warn!(
                    document = document.name(),
                    entity_span = %entity.span,
                    exported_span = %covered,
                    label = %entity.label,
                    "entity widened to whitespace token boundaries"
                );
            }
            let text = covered
                .slice(document.text())
                .map(|t| normalize_ws(t).to_lowercase())
                .unwrap_or_default();
            let concept = format!("c=\"{}\" {}:{} {}:{}", text, from.0, from.1, to.0, to.1);
            out.push_str(&format!("{}||t=\"{}\"\n", concept, entity.label));
            concepts.insert(id, concept);
        }

        for (_, relation) in document.relations() {
            let (Some(source), Some(target)) =
                (concepts.get(&relation.source), concepts.get(&relation.target))
            else {
                continue;
            };
            out.push_str(&format!("{}||r=\"{}\"||{}\n", source, relation.label, target));
        }

        Ok(AnnotationBundle::new(document.name(), document.text(), out))
    }
}

// ============================================================================
// Tests
// ============================================================================
