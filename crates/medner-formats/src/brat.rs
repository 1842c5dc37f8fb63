//! BRAT standoff format (`.ann`)
//!
//! Text-bound annotations:
//!
//! ```text
//! T1	DOSAGE 17 21	5 mg
//! T2	MEDICATION 25 32	aspirin
//! R1	dosage_of Arg1:T1 Arg2:T2
//! ```
//!
//! Discontinuous text-bound annotations (`0 5;9 14`) are collapsed to the
//! covering span. Notes, attributes, normalizations and events are ignored.

use std::collections::HashMap;

use medner_core::{Document, Entity, EntityId, Provenance, Relation, Result, Span};

use crate::{
    normalize_ws, AnnotationBundle, AnnotationFormat, FormatKind, ParseOptions, ParseOutcome,
    RecordLog,
};

/// BRAT standoff converter
#[derive(Debug, Clone, Default)]
pub struct BratFormat;

impl BratFormat {
    pub fn new() -> Self {
        Self
    }
}

/// A text-bound line after field splitting
struct TextBound<'a> {
    id: &'a str,
    label: &'a str,
    span: Span,
    discontinuous: bool,
    text: Option<&'a str>,
}

fn parse_text_bound(line: &str) -> std::result::Result<TextBound<'_>, String> {
    let mut fields = line.splitn(3, '\t');
    let id = fields.next().unwrap_or_default();
    let middle = fields
        .next()
        .ok_or_else(|| "expected tab-separated id, type/offsets and text".to_string())?;
    let text = fields.next();

    let (label, offsets) = middle
        .split_once(' ')
        .ok_or_else(|| format!("missing offsets in {middle:?}"))?;
    if label.is_empty() {
        return Err("empty entity type".to_string());
    }

    let mut start = usize::MAX;
    let mut end = 0;
    let mut fragments = 0;
    for fragment in offsets.split(';') {
        let (s, e) = fragment
            .trim()
            .split_once(' ')
            .ok_or_else(|| format!("bad offset fragment {fragment:?}"))?;
        let s: usize = s.parse().map_err(|_| format!("bad start offset {s:?}"))?;
        let e: usize = e.parse().map_err(|_| format!("bad end offset {e:?}"))?;
        if e <= s {
            return Err(format!("empty or inverted fragment {s}..{e}"));
        }
        start = start.min(s);
        end = end.max(e);
        fragments += 1;
    }

    Ok(TextBound {
        id,
        label,
        span: Span::new(start, end),
        discontinuous: fragments > 1,
        text,
    })
}

fn parse_relation(line: &str) -> std::result::Result<(&str, &str, &str, &str), String> {
    let mut fields = line.split('\t');
    let id = fields.next().unwrap_or_default();
    let body = fields
        .next()
        .ok_or_else(|| "expected tab-separated id and relation body".to_string())?;

    let parts: Vec<&str> = body.split_whitespace().collect();
    let [label, arg1, arg2] = parts.as_slice() else {
        return Err(format!("expected `type Arg1:X Arg2:Y`, got {body:?}"));
    };
    let source = arg1
        .split_once(':')
        .map(|(_, v)| v)
        .ok_or_else(|| format!("bad argument {arg1:?}"))?;
    let target = arg2
        .split_once(':')
        .map(|(_, v)| v)
        .ok_or_else(|| format!("bad argument {arg2:?}"))?;
    Ok((id, *label, source, target))
}

impl AnnotationFormat for BratFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Brat
    }

    fn parse(&self, bundle: &AnnotationBundle, options: &ParseOptions) -> Result<ParseOutcome> {
        let mut log = RecordLog::new(&bundle.name, options);
        let mut document = Document::new(bundle.name.clone(), bundle.text.clone())
            .with_overlap_policy(options.overlap_policy);
        let mut ids: HashMap<String, EntityId> = HashMap::new();
        let mut relation_lines = Vec::new();

        // Text-bound annotations first so relations may precede their arguments
        for (idx, raw) in bundle.annotations.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let record = line.split('\t').next().unwrap_or(line);

            match line.chars().next() {
                Some('T') => {
                    let tb = match parse_text_bound(line) {
                        Ok(tb) => tb,
                        Err(reason) => {
                            log.malformed(record, line_no, reason)?;
                            continue;
                        }
                    };
                    if ids.contains_key(tb.id) {
                        log.malformed(record, line_no, "duplicate annotation id")?;
                        continue;
                    }
                    if let (Some(expected), false) = (tb.text, tb.discontinuous) {
                        let actual = tb.span.slice(&bundle.text).map(normalize_ws);
                        if actual.as_deref() != Some(normalize_ws(expected).as_str()) {
                            log.malformed(
                                record,
                                line_no,
                                format!("text {expected:?} does not match span {}", tb.span),
                            )?;
                            continue;
                        }
                    }
                    if tb.discontinuous {
                        tracing::debug!(record, span = %tb.span, "collapsed discontinuous annotation");
                    }
                    match document.add_entity_with(Entity::gold(tb.span, tb.label)) {
                        Ok(id) => {
                            ids.insert(tb.id.to_string(), id);
                        }
                        Err(err) => log.malformed(record, line_no, err.to_string())?,
                    }
                }
                Some('R') => relation_lines.push((line_no, line)),
                Some('#' | 'A' | 'M' | 'N' | 'E') => {
                    tracing::debug!(record, line = line_no, "ignoring unsupported BRAT record");
                }
                _ => log.malformed(record, line_no, "unknown record type")?,
            }
        }

        for (line_no, line) in relation_lines {
            let record = line.split('\t').next().unwrap_or(line);
            let (_, label, source, target) = match parse_relation(line) {
                Ok(parts) => parts,
                Err(reason) => {
                    log.malformed(record, line_no, reason)?;
                    continue;
                }
            };
            let (Some(&source), Some(&target)) = (ids.get(source), ids.get(target)) else {
                log.malformed(
                    record,
                    line_no,
                    format!("relation arguments {source}/{target} are not known entities"),
                )?;
                continue;
            };
            let relation = Relation::new(source, target, label).with_provenance(Provenance::Gold);
            if let Err(err) = document.add_relation_with(relation) {
                log.malformed(record, line_no, err.to_string())?;
            }
        }

        Ok(log.finish(document))
    }

    fn serialize(&self, document: &Document) -> Result<AnnotationBundle> {
        let mut out = String::new();
        let mut ids: HashMap<EntityId, usize> = HashMap::new();

        for (n, (id, entity)) in document.entities().enumerate() {
            let text = entity
                .span
                .slice(document.text())
                .map(|t| t.replace(['\n', '\r', '\t'], " "))
                .unwrap_or_default();
            out.push_str(&format!(
                "T{}\t{} {} {}\t{}\n",
                n + 1,
                entity.label,
                entity.span.start,
                entity.span.end,
                text
            ));
            ids.insert(id, n + 1);
        }

        for (n, (_, relation)) in document.relations().enumerate() {
            // both endpoints are owned by the document
            let (Some(source), Some(target)) = (ids.get(&relation.source), ids.get(&relation.target))
            else {
                continue;
            };
            out.push_str(&format!(
                "R{}\t{} Arg1:T{} Arg2:T{}\n",
                n + 1,
                relation.label,
                source,
                target
            ));
        }

        Ok(AnnotationBundle::new(document.name(), document.text(), out))
    }
}

// ============================================================================
// Tests
// ============================================================================
