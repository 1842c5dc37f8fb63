//! JSON annotation dictionaries (`.json`)
//!
//! ```json
//! {
//!   "entities": [{"id": "T1", "label": "DOSAGE", "start": 17, "end": 21, "text": "5 mg"}],
//!   "relations": [{"id": "R1", "label": "dosage_of", "source": "T1", "target": "T2"}]
//! }
//! ```
//!
//! Records are decoded one at a time so a single bad record is skipped like a
//! bad line in the text formats. A file whose root is not a JSON object fails
//! as a whole.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use medner_core::{Document, Entity, EntityId, MedError, Provenance, Relation, Result, Span};

use crate::{
    normalize_ws, AnnotationBundle, AnnotationFormat, FormatKind, ParseOptions, ParseOutcome,
    RecordLog,
};

#[derive(Debug, Serialize, Deserialize)]
struct EntityRecord {
    id: String,
    label: String,
    start: usize,
    end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    label: String,
    source: String,
    target: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AnnotationFile {
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    relations: Vec<Value>,
}

/// JSON annotation converter
#[derive(Debug, Clone, Default)]
pub struct JsonFormat;

impl JsonFormat {
    pub fn new() -> Self {
        Self
    }
}

fn record_name(value: &Value, fallback: &str, index: usize) -> String {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback}[{index}]"))
}

impl AnnotationFormat for JsonFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Json
    }

    fn parse(&self, bundle: &AnnotationBundle, options: &ParseOptions) -> Result<ParseOutcome> {
        let mut log = RecordLog::new(&bundle.name, options);
        let mut document = Document::new(bundle.name.clone(), bundle.text.clone())
            .with_overlap_policy(options.overlap_policy);

        let file: AnnotationFile = if bundle.annotations.trim().is_empty() {
            AnnotationFile::default()
        } else {
            serde_json::from_str(&bundle.annotations).map_err(|e| {
                MedError::MalformedAnnotation {
                    record: bundle.name.clone(),
                    line: e.line(),
                    reason: format!("not an annotation dictionary: {e}"),
                }
            })?
        };

        // Records are numbered from 1 within their array
        let mut ids: HashMap<String, EntityId> = HashMap::new();
        for (idx, value) in file.entities.into_iter().enumerate() {
            let name = record_name(&value, "entities", idx);
            let record: EntityRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    log.malformed(&name, idx + 1, e.to_string())?;
                    continue;
                }
            };
            if ids.contains_key(&record.id) {
                log.malformed(&name, idx + 1, "duplicate entity id")?;
                continue;
            }
            let span = Span::new(record.start, record.end);
            if let Some(expected) = &record.text {
                let actual = span.slice(&bundle.text).map(normalize_ws);
                if actual.as_deref() != Some(normalize_ws(expected).as_str()) {
                    log.malformed(
                        &name,
                        idx + 1,
                        format!("text {expected:?} does not match span {span}"),
                    )?;
                    continue;
                }
            }
            match document.add_entity_with(Entity::gold(span, record.label)) {
                Ok(id) => {
                    ids.insert(record.id, id);
                }
                Err(err) => log.malformed(&name, idx + 1, err.to_string())?,
            }
        }

        for (idx, value) in file.relations.into_iter().enumerate() {
            let name = record_name(&value, "relations", idx);
            let record: RelationRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    log.malformed(&name, idx + 1, e.to_string())?;
                    continue;
                }
            };
            let (Some(&source), Some(&target)) = (ids.get(&record.source), ids.get(&record.target))
            else {
                log.malformed(
                    &name,
                    idx + 1,
                    format!(
                        "relation arguments {}/{} are not known entities",
                        record.source, record.target
                    ),
                )?;
                continue;
            };
            let relation =
                Relation::new(source, target, record.label).with_provenance(Provenance::Gold);
            if let Err(err) = document.add_relation_with(relation) {
                log.malformed(&name, idx + 1, err.to_string())?;
            }
        }

        Ok(log.finish(document))
    }

    fn serialize(&self, document: &Document) -> Result<AnnotationBundle> {
        let mut names: HashMap<EntityId, String> = HashMap::new();
        let mut entities = Vec::with_capacity(document.entity_count());
        for (n, (id, entity)) in document.entities().enumerate() {
            let name = format!("T{}", n + 1);
            names.insert(id, name.clone());
            entities.push(serde_json::to_value(EntityRecord {
                id: name,
                label: entity.label.clone(),
                start: entity.span.start,
                end: entity.span.end,
                text: entity.span.slice(document.text()).map(str::to_string),
            })?);
        }

        let mut relations = Vec::with_capacity(document.relation_count());
        for (n, (_, relation)) in document.relations().enumerate() {
            let (Some(source), Some(target)) =
                (names.get(&relation.source), names.get(&relation.target))
            else {
                continue;
            };
            relations.push(serde_json::to_value(RelationRecord {
                id: Some(format!("R{}", n + 1)),
                label: relation.label.clone(),
                source: source.clone(),
                target: target.clone(),
            })?);
        }

        let annotations = serde_json::to_string_pretty(&AnnotationFile {
            entities,
            relations,
        })?;
        Ok(AnnotationBundle::new(
            document.name(),
            document.text(),
            annotations,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Patient received 5 mg of aspirin.";

    const JSON: &str = r#"{
        "entities": [
            {"id": "T1", "label": "DOSAGE", "start": 17, "end": 21, "text": "5 mg"},
            {"id": "T2", "label": "MEDICATION", "start": 25, "end": 32}
        ],
        "relations": [
            {"id": "R1", "label": "dosage_of", "source": "T1", "target": "T2"}
        ]
    }"#;

    #[test]
    fn test_parse_dictionary() {
        let outcome = JsonFormat::new()
            .parse(&AnnotationBundle::new("note", TEXT, JSON), &ParseOptions::default())
            .unwrap();
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.document.entity_count(), 2);
        assert_eq!(outcome.document.relation_count(), 1);
    }

    #[test]
    fn test_bad_record_is_skipped() {
        let json = r#"{"entities": [
            {"id": "T1", "label": "DOSAGE", "start": 17, "end": 21},
            {"id": "T2", "label": "MEDICATION", "start": "twenty-five", "end": 32}
        ]}"#;
        let outcome = JsonFormat::new()
            .parse(&AnnotationBundle::new("note", TEXT, json), &ParseOptions::default())
            .unwrap();
        assert_eq!(outcome.document.entity_count(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        match &outcome.skipped[0] {
            MedError::MalformedAnnotation { record, line, .. } => {
                assert_eq!(record, "T2");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_root_is_an_error() {
        let result = JsonFormat::new().parse(
            &AnnotationBundle::new("note", TEXT, "This is clearly not a valid json file"),
            &ParseOptions::default(),
        );
        assert!(matches!(result, Err(MedError::MalformedAnnotation { .. })));
    }

    #[test]
    fn test_empty_file_is_an_empty_document() {
        let outcome = JsonFormat::new()
            .parse(&AnnotationBundle::new("note", TEXT, ""), &ParseOptions::default())
            .unwrap();
        assert_eq!(outcome.document.entity_count(), 0);
    }

    #[test]
    fn test_round_trip_preserves_annotations() {
        let format = JsonFormat::new();
        let doc = format
            .parse(&AnnotationBundle::new("note", TEXT, JSON), &ParseOptions::default())
            .unwrap()
            .document;
        let bundle = format.serialize(&doc).unwrap();
        let again = format
            .parse(&bundle, &ParseOptions::strict())
            .unwrap()
            .document;

        let spans = |d: &Document| -> Vec<(Span, String)> {
            d.entities().map(|(_, e)| (e.span, e.label.clone())).collect()
        };
        assert_eq!(spans(&doc), spans(&again));
        assert_eq!(again.relation_count(), 1);
    }
}
