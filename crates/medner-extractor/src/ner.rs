//! Named Entity Recognition (NER) module
//!
//! Gold entities are encoded as BIO tags, one per token, and a sequence
//! learner is trained over per-sentence feature sequences. Prediction decodes
//! the tag sequence back into token-aligned entity spans.

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use medner_core::{Document, Entity, EntityId, MedError, NerConfig, Result, Span};

use crate::features::{FeatureVector, TokenPipeline};
use crate::learn::{
    LabeledSequence, PerceptronTagger, SequenceLearner, SequenceTagger, StructuredPerceptron,
};

/// Tag of tokens outside every entity
pub const OUTSIDE: &str = "O";

// ============================================================================
// BIO encoding
// ============================================================================

/// Gold entities kept after the boundary rule: scanning left to right,
/// earliest start first and longest span on ties, an entity is kept only
/// if it does not overlap a kept one. Entities that cover no token are
/// dropped.
pub fn resolve_overlaps(document: &Document) -> Vec<(EntityId, Range<usize>)> {
    let mut candidates: Vec<(EntityId, &Entity, Range<usize>)> = document
        .entities()
        .filter_map(|(id, e)| document.token_range_for(e.span).map(|r| (id, e, r)))
        .collect();
    candidates.sort_by(|(ia, a, _), (ib, b, _)| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(b.span.len().cmp(&a.span.len()))
            .then(ia.cmp(ib))
    });

    let mut kept = Vec::new();
    let mut frontier = 0;
    for (id, entity, range) in candidates {
        if range.start < frontier {
            tracing::debug!(
                document = document.name(),
                entity_span = %entity.span,
                label = %entity.label,
                "overlapping entity dropped from BIO encoding"
            );
            continue;
        }
        frontier = range.end;
        kept.push((id, range));
    }
    kept
}

/// One BIO tag per token
pub fn encode_bio(document: &Document) -> Vec<String> {
    let mut tags = vec![OUTSIDE.to_string(); document.tokens().len()];
    for (id, range) in resolve_overlaps(document) {
        let Some(entity) = document.entity(id) else {
            continue;
        };
        for index in range.clone() {
            let prefix = if index == range.start { "B" } else { "I" };
            tags[index] = format!("{prefix}-{}", entity.label);
        }
    }
    tags
}

/// Split a tag into (prefix, label); `None` for outside or unknown tags
fn split_tag(tag: &str) -> Option<(char, &str)> {
    let (prefix, label) = tag.split_once('-')?;
    match prefix {
        "B" => Some(('B', label)),
        "I" => Some(('I', label)),
        _ => None,
    }
}

/// Contiguous same-type runs as (token range, label). A stray `I-X` that
/// does not continue an `X` run opens a new span.
pub fn decode_bio<S: AsRef<str>>(tags: &[S]) -> Vec<(Range<usize>, String)> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, &str)> = None;

    for (index, tag) in tags.iter().enumerate() {
        match split_tag(tag.as_ref()) {
            Some(('I', label)) if open.is_some_and(|(_, l)| l == label) => {}
            Some((_, label)) => {
                if let Some((start, l)) = open.take() {
                    spans.push((start..index, l.to_string()));
                }
                open = Some((index, label));
            }
            None => {
                if let Some((start, l)) = open.take() {
                    spans.push((start..index, l.to_string()));
                }
            }
        }
    }
    if let Some((start, l)) = open {
        spans.push((start..tags.len(), l.to_string()));
    }
    spans
}

/// Token ranges labeled as one unit: every sentence, or the whole document
/// when no sentences were produced
fn segments(document: &Document) -> Vec<Range<usize>> {
    if document.sentences().is_empty() {
        if document.tokens().is_empty() {
            Vec::new()
        } else {
            vec![0..document.tokens().len()]
        }
    } else {
        document.sentences().iter().map(|s| s.tokens.clone()).collect()
    }
}

fn training_sequences(document: &Document, pipeline: &TokenPipeline) -> Vec<LabeledSequence> {
    let features = pipeline.extract_tokens(document);
    let tags = encode_bio(document);
    segments(document)
        .into_iter()
        .map(|range| LabeledSequence {
            features: features[range.clone()].to_vec(),
            labels: tags[range].to_vec(),
        })
        .collect()
}

// ============================================================================
// Model
// ============================================================================

/// Sequence-labeling entity recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NerModel<T = PerceptronTagger> {
    config: NerConfig,
    tagger: Option<T>,
}

impl NerModel {
    /// Untrained model with the default structured perceptron
    pub fn new(config: NerConfig) -> Self {
        Self::untrained(config)
    }

    /// Learner used by [`NerModel::train`]
    pub fn learner(&self) -> StructuredPerceptron {
        StructuredPerceptron::new(self.config.epochs)
    }

    /// Train a new model with a [`StructuredPerceptron`]
    pub fn train(&self, documents: &[Document], pipeline: &TokenPipeline) -> Result<NerModel> {
        self.train_with(documents, pipeline, &self.learner())
    }
}

impl<T> NerModel<T> {
    pub fn untrained(config: NerConfig) -> Self {
        Self {
            config,
            tagger: None,
        }
    }

    pub fn config(&self) -> &NerConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.tagger.is_some()
    }

    pub fn tagger(&self) -> Option<&T> {
        self.tagger.as_ref()
    }

    /// Count the gold-labeled tokens of the annotated documents without
    /// extracting features; fewer than `min_labeled_tokens` (or none) is
    /// `InsufficientData`
    pub fn check_training_data(&self, documents: &[Document]) -> Result<usize> {
        let labeled: usize = documents
            .iter()
            .filter(|doc| doc.is_annotated())
            .map(|doc| {
                let tags = encode_bio(doc);
                segments(doc)
                    .into_iter()
                    .map(|range| tags[range].iter().filter(|t| t.as_str() != OUTSIDE).count())
                    .sum::<usize>()
            })
            .sum();
        if labeled == 0 || labeled < self.config.min_labeled_tokens {
            return Err(MedError::InsufficientData(format!(
                "{labeled} token(s) inside gold entities, at least {} required",
                self.config.min_labeled_tokens.max(1)
            )));
        }
        Ok(labeled)
    }

    /// Train a new model with any sequence learner. `self` is left untouched.
    pub fn train_with<L: SequenceLearner>(
        &self,
        documents: &[Document],
        pipeline: &TokenPipeline,
        learner: &L,
    ) -> Result<NerModel<L::Tagger>> {
        let usable: Vec<&Document> = documents
            .iter()
            .filter(|doc| {
                if !doc.is_annotated() {
                    tracing::warn!(
                        document = doc.name(),
                        "document has no tokens, skipped for NER training"
                    );
                }
                doc.is_annotated()
            })
            .collect();
        let labeled = self.check_training_data(documents)?;

        let sequences: Vec<LabeledSequence> = usable
            .par_iter()
            .flat_map_iter(|doc| training_sequences(doc, pipeline))
            .collect();

        tracing::info!(
            documents = usable.len(),
            sequences = sequences.len(),
            labeled_tokens = labeled,
            "training NER model"
        );
        let tagger = learner.fit(&sequences)?;

        Ok(NerModel {
            config: self.config.clone(),
            tagger: Some(tagger),
        })
    }
}

impl<T: SequenceTagger> NerModel<T> {
    /// Entities found in `document`, ordered by position
    pub fn predict(&self, document: &Document, pipeline: &TokenPipeline) -> Result<Vec<Entity>> {
        let tagger = self.tagger.as_ref().ok_or(MedError::ModelNotTrained)?;
        if !document.is_annotated() {
            tracing::warn!(
                document = document.name(),
                "document has no tokens, nothing to label"
            );
            return Ok(Vec::new());
        }

        let features: Vec<FeatureVector> = pipeline.extract_tokens(document);
        let tokens = document.tokens();
        let mut entities = Vec::new();
        for segment in segments(document) {
            let tags = tagger.tag(&features[segment.clone()]);
            for (range, label) in decode_bio(&tags) {
                let first = &tokens[segment.start + range.start];
                let last = &tokens[segment.start + range.end - 1];
                entities.push(Entity::predicted(
                    Span::new(first.span.start, last.span.end),
                    label,
                ));
            }
        }

        tracing::debug!(
            document = document.name(),
            entities = entities.len(),
            "NER prediction"
        );
        Ok(entities)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::annotator::tests::annotated_document;
    use crate::features::PipelineConfig;
    use medner_core::{Lexicon, Provenance};

    fn pipeline() -> TokenPipeline {
        PipelineConfig::default()
            .token_pipeline(Arc::new(Lexicon::new()))
            .unwrap()
    }

    /// Learner that memorizes the label of each lowercase word
    struct Memorize;

    struct MemoryTagger(HashMap<String, String>);

    impl SequenceLearner for Memorize {
        type Tagger = MemoryTagger;

        fn fit(&self, sequences: &[LabeledSequence]) -> Result<MemoryTagger> {
            let mut memory = HashMap::new();
            for sequence in sequences {
                for (features, label) in sequence.features.iter().zip(&sequence.labels) {
                    if let Some(word) = features.get("+0:lower") {
                        memory.insert(format!("{word:?}"), label.clone());
                    }
                }
            }
            Ok(MemoryTagger(memory))
        }
    }

    impl SequenceTagger for MemoryTagger {
        fn tag(&self, sequence: &[FeatureVector]) -> Vec<String> {
            sequence
                .iter()
                .map(|features| {
                    features
                        .get("+0:lower")
                        .and_then(|w| self.0.get(&format!("{w:?}")))
                        .cloned()
                        .unwrap_or_else(|| OUTSIDE.to_string())
                })
                .collect()
        }
    }

    #[test]
    fn test_encode_bio() {
        let doc = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        assert_eq!(
            encode_bio(&doc),
            vec!["O", "O", "B-DOSAGE", "I-DOSAGE", "O", "B-MEDICATION", "O"]
        );
    }

    #[test]
    fn test_encode_bio_resolves_overlaps() {
        let doc = annotated_document(
            "Took low dose aspirin daily.",
            &[("low dose aspirin", "MEDICATION"), ("aspirin", "DRUG"), ("low dose", "DOSAGE")],
        );
        // the longest span starting earliest wins
        assert_eq!(
            encode_bio(&doc),
            vec!["O", "B-MEDICATION", "I-MEDICATION", "I-MEDICATION", "O", "O"]
        );
    }

    #[test]
    fn test_decode_bio() {
        let tags = ["O", "B-DOSE", "I-DOSE", "I-DRUG", "B-DRUG", "B-DRUG", "O", "I-DOSE"];
        assert_eq!(
            decode_bio(&tags),
            vec![
                (1..3, "DOSE".to_string()),
                (3..4, "DRUG".to_string()),
                (4..5, "DRUG".to_string()),
                (5..6, "DRUG".to_string()),
                (7..8, "DOSE".to_string()),
            ]
        );
    }

    #[test]
    fn test_predict_before_train() {
        let doc = annotated_document("Patient received aspirin.", &[]);
        let model = NerModel::new(NerConfig::default());
        assert!(!model.is_trained());
        assert!(matches!(
            model.predict(&doc, &pipeline()),
            Err(MedError::ModelNotTrained)
        ));
    }

    #[test]
    fn test_insufficient_data() {
        let doc = annotated_document("Patient received aspirin.", &[]);
        let model = NerModel::new(NerConfig::default());
        assert!(matches!(
            model.train(&[doc], &pipeline()),
            Err(MedError::InsufficientData(_))
        ));

        let doc = annotated_document("Patient received aspirin.", &[("aspirin", "DRUG")]);
        let strict = NerModel::new(NerConfig {
            min_labeled_tokens: 5,
            ..Default::default()
        });
        assert!(matches!(
            strict.train(&[doc], &pipeline()),
            Err(MedError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_check_training_data_counts_labeled_tokens() {
        let doc = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        let unannotated = Document::new("raw", "Aspirin 81 mg daily.");
        let model = NerModel::new(NerConfig::default());
        assert_eq!(model.check_training_data(&[doc, unannotated]).unwrap(), 3);
        assert!(matches!(
            model.check_training_data(&[]),
            Err(MedError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_train_with_custom_learner() {
        let pipeline = pipeline();
        let train = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        let untrained = NerModel::new(NerConfig::default());
        let model = untrained.train_with(&[train], &pipeline, &Memorize).unwrap();
        assert!(!untrained.is_trained());
        assert!(model.is_trained());

        let test = annotated_document("Give aspirin 5 mg now.", &[]);
        let entities = model.predict(&test, &pipeline).unwrap();
        let found: Vec<(&str, &str)> = entities
            .iter()
            .map(|e| (e.span.slice(test.text()).unwrap(), e.label.as_str()))
            .collect();
        assert_eq!(found, vec![("aspirin", "MEDICATION"), ("5 mg", "DOSAGE")]);
        assert!(entities
            .iter()
            .all(|e| e.provenance == Some(Provenance::Predicted)));
    }

    #[test]
    fn test_perceptron_predictions_are_token_aligned() {
        let pipeline = pipeline();
        let doc = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        let model = NerModel::new(NerConfig::default())
            .train(&[doc.clone()], &pipeline)
            .unwrap();
        let stripped = doc.stripped();
        for entity in model.predict(&stripped, &pipeline).unwrap() {
            assert!(stripped.is_token_aligned(entity.span));
        }
    }
}
