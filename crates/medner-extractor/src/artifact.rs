//! Persisted model artifact
//!
//! One JSON file holding the pipeline declaration and the trained models.
//! The lexicon is not embedded; inference rebuilds the pipelines over the
//! lexicon supplied by the caller.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medner_core::{Document, Lexicon, MedError, NerConfig, RelationConfig, Result};

use crate::features::{PipelineConfig, Pipelines};
use crate::learn::{PairLearner, PerceptronClassifier, PerceptronTagger, SequenceLearner};
use crate::ner::NerModel;
use crate::relation::RelationModel;

/// Current on-disk layout version
pub const FORMAT_VERSION: u32 = 1;

/// Trained models plus the pipeline they were trained with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub pipeline: PipelineConfig,
    pub ner: Option<NerModel>,
    pub relations: Option<RelationModel>,
}

impl ModelArtifact {
    /// Artifact without models
    pub fn new(pipeline: PipelineConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            pipeline,
            ner: None,
            relations: None,
        }
    }

    pub fn with_ner(mut self, model: NerModel) -> Self {
        self.ner = Some(model);
        self
    }

    pub fn with_relations(mut self, model: RelationModel) -> Self {
        self.relations = Some(model);
        self
    }

    /// Build the pipelines declared by `pipeline` and train the requested
    /// models on `documents`
    pub fn train(
        documents: &[Document],
        pipeline: PipelineConfig,
        lexicon: Arc<Lexicon>,
        ner: Option<&NerConfig>,
        relations: Option<&RelationConfig>,
    ) -> Result<Self> {
        let ner = ner.map(|config| NerModel::new(config.clone()));
        let relations = relations.map(|config| RelationModel::new(config.clone()));
        let ner_learner = ner.as_ref().map(NerModel::learner);
        let relation_learner = relations.as_ref().map(RelationModel::learner);
        Self::train_with(
            documents,
            pipeline,
            lexicon,
            ner.zip(ner_learner.as_ref()),
            relations.zip(relation_learner.as_ref()),
        )
    }

    /// Train untrained models with the given learners. The training data of
    /// every requested model is checked before the first learner runs.
    pub fn train_with<S, P>(
        documents: &[Document],
        pipeline: PipelineConfig,
        lexicon: Arc<Lexicon>,
        ner: Option<(NerModel, &S)>,
        relations: Option<(RelationModel, &P)>,
    ) -> Result<Self>
    where
        S: SequenceLearner<Tagger = PerceptronTagger>,
        P: PairLearner<Classifier = PerceptronClassifier>,
    {
        if ner.is_none() && relations.is_none() {
            return Err(MedError::InvalidConfig(
                "nothing to train: both NER and relations are disabled".to_string(),
            ));
        }
        let pipelines = pipeline.build(lexicon)?;
        if let Some((model, _)) = &ner {
            model.check_training_data(documents)?;
        }
        if let Some((model, _)) = &relations {
            model.check_training_data(documents, &pipelines.pair)?;
        }

        let mut artifact = Self::new(pipeline);
        if let Some((model, learner)) = ner {
            artifact.ner = Some(model.train_with(documents, &pipelines.token, learner)?);
        }
        if let Some((model, learner)) = relations {
            artifact.relations = Some(model.train_with(documents, &pipelines.pair, learner)?);
        }
        tracing::info!(
            id = %artifact.id,
            ner = artifact.ner.is_some(),
            relations = artifact.relations.is_some(),
            "model artifact trained"
        );
        Ok(artifact)
    }

    /// Rebuild the pipelines the models were trained with
    pub fn pipelines(&self, lexicon: Arc<Lexicon>) -> Result<Pipelines> {
        self.pipeline.build(lexicon)
    }

    /// Add predicted entities, then predicted relations, to `document`.
    /// Returns the number of entities and relations added.
    pub fn apply(&self, document: &mut Document, pipelines: &Pipelines) -> Result<(usize, usize)> {
        let mut entities = 0;
        if let Some(model) = &self.ner {
            for entity in model.predict(document, &pipelines.token)? {
                match document.add_entity_with(entity) {
                    Ok(_) => entities += 1,
                    Err(MedError::OverlappingEntity { span, label, .. }) => {
                        tracing::warn!(
                            document = document.name(),
                            entity_span = %span,
                            label = %label,
                            "predicted entity rejected by overlap policy"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut relations = 0;
        if let Some(model) = &self.relations {
            for relation in model.predict(document, &pipelines.pair)? {
                document.add_relation_with(relation)?;
                relations += 1;
            }
        }
        Ok((entities, relations))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| MedError::io(path, e))?;
        tracing::info!(path = %path.display(), id = %self.id, "model artifact saved");
        Ok(())
    }

    /// Load an artifact, refusing any other format version
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MedError::io(path, e))?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        let version = value
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                MedError::Serialization("artifact has no format_version".to_string())
            })?;
        if version != u64::from(FORMAT_VERSION) {
            return Err(MedError::InvalidConfig(format!(
                "artifact format version {version} is not supported (expected {FORMAT_VERSION})"
            )));
        }
        let artifact: Self = serde_json::from_value(value)?;
        tracing::debug!(path = %path.display(), id = %artifact.id, "model artifact loaded");
        Ok(artifact)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::annotator::tests::annotated_document;
    use crate::learn::{LabeledSequence, StructuredPerceptron};
    use medner_core::{EntityId, Provenance};

    fn training_document() -> Document {
        let mut doc = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        let ids: Vec<EntityId> = doc.entities().map(|(id, _)| id).collect();
        doc.add_relation(ids[0], ids[1], "dosage_of").unwrap();
        doc
    }

    #[test]
    fn test_nothing_to_train() {
        let result = ModelArtifact::train(
            &[training_document()],
            PipelineConfig::default(),
            Arc::new(Lexicon::new()),
            None,
            None,
        );
        assert!(matches!(result, Err(MedError::InvalidConfig(_))));
    }

    /// Structured perceptron that counts how often it was fitted
    struct CountingLearner {
        inner: StructuredPerceptron,
        fits: Cell<usize>,
    }

    impl SequenceLearner for CountingLearner {
        type Tagger = PerceptronTagger;

        fn fit(&self, sequences: &[LabeledSequence]) -> Result<PerceptronTagger> {
            self.fits.set(self.fits.get() + 1);
            self.inner.fit(sequences)
        }
    }

    #[test]
    fn test_data_checks_run_before_any_training() {
        let without_relations = annotated_document(
            "Patient received 5 mg of aspirin.",
            &[("5 mg", "DOSAGE"), ("aspirin", "MEDICATION")],
        );
        let ner = NerModel::new(NerConfig::default());
        let relations = RelationModel::new(RelationConfig::default());
        let learner = CountingLearner {
            inner: ner.learner(),
            fits: Cell::new(0),
        };

        let result = ModelArtifact::train_with(
            &[without_relations],
            PipelineConfig::default(),
            Arc::new(Lexicon::new()),
            Some((ner.clone(), &learner)),
            Some((relations.clone(), &relations.learner())),
        );
        assert!(matches!(result, Err(MedError::InsufficientData(_))));
        assert_eq!(learner.fits.get(), 0);

        let artifact = ModelArtifact::train_with(
            &[training_document()],
            PipelineConfig::default(),
            Arc::new(Lexicon::new()),
            Some((ner, &learner)),
            Some((relations.clone(), &relations.learner())),
        )
        .unwrap();
        assert_eq!(learner.fits.get(), 1);
        assert!(artifact.ner.is_some_and(|m| m.is_trained()));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let artifact = ModelArtifact::train(
            &[training_document()],
            PipelineConfig::default(),
            Arc::new(Lexicon::new()),
            None,
            Some(&RelationConfig::default()),
        )
        .unwrap();
        artifact.save(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.id, artifact.id);
        assert_eq!(loaded.pipeline, artifact.pipeline);
        assert!(loaded.ner.is_none());
        assert!(loaded.relations.as_ref().is_some_and(|m| m.is_trained()));

        let mut doc = training_document();
        let gold_relations = doc.relation_count();
        let pipelines = loaded.pipelines(Arc::new(Lexicon::new())).unwrap();
        let (entities, relations) = loaded.apply(&mut doc, &pipelines).unwrap();
        assert_eq!(entities, 0);
        assert_eq!(relations, 1);
        assert_eq!(doc.relation_count(), gold_relations + 1);
        assert!(doc
            .relations()
            .any(|(_, r)| r.provenance == Some(Provenance::Predicted)));
    }

    #[test]
    fn test_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut artifact = ModelArtifact::new(PipelineConfig::default());
        artifact.format_version = FORMAT_VERSION + 1;
        artifact.save(&path).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(MedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelArtifact::load(dir.path().join("absent.json")),
            Err(MedError::Io { .. })
        ));
    }
}
