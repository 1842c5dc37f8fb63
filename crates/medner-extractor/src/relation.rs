//! Relation Extraction (RE) module
//!
//! Every ordered entity pair admitted by the candidate policy is classified.
//! Pairs without a gold relation are trained as the negative class.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use medner_core::{Document, EntityId, MedError, Provenance, Relation, RelationConfig, Result};

use crate::features::PairPipeline;
use crate::learn::{
    AveragedPerceptron, LabeledExample, PairClassifier, PairLearner, PerceptronClassifier,
};

/// Labeled candidates of one document, in candidate order
fn training_examples(
    document: &Document,
    pipeline: &PairPipeline,
    negative_label: &str,
) -> Vec<LabeledExample> {
    let mut gold: HashMap<(EntityId, EntityId), &str> = HashMap::new();
    for (_, relation) in document.relations() {
        gold.entry((relation.source, relation.target))
            .or_insert(relation.label.as_str());
    }

    pipeline
        .candidates(document)
        .into_iter()
        .map(|(source, target)| LabeledExample {
            features: pipeline.extract(document, source, target),
            label: gold
                .get(&(source, target))
                .copied()
                .unwrap_or(negative_label)
                .to_string(),
        })
        .collect()
}

/// Entity-pair relation classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationModel<C = PerceptronClassifier> {
    config: RelationConfig,
    classifier: Option<C>,
}

impl RelationModel {
    /// Untrained model with the default averaged perceptron
    pub fn new(config: RelationConfig) -> Self {
        Self::untrained(config)
    }

    /// Learner used by [`RelationModel::train`]
    pub fn learner(&self) -> AveragedPerceptron {
        AveragedPerceptron::new(self.config.epochs)
            .with_default_label(self.config.negative_label.clone())
    }

    /// Train a new model with an [`AveragedPerceptron`]
    pub fn train(&self, documents: &[Document], pipeline: &PairPipeline) -> Result<RelationModel> {
        self.train_with(documents, pipeline, &self.learner())
    }
}

impl<C> RelationModel<C> {
    pub fn untrained(config: RelationConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn classifier(&self) -> Option<&C> {
        self.classifier.as_ref()
    }

    /// Count the candidate pairs carrying a gold relation, without
    /// extracting features; none is `InsufficientData`
    pub fn check_training_data(
        &self,
        documents: &[Document],
        pipeline: &PairPipeline,
    ) -> Result<usize> {
        let negative = self.config.negative_label.as_str();
        let (mut candidates, mut positives) = (0, 0);
        for document in documents {
            let gold: HashSet<(EntityId, EntityId)> = document
                .relations()
                .filter(|(_, r)| r.label != negative)
                .map(|(_, r)| (r.source, r.target))
                .collect();
            for pair in pipeline.candidates(document) {
                candidates += 1;
                if gold.contains(&pair) {
                    positives += 1;
                }
            }
        }
        if positives == 0 {
            return Err(MedError::InsufficientData(format!(
                "no gold relation among {candidates} candidate pair(s)"
            )));
        }
        Ok(positives)
    }

    /// Train a new model with any pair learner. `self` is left untouched.
    pub fn train_with<L: PairLearner>(
        &self,
        documents: &[Document],
        pipeline: &PairPipeline,
        learner: &L,
    ) -> Result<RelationModel<L::Classifier>> {
        let positives = self.check_training_data(documents, pipeline)?;
        let negative = self.config.negative_label.as_str();
        let examples: Vec<LabeledExample> = documents
            .par_iter()
            .flat_map_iter(|doc| training_examples(doc, pipeline, negative))
            .collect();

        tracing::info!(
            documents = documents.len(),
            candidates = examples.len(),
            positives,
            "training relation model"
        );
        let classifier = learner.fit(&examples)?;

        Ok(RelationModel {
            config: self.config.clone(),
            classifier: Some(classifier),
        })
    }
}

impl<C: PairClassifier> RelationModel<C> {
    /// Relations between the entities already present in `document`
    pub fn predict(&self, document: &Document, pipeline: &PairPipeline) -> Result<Vec<Relation>> {
        let classifier = self.classifier.as_ref().ok_or(MedError::ModelNotTrained)?;
        let negative = self.config.negative_label.as_str();

        let relations: Vec<Relation> = pipeline
            .candidates(document)
            .into_iter()
            .filter_map(|(source, target)| {
                let label = classifier.classify(&pipeline.extract(document, source, target));
                (label != negative).then(|| {
                    Relation::new(source, target, label).with_provenance(Provenance::Predicted)
                })
            })
            .collect();

        tracing::debug!(
            document = document.name(),
            relations = relations.len(),
            "relation prediction"
        );
        Ok(relations)
    }
}

// ============================================================================
// Tests
// ============================================================================
