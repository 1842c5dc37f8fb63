//! K-fold cross-validation

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use medner_core::{Document, EvaluationConfig, MedError, NerConfig, RelationConfig, Result};

use crate::features::Pipelines;
use crate::metrics::{EvaluationReport, Evaluator};
use crate::ner::NerModel;
use crate::relation::RelationModel;

/// Scores of one held-out fold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_documents: usize,
    pub test_documents: usize,
    pub entities: Option<EvaluationReport>,
    pub relations: Option<EvaluationReport>,
}

/// Per-fold and pooled scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldReport>,
    /// Entity counts pooled over all folds
    pub entities: EvaluationReport,
    /// Relation counts pooled over all folds
    pub relations: EvaluationReport,
}

impl CrossValidationReport {
    /// Print a summary report
    pub fn report(&self) -> String {
        let documents: usize = self.folds.iter().map(|f| f.test_documents).sum();
        let mut out = format!(
            "=== Cross-Validation Report ===\n\n\
             Folds: {}\n\
             Documents evaluated: {}\n\n",
            self.folds.len(),
            documents
        );
        if self.folds.iter().any(|f| f.entities.is_some()) {
            out.push_str(&self.entities.report("Entity Extraction"));
            out.push('\n');
        }
        if self.folds.iter().any(|f| f.relations.is_some()) {
            out.push_str(&self.relations.report("Relation Extraction"));
        }
        out
    }
}

/// Trains fresh models per fold and scores them on the held-out documents
#[derive(Debug, Clone, Default)]
pub struct CrossValidator {
    pub evaluation: EvaluationConfig,
    pub ner: NerConfig,
    pub relations: RelationConfig,
}

impl CrossValidator {
    pub fn new(evaluation: EvaluationConfig) -> Self {
        Self {
            evaluation,
            ..Default::default()
        }
    }

    pub fn with_ner_config(mut self, config: NerConfig) -> Self {
        self.ner = config;
        self
    }

    pub fn with_relation_config(mut self, config: RelationConfig) -> Self {
        self.relations = config;
        self
    }

    /// Fold index of every document, assigned round-robin by position
    pub fn assign_folds(&self, documents: usize) -> Vec<usize> {
        (0..documents).map(|i| i % self.evaluation.folds).collect()
    }

    fn check(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Err(MedError::EmptyCorpus);
        }
        let folds = self.evaluation.folds;
        if folds < 2 {
            return Err(MedError::InvalidConfig(format!(
                "cross-validation needs at least 2 folds, got {folds}"
            )));
        }
        if folds > documents.len() {
            return Err(MedError::InvalidConfig(format!(
                "{folds} folds requested for {} document(s)",
                documents.len()
            )));
        }
        if !self.evaluation.ner && !self.evaluation.relations {
            return Err(MedError::InvalidConfig(
                "evaluation enables neither NER nor relations".to_string(),
            ));
        }
        Ok(())
    }

    /// Run every fold; the first failing fold aborts the run
    pub fn run(&self, documents: &[Document], pipelines: &Pipelines) -> Result<CrossValidationReport> {
        self.check(documents)?;
        let assignment = self.assign_folds(documents.len());
        tracing::info!(
            documents = documents.len(),
            folds = self.evaluation.folds,
            "starting cross-validation"
        );

        let folds: Vec<FoldReport> = (0..self.evaluation.folds)
            .into_par_iter()
            .map(|fold| {
                let mut train = Vec::new();
                let mut test = Vec::new();
                for (document, &assigned) in documents.iter().zip(&assignment) {
                    if assigned == fold {
                        test.push(document.clone());
                    } else {
                        train.push(document.clone());
                    }
                }
                self.run_fold(fold, &train, &test, pipelines)
            })
            .collect::<Result<_>>()?;

        let mut report = CrossValidationReport::default();
        for fold in &folds {
            if let Some(entities) = &fold.entities {
                report.entities.merge(entities);
            }
            if let Some(relations) = &fold.relations {
                report.relations.merge(relations);
            }
        }
        report.folds = folds;
        tracing::info!(
            entity_f1 = report.entities.micro().f1_score,
            relation_f1 = report.relations.micro().f1_score,
            "cross-validation finished"
        );
        Ok(report)
    }

    fn run_fold(
        &self,
        fold: usize,
        train: &[Document],
        test: &[Document],
        pipelines: &Pipelines,
    ) -> Result<FoldReport> {
        let evaluator = Evaluator::new();
        let mut report = FoldReport {
            fold,
            train_documents: train.len(),
            test_documents: test.len(),
            ..Default::default()
        };

        let ner = self.evaluation.ner.then(|| NerModel::new(self.ner.clone()));
        let relations = self
            .evaluation
            .relations
            .then(|| RelationModel::new(self.relations.clone()));
        if let Some(model) = &ner {
            model.check_training_data(train)?;
        }
        if let Some(model) = &relations {
            model.check_training_data(train, &pipelines.pair)?;
        }

        if let Some(model) = ner {
            let model = model.train(train, &pipelines.token)?;
            let mut scores = EvaluationReport::new();
            for document in test {
                let predicted = model.predict(&document.stripped(), &pipelines.token)?;
                scores.merge(&evaluator.evaluate_entities(document, &predicted));
            }
            report.entities = Some(scores);
        }

        if let Some(model) = relations {
            let model = model.train(train, &pipelines.pair)?;
            let mut scores = EvaluationReport::new();
            for document in test {
                let predicted = model.predict(document, &pipelines.pair)?;
                scores.merge(&evaluator.evaluate_relations(document, &predicted));
            }
            report.relations = Some(scores);
        }

        tracing::info!(fold, train = train.len(), test = test.len(), "fold finished");
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
