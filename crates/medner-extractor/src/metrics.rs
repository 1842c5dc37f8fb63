//! Quality Metrics module
//!
//! Per-label precision, recall and F1 for entity and relation predictions,
//! with micro and macro aggregates. Matching is exact: an entity matches on
//! (span, label), a relation on (source span, target span, label).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use medner_core::{Document, Entity, Relation, Span};

// ============================================================================
// Label Metrics
// ============================================================================

/// Confusion counts of a single label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMetrics {
    /// Predictions matching a gold item
    pub true_positives: usize,
    /// Predictions without a gold counterpart
    pub false_positives: usize,
    /// Gold items that were not predicted
    pub false_negatives: usize,
}

impl LabelMetrics {
    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Number of gold items
    pub fn support(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    /// Number of predicted items
    pub fn predicted(&self) -> usize {
        self.true_positives + self.false_positives
    }

    pub fn add(&mut self, other: &LabelMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

/// Averaged precision/recall/F1
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub precision: f32,
    pub recall: f32,
    pub f1_score: f32,
}

// ============================================================================
// Evaluation Report
// ============================================================================

/// Per-label counts for one kind of prediction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub labels: BTreeMap<String, LabelMetrics>,
}

impl EvaluationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self, label: &str) -> Option<&LabelMetrics> {
        self.labels.get(label)
    }

    fn entry(&mut self, label: &str) -> &mut LabelMetrics {
        self.labels.entry(label.to_string()).or_default()
    }

    /// Add the counts of another report
    pub fn merge(&mut self, other: &EvaluationReport) {
        for (label, metrics) in &other.labels {
            self.entry(label).add(metrics);
        }
    }

    /// Counts summed over all labels
    pub fn totals(&self) -> LabelMetrics {
        let mut total = LabelMetrics::default();
        for metrics in self.labels.values() {
            total.add(metrics);
        }
        total
    }

    /// Scores of the summed counts
    pub fn micro(&self) -> Scores {
        let total = self.totals();
        Scores {
            precision: total.precision(),
            recall: total.recall(),
            f1_score: total.f1_score(),
        }
    }

    /// Unweighted mean of the per-label scores
    pub fn macro_average(&self) -> Scores {
        if self.labels.is_empty() {
            return Scores::default();
        }
        let n = self.labels.len() as f32;
        let sum = |f: fn(&LabelMetrics) -> f32| self.labels.values().map(f).sum::<f32>() / n;
        Scores {
            precision: sum(LabelMetrics::precision),
            recall: sum(LabelMetrics::recall),
            f1_score: sum(LabelMetrics::f1_score),
        }
    }

    /// Print a summary table
    pub fn report(&self, title: &str) -> String {
        let mut out = format!("{title}:\n");
        for (label, m) in &self.labels {
            out.push_str(&format!(
                "  {label:<20} P: {:>5.1}%  R: {:>5.1}%  F1: {:>5.1}%  Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n",
                m.precision() * 100.0,
                m.recall() * 100.0,
                m.f1_score() * 100.0,
                m.support(),
                m.predicted(),
                m.true_positives,
                m.false_positives,
                m.false_negatives,
            ));
        }
        let micro = self.micro();
        let macro_avg = self.macro_average();
        out.push_str(&format!(
            "  {:<20} P: {:>5.1}%  R: {:>5.1}%  F1: {:>5.1}%\n\
             \x20 {:<20} P: {:>5.1}%  R: {:>5.1}%  F1: {:>5.1}%\n",
            "micro avg",
            micro.precision * 100.0,
            micro.recall * 100.0,
            micro.f1_score * 100.0,
            "macro avg",
            macro_avg.precision * 100.0,
            macro_avg.recall * 100.0,
            macro_avg.f1_score * 100.0,
        ));
        out
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Compares predictions against the gold layer of a document
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    fn score<'a, K: Eq + std::hash::Hash + Clone>(
        gold: &[(K, &'a str)],
        predicted: &[(K, &'a str)],
    ) -> EvaluationReport {
        let gold_set: HashSet<(K, &'a str)> = gold.iter().cloned().collect();
        let predicted_set: HashSet<(K, &'a str)> = predicted.iter().cloned().collect();

        let mut report = EvaluationReport::new();
        for item in &predicted_set {
            let entry = report.entry(item.1);
            if gold_set.contains(item) {
                entry.true_positives += 1;
            } else {
                entry.false_positives += 1;
            }
        }
        for item in gold_set.difference(&predicted_set) {
            report.entry(item.1).false_negatives += 1;
        }
        report
    }

    /// Score predicted entities against the gold entities of `gold`
    pub fn evaluate_entities(&self, gold: &Document, predicted: &[Entity]) -> EvaluationReport {
        let gold_items: Vec<(Span, &str)> = gold
            .entities()
            .map(|(_, e)| (e.span, e.label.as_str()))
            .collect();
        let predicted_items: Vec<(Span, &str)> = predicted
            .iter()
            .map(|e| (e.span, e.label.as_str()))
            .collect();
        Self::score(&gold_items, &predicted_items)
    }

    /// Score predicted relations over the entities of `gold` against its
    /// gold relations
    pub fn evaluate_relations(&self, gold: &Document, predicted: &[Relation]) -> EvaluationReport {
        let endpoints = |relation: &Relation| {
            let source = gold.entity(relation.source)?.span;
            let target = gold.entity(relation.target)?.span;
            Some((source, target))
        };
        let gold_items: Vec<((Span, Span), &str)> = gold
            .relations()
            .filter_map(|(_, r)| endpoints(r).map(|k| (k, r.label.as_str())))
            .collect();
        let predicted_items: Vec<((Span, Span), &str)> = predicted
            .iter()
            .filter_map(|r| endpoints(r).map(|k| (k, r.label.as_str())))
            .collect();
        Self::score(&gold_items, &predicted_items)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use medner_core::EntityId;

    fn gold() -> (Document, EntityId, EntityId) {
        let mut doc = Document::new("note", "Patient received 5 mg of aspirin.");
        let dose = doc.add_entity(Span::new(17, 21), "DOSAGE").unwrap();
        let drug = doc.add_entity(Span::new(25, 32), "MEDICATION").unwrap();
        doc.add_relation(dose, drug, "dosage_of").unwrap();
        (doc, dose, drug)
    }

    #[test]
    fn test_label_metrics() {
        let m = LabelMetrics {
            true_positives: 8,
            false_positives: 2,
            false_negatives: 8,
        };
        assert!((m.precision() - 0.8).abs() < 0.001);
        assert!((m.recall() - 0.5).abs() < 0.001);
        assert!((m.f1_score() - 0.615).abs() < 0.01);
        assert_eq!(m.support(), 16);
        assert_eq!(LabelMetrics::default().f1_score(), 0.0);
    }

    #[test]
    fn test_evaluate_entities_exact_match() {
        let (doc, _, _) = gold();
        let predicted = vec![
            Entity::predicted(Span::new(17, 21), "DOSAGE"),
            // right span, wrong label
            Entity::predicted(Span::new(25, 32), "DOSAGE"),
            // boundary mismatch
            Entity::predicted(Span::new(17, 19), "DOSAGE"),
        ];
        let report = Evaluator::new().evaluate_entities(&doc, &predicted);

        let dosage = report.label("DOSAGE").unwrap();
        assert_eq!(dosage.true_positives, 1);
        assert_eq!(dosage.false_positives, 2);
        assert_eq!(dosage.false_negatives, 0);

        let medication = report.label("MEDICATION").unwrap();
        assert_eq!(medication.false_negatives, 1);
        assert_eq!(medication.predicted(), 0);

        let totals = report.totals();
        assert_eq!((totals.true_positives, totals.false_positives, totals.false_negatives), (1, 2, 1));
    }

    #[test]
    fn test_evaluate_relations_by_span() {
        let (doc, dose, drug) = gold();
        let reversed = Relation::new(drug, dose, "dosage_of");
        let report = Evaluator::new().evaluate_relations(&doc, &[reversed]);
        let m = report.label("dosage_of").unwrap();
        assert_eq!((m.true_positives, m.false_positives, m.false_negatives), (0, 1, 1));

        let exact = Relation::new(dose, drug, "dosage_of");
        let report = Evaluator::new().evaluate_relations(&doc, &[exact]);
        assert_eq!(report.micro().f1_score, 1.0);
    }

    #[test]
    fn test_micro_and_macro() {
        let mut report = EvaluationReport::new();
        report.labels.insert(
            "A".to_string(),
            LabelMetrics {
                true_positives: 9,
                false_positives: 1,
                false_negatives: 0,
            },
        );
        report.labels.insert(
            "B".to_string(),
            LabelMetrics {
                true_positives: 0,
                false_positives: 0,
                false_negatives: 1,
            },
        );
        assert!((report.micro().precision - 0.9).abs() < 0.001);
        assert!((report.macro_average().precision - 0.45).abs() < 0.001);

        let mut merged = report.clone();
        merged.merge(&report);
        assert_eq!(merged.label("A").unwrap().true_positives, 18);

        let text = report.report("Entities");
        assert!(text.contains("micro avg"));
        assert!(text.contains("TP: 9"));
    }
}
