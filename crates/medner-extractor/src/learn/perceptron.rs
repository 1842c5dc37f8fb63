//! Averaged perceptrons
//!
//! - [`StructuredPerceptron`]: first-order sequence model decoded with
//!   Viterbi over emission and transition scores.
//! - [`AveragedPerceptron`]: multiclass linear classifier.
//!
//! Both average their weights over every update step, iterate the training
//! data in the given order and break score ties towards the lowest label
//! index, so identical input always yields identical weights.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use medner_core::{MedError, Result};

use super::{
    LabeledExample, LabeledSequence, PairClassifier, PairLearner, SequenceLearner, SequenceTagger,
};
use crate::features::{indicators, FeatureVector};

/// Sparse row of (feature index, value)
type SparseRow = Vec<(usize, f64)>;

const BIAS: &str = "__bias__";

// ============================================================================
// Shared pieces
// ============================================================================

/// Feature name -> row index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeatureIndex {
    names: BTreeMap<String, usize>,
}

impl FeatureIndex {
    fn intern(&mut self, vector: &FeatureVector) -> SparseRow {
        indicators(vector)
            .into_iter()
            .map(|(name, value)| {
                let next = self.names.len();
                (*self.names.entry(name).or_insert(next), value)
            })
            .collect()
    }

    /// Known features only; unseen names are dropped
    fn lookup(&self, vector: &FeatureVector) -> SparseRow {
        indicators(vector)
            .into_iter()
            .filter_map(|(name, value)| self.names.get(&name).map(|&i| (i, value)))
            .collect()
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// `first` at index 0, every other label sorted
fn label_order<'a>(labels: impl Iterator<Item = &'a str>, first: Option<&'a str>) -> Vec<String> {
    let rest: BTreeSet<&str> = labels.filter(|l| Some(*l) != first).collect();
    first
        .into_iter()
        .chain(rest)
        .map(str::to_string)
        .collect()
}

/// Weights plus the running sums needed for averaging
struct Averaged {
    weights: Array2<f64>,
    totals: Array2<f64>,
    step: f64,
}

impl Averaged {
    fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            weights: Array2::zeros((rows, cols)),
            totals: Array2::zeros((rows, cols)),
            step: 1.0,
        }
    }

    fn update(&mut self, row: usize, col: usize, delta: f64) {
        self.weights[[row, col]] += delta;
        self.totals[[row, col]] += self.step * delta;
    }

    fn tick(&mut self) {
        self.step += 1.0;
    }

    fn finish(self) -> Array2<f64> {
        self.weights - self.totals / self.step
    }
}

/// Index of the largest score; ties go to the lowest index
fn argmax(scores: &Array1<f64>) -> usize {
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate() {
        if score > scores[best] {
            best = i;
        }
    }
    best
}

fn scores(weights: &Array2<f64>, row: &SparseRow) -> Array1<f64> {
    let mut scores = Array1::zeros(weights.ncols());
    for &(feature, value) in row {
        scores.scaled_add(value, &weights.row(feature));
    }
    scores
}

/// Best label sequence under first-order scores. `transitions` has one row
/// per label plus a final start row.
fn viterbi(emissions: &Array2<f64>, transitions: &Array2<f64>, rows: &[SparseRow]) -> Vec<usize> {
    let n = rows.len();
    let labels = emissions.ncols();
    if n == 0 || labels == 0 {
        return Vec::new();
    }
    let start = labels;

    let mut delta = Array2::<f64>::zeros((n, labels));
    let mut back = Array2::<usize>::zeros((n, labels));

    let first = scores(emissions, &rows[0]);
    for y in 0..labels {
        delta[[0, y]] = transitions[[start, y]] + first[y];
    }
    for t in 1..n {
        let emission = scores(emissions, &rows[t]);
        for y in 0..labels {
            let mut best = 0;
            let mut best_score = f64::NEG_INFINITY;
            for p in 0..labels {
                let score = delta[[t - 1, p]] + transitions[[p, y]];
                if score > best_score {
                    best = p;
                    best_score = score;
                }
            }
            delta[[t, y]] = best_score + emission[y];
            back[[t, y]] = best;
        }
    }

    let mut path = vec![0; n];
    path[n - 1] = argmax(&delta.row(n - 1).to_owned());
    for t in (1..n).rev() {
        path[t - 1] = back[[t, path[t]]];
    }
    path
}

fn check_epochs(epochs: usize) -> Result<()> {
    if epochs == 0 {
        return Err(MedError::InvalidConfig(
            "perceptron needs at least one epoch".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Structured perceptron
// ============================================================================

/// First-order structured perceptron for sequence labeling
#[derive(Debug, Clone)]
pub struct StructuredPerceptron {
    pub epochs: usize,
    /// Label placed first, so it wins ties
    pub outside_label: String,
}

impl StructuredPerceptron {
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            outside_label: "O".to_string(),
        }
    }

    pub fn with_outside_label(mut self, label: impl Into<String>) -> Self {
        self.outside_label = label.into();
        self
    }
}

/// Trained structured perceptron
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptronTagger {
    labels: Vec<String>,
    features: FeatureIndex,
    /// features x labels
    emissions: Array2<f64>,
    /// (labels + start) x labels
    transitions: Array2<f64>,
}

impl PerceptronTagger {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}

impl SequenceLearner for StructuredPerceptron {
    type Tagger = PerceptronTagger;

    fn fit(&self, sequences: &[LabeledSequence]) -> Result<PerceptronTagger> {
        check_epochs(self.epochs)?;
        if sequences.iter().all(|s| s.features.is_empty()) {
            return Err(MedError::InsufficientData(
                "no labeled sequences to train on".to_string(),
            ));
        }

        let labels = label_order(
            sequences.iter().flat_map(|s| s.labels.iter().map(String::as_str)),
            Some(self.outside_label.as_str()),
        );
        let label_index: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();

        let mut index = FeatureIndex::default();
        let mut data: Vec<(Vec<SparseRow>, Vec<usize>)> = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if sequence.features.len() != sequence.labels.len() {
                return Err(MedError::InvalidConfig(format!(
                    "sequence has {} feature vectors but {} labels",
                    sequence.features.len(),
                    sequence.labels.len()
                )));
            }
            let rows = sequence.features.iter().map(|v| index.intern(v)).collect();
            let gold = sequence
                .labels
                .iter()
                .map(|l| label_index[l.as_str()])
                .collect();
            data.push((rows, gold));
        }

        let n_labels = labels.len();
        let mut emissions = Averaged::zeros(index.len(), n_labels);
        let mut transitions = Averaged::zeros(n_labels + 1, n_labels);

        for epoch in 0..self.epochs {
            let mut mistakes = 0;
            for (rows, gold) in &data {
                let predicted = viterbi(&emissions.weights, &transitions.weights, rows);
                if predicted != *gold {
                    mistakes += 1;
                    for t in 0..rows.len() {
                        let (g, p) = (gold[t], predicted[t]);
                        if g != p {
                            for &(f, v) in &rows[t] {
                                emissions.update(f, g, v);
                                emissions.update(f, p, -v);
                            }
                        }
                        let prev_g = if t == 0 { n_labels } else { gold[t - 1] };
                        let prev_p = if t == 0 { n_labels } else { predicted[t - 1] };
                        if (prev_g, g) != (prev_p, p) {
                            transitions.update(prev_g, g, 1.0);
                            transitions.update(prev_p, p, -1.0);
                        }
                    }
                }
                emissions.tick();
                transitions.tick();
            }
            tracing::debug!(epoch, mistakes, sequences = data.len(), "structured perceptron epoch");
            if mistakes == 0 {
                break;
            }
        }

        Ok(PerceptronTagger {
            labels,
            features: index,
            emissions: emissions.finish(),
            transitions: transitions.finish(),
        })
    }
}

impl SequenceTagger for PerceptronTagger {
    fn tag(&self, sequence: &[FeatureVector]) -> Vec<String> {
        let rows: Vec<SparseRow> = sequence.iter().map(|v| self.features.lookup(v)).collect();
        viterbi(&self.emissions, &self.transitions, &rows)
            .into_iter()
            .map(|i| self.labels[i].clone())
            .collect()
    }
}

// ============================================================================
// Multiclass perceptron
// ============================================================================

/// Multiclass averaged perceptron
#[derive(Debug, Clone)]
pub struct AveragedPerceptron {
    pub epochs: usize,
    /// Label placed first, so it wins ties and untrained scores
    pub default_label: Option<String>,
}

impl AveragedPerceptron {
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            default_label: None,
        }
    }

    pub fn with_default_label(mut self, label: impl Into<String>) -> Self {
        self.default_label = Some(label.into());
        self
    }
}

/// Trained multiclass perceptron
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptronClassifier {
    labels: Vec<String>,
    features: FeatureIndex,
    /// features x labels
    weights: Array2<f64>,
}

impl PerceptronClassifier {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn row(&self, features: &FeatureVector) -> SparseRow {
        let mut row = self.features.lookup(features);
        if let Some(&bias) = self.features.names.get(BIAS) {
            row.push((bias, 1.0));
        }
        row
    }

    /// Score of every label, in label order
    pub fn scores(&self, features: &FeatureVector) -> Vec<(&str, f64)> {
        let scores = scores(&self.weights, &self.row(features));
        self.labels
            .iter()
            .map(String::as_str)
            .zip(scores.iter().copied())
            .collect()
    }
}

impl PairLearner for AveragedPerceptron {
    type Classifier = PerceptronClassifier;

    fn fit(&self, examples: &[LabeledExample]) -> Result<PerceptronClassifier> {
        check_epochs(self.epochs)?;
        if examples.is_empty() {
            return Err(MedError::InsufficientData(
                "no labeled examples to train on".to_string(),
            ));
        }

        let labels = label_order(
            examples.iter().map(|e| e.label.as_str()),
            self.default_label.as_deref(),
        );
        let label_index: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();

        let mut index = FeatureIndex::default();
        let bias = index.names.len();
        index.names.insert(BIAS.to_string(), bias);
        let data: Vec<(SparseRow, usize)> = examples
            .iter()
            .map(|e| {
                let mut row = index.intern(&e.features);
                row.push((bias, 1.0));
                (row, label_index[e.label.as_str()])
            })
            .collect();

        let mut weights = Averaged::zeros(index.len(), labels.len());
        for epoch in 0..self.epochs {
            let mut mistakes = 0;
            for (row, gold) in &data {
                let predicted = argmax(&scores(&weights.weights, row));
                if predicted != *gold {
                    mistakes += 1;
                    for &(f, v) in row {
                        weights.update(f, *gold, v);
                        weights.update(f, predicted, -v);
                    }
                }
                weights.tick();
            }
            tracing::debug!(epoch, mistakes, examples = data.len(), "perceptron epoch");
            if mistakes == 0 {
                break;
            }
        }

        Ok(PerceptronClassifier {
            labels,
            features: index,
            weights: weights.finish(),
        })
    }
}

impl PairClassifier for PerceptronClassifier {
    fn classify(&self, features: &FeatureVector) -> String {
        let scores = scores(&self.weights, &self.row(features));
        self.labels[argmax(&scores)].clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
