//! Learner seams
//!
//! The models never depend on a particular learning algorithm. A sequence
//! learner turns labeled token sequences into a tagger; a pair learner turns
//! labeled feature vectors into a classifier. Both defaults are averaged
//! perceptrons.

use serde::{Deserialize, Serialize};

use medner_core::Result;

use crate::features::FeatureVector;

pub mod perceptron;

pub use perceptron::{
    AveragedPerceptron, PerceptronClassifier, PerceptronTagger, StructuredPerceptron,
};

/// One training sequence (usually a sentence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSequence {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<String>,
}

/// One training example for pair classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: String,
}

/// Trains a [`SequenceTagger`]
pub trait SequenceLearner {
    type Tagger: SequenceTagger;

    fn fit(&self, sequences: &[LabeledSequence]) -> Result<Self::Tagger>;
}

/// Assigns one label per element of a sequence
pub trait SequenceTagger: Send + Sync {
    fn tag(&self, sequence: &[FeatureVector]) -> Vec<String>;
}

/// Trains a [`PairClassifier`]
pub trait PairLearner {
    type Classifier: PairClassifier;

    fn fit(&self, examples: &[LabeledExample]) -> Result<Self::Classifier>;
}

/// Assigns a single label to a feature vector
pub trait PairClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> String;
}
