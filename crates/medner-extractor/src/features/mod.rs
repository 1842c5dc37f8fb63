//! Feature extraction pipeline
//!
//! A pipeline is an ordered list of extractor units. Token units describe a
//! single token for sequence labeling; pair units describe an ordered pair of
//! entities for relation classification. Every unit declares the keys it may
//! emit, and the pipeline refuses to build when two units claim the same key.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use medner_core::{Document, EntityId, Lexicon, MedError, Result, Span};

pub mod config;
pub mod pair;
pub mod token;

pub use config::{PairFeatureSpec, PipelineConfig, Pipelines, TokenFeatureSpec};

// ============================================================================
// Feature values
// ============================================================================

/// A single feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
    Flag(bool),
}

impl FeatureValue {
    /// Sparse (name, value) pair seen by a linear learner.
    ///
    /// Categorical values become indicator features `key=value`; false
    /// flags and zero numerics contribute nothing.
    pub fn indicator(&self, key: &str) -> Option<(String, f64)> {
        match self {
            Self::Numeric(v) if *v != 0.0 => Some((key.to_string(), *v)),
            Self::Numeric(_) => None,
            Self::Categorical(v) => Some((format!("{key}={v}"), 1.0)),
            Self::Flag(true) => Some((key.to_string(), 1.0)),
            Self::Flag(false) => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        Self::Categorical(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Categorical(v.to_string())
    }
}

/// Feature key -> value, ordered by key
pub type FeatureVector = BTreeMap<String, FeatureValue>;

/// Expand a feature vector into the sparse indicators used by the learners
pub fn indicators(vector: &FeatureVector) -> Vec<(String, f64)> {
    vector
        .iter()
        .filter_map(|(key, value)| value.indicator(key))
        .collect()
}

// ============================================================================
// Extractor units
// ============================================================================

/// What every extractor unit declares
pub trait FeatureUnit: Send + Sync {
    /// Unit name, used in error messages
    fn name(&self) -> &str;

    /// Every key this unit may emit
    fn feature_names(&self) -> Vec<String>;
}

/// Context handed to token units
#[derive(Clone, Copy)]
pub struct TokenContext<'a> {
    pub document: &'a Document,
    /// Index of the token being described
    pub index: usize,
    pub lexicon: &'a Lexicon,
}

/// Context handed to pair units
#[derive(Clone, Copy)]
pub struct PairContext<'a> {
    pub document: &'a Document,
    pub source: EntityId,
    pub target: EntityId,
    pub lexicon: &'a Lexicon,
}

/// Unit describing one token (NER mode)
pub trait TokenFeature: FeatureUnit {
    fn extract(&self, context: &TokenContext<'_>) -> FeatureVector;
}

/// Unit describing an ordered entity pair (RE mode)
pub trait PairFeature: FeatureUnit {
    fn extract(&self, context: &PairContext<'_>) -> FeatureVector;
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered extractor units plus the lexicon they read
pub struct FeaturePipeline<U: ?Sized> {
    units: Vec<Box<U>>,
    lexicon: Arc<Lexicon>,
}

/// Pipeline of token units
pub type TokenPipeline = FeaturePipeline<dyn TokenFeature>;

impl<U: FeatureUnit + ?Sized> FeaturePipeline<U> {
    /// Build a pipeline, rejecting units that declare the same key
    pub fn new(units: Vec<Box<U>>, lexicon: Arc<Lexicon>) -> Result<Self> {
        let mut owners: HashMap<String, &str> = HashMap::new();
        for unit in &units {
            for name in unit.feature_names() {
                if let Some(first) = owners.get(&name) {
                    return Err(MedError::DuplicateFeatureName {
                        name,
                        first: first.to_string(),
                        second: unit.name().to_string(),
                    });
                }
                owners.insert(name, unit.name());
            }
        }
        tracing::debug!(units = units.len(), keys = owners.len(), "feature pipeline built");
        Ok(Self { units, lexicon })
    }

    /// Declared keys of every unit, in unit order
    pub fn feature_names(&self) -> Vec<String> {
        self.units.iter().flat_map(|u| u.feature_names()).collect()
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    pub fn lexicon(&self) -> &Arc<Lexicon> {
        &self.lexicon
    }
}

impl TokenPipeline {
    /// Features of token `index`
    pub fn extract(&self, document: &Document, index: usize) -> FeatureVector {
        let context = TokenContext {
            document,
            index,
            lexicon: &self.lexicon,
        };
        let mut vector = FeatureVector::new();
        for unit in &self.units {
            vector.extend(unit.extract(&context));
        }
        vector
    }

    /// Features of every token of the document, in token order
    pub fn extract_tokens(&self, document: &Document) -> Vec<FeatureVector> {
        (0..document.tokens().len())
            .map(|index| self.extract(document, index))
            .collect()
    }

    /// Features of many documents, computed in parallel
    pub fn extract_batch(&self, documents: &[Document]) -> Vec<Vec<FeatureVector>> {
        documents
            .par_iter()
            .map(|document| self.extract_tokens(document))
            .collect()
    }
}

/// Which entity pairs become relation candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePolicy {
    /// Maximum number of tokens strictly between the two entities
    pub max_token_distance: usize,
    /// Only pair entities of the same sentence
    pub same_sentence_only: bool,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            max_token_distance: 10,
            same_sentence_only: false,
        }
    }
}

/// Pipeline of pair units plus the candidate policy
pub struct PairPipeline {
    features: FeaturePipeline<dyn PairFeature>,
    candidates: CandidatePolicy,
}

impl PairPipeline {
    pub fn new(
        units: Vec<Box<dyn PairFeature>>,
        lexicon: Arc<Lexicon>,
        candidates: CandidatePolicy,
    ) -> Result<Self> {
        Ok(Self {
            features: FeaturePipeline::new(units, lexicon)?,
            candidates,
        })
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.feature_names()
    }

    pub fn candidate_policy(&self) -> CandidatePolicy {
        self.candidates
    }

    /// Ordered entity pairs within the candidate policy, sorted by
    /// (source, target) position
    pub fn candidates(&self, document: &Document) -> Vec<(EntityId, EntityId)> {
        let entities: Vec<_> = document.entities_by_position().collect();
        let mut pairs = Vec::new();
        for &(source, a) in &entities {
            for &(target, b) in &entities {
                if source == target {
                    continue;
                }
                let Some(gap) = document.token_gap(a.span, b.span) else {
                    continue;
                };
                if gap > self.candidates.max_token_distance {
                    continue;
                }
                if self.candidates.same_sentence_only && !same_sentence(document, a.span, b.span)
                {
                    continue;
                }
                pairs.push((source, target));
            }
        }
        pairs
    }

    /// Features of one ordered pair
    pub fn extract(&self, document: &Document, source: EntityId, target: EntityId) -> FeatureVector {
        let context = PairContext {
            document,
            source,
            target,
            lexicon: &self.features.lexicon,
        };
        let mut vector = FeatureVector::new();
        for unit in &self.features.units {
            vector.extend(unit.extract(&context));
        }
        vector
    }
}

/// Whether both spans start in the same sentence
pub(crate) fn same_sentence(document: &Document, a: Span, b: Span) -> bool {
    let sentence = |span: Span| {
        document
            .token_range_for(span)
            .and_then(|range| document.sentence_of(range.start))
    };
    match (sentence(a), sentence(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
