//! medner Extractor - Feature extraction, NER and relation extraction
//!
//! - Linguistic annotation of documents ([`annotator`])
//! - Declarative feature pipelines ([`features`])
//! - Pluggable learners with averaged perceptron defaults ([`learn`])
//! - NER and relation models, metrics and cross-validation
//! - Persisted model artifacts ([`artifact`])

pub mod annotator;
pub mod artifact;
pub mod evaluation;
pub mod features;
pub mod learn;
pub mod metrics;
pub mod ner;
pub mod relation;
pub mod units;

pub use annotator::{Analysis, AnnotatorAdapter, LinguisticAnnotator, RuleBasedAnnotator};
pub use artifact::{ModelArtifact, FORMAT_VERSION};
pub use evaluation::{CrossValidationReport, CrossValidator, FoldReport};
pub use features::{
    CandidatePolicy, FeaturePipeline, FeatureUnit, FeatureValue, FeatureVector, PairContext,
    PairFeature, PairFeatureSpec, PairPipeline, PipelineConfig, Pipelines, TokenContext,
    TokenFeature, TokenFeatureSpec, TokenPipeline,
};
pub use learn::{
    AveragedPerceptron, LabeledExample, LabeledSequence, PairClassifier, PairLearner,
    PerceptronClassifier, PerceptronTagger, SequenceLearner, SequenceTagger, StructuredPerceptron,
};
pub use metrics::{EvaluationReport, Evaluator, LabelMetrics, Scores};
pub use ner::NerModel;
pub use relation::RelationModel;
