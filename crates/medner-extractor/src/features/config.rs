//! Declarative pipeline configuration
//!
//! Read from the `[features]` table of the medner TOML file and embedded in
//! every model artifact, so inference rebuilds exactly the pipeline the model
//! was trained with.
//!
//! ```toml
//! [features]
//! max_token_distance = 8
//!
//! [[features.token_features]]
//! kind = "word_form"
//! window = 2
//!
//! [[features.token_features]]
//! kind = "sentence_boundary"
//!
//! [[features.pair_features]]
//! kind = "entity_types"
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use medner_core::{Lexicon, MedError, Result};

use super::pair::{
    EndpointLexicon, EntitiesBetween, EntityText, EntityTypes, SameSentence, TokenDistance,
    WordsBetween,
};
use super::token::{
    Affixes, Dependency, Lemma, LexiconTags, PartOfSpeech, SentenceBoundary, Shape,
    UnitOfMeasure, WordForm,
};
use super::{CandidatePolicy, PairFeature, PairPipeline, TokenFeature, TokenPipeline};

/// Word form context on each side of a token in the default pipeline
pub const DEFAULT_WORD_WINDOW: usize = 5;

/// Token extractor unit declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenFeatureSpec {
    WordForm { window: usize },
    Shape { window: usize },
    Affixes { lengths: Vec<usize> },
    PartOfSpeech { window: usize },
    Lemma { window: usize },
    Lexicon { window: usize },
    UnitOfMeasure { window: usize },
    SentenceBoundary,
    Dependency,
}

impl TokenFeatureSpec {
    fn build(&self) -> Box<dyn TokenFeature> {
        match self {
            Self::WordForm { window } => Box::new(WordForm { window: *window }),
            Self::Shape { window } => Box::new(Shape { window: *window }),
            Self::Affixes { lengths } => Box::new(Affixes {
                lengths: lengths.clone(),
            }),
            Self::PartOfSpeech { window } => Box::new(PartOfSpeech { window: *window }),
            Self::Lemma { window } => Box::new(Lemma { window: *window }),
            Self::Lexicon { window } => Box::new(LexiconTags { window: *window }),
            Self::UnitOfMeasure { window } => Box::new(UnitOfMeasure { window: *window }),
            Self::SentenceBoundary => Box::new(SentenceBoundary),
            Self::Dependency => Box::new(Dependency),
        }
    }
}

/// Pair extractor unit declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairFeatureSpec {
    EntityTypes,
    TokenDistance,
    WordsBetween,
    EntityText,
    EntitiesBetween,
    SameSentence,
    EndpointLexicon,
}

impl PairFeatureSpec {
    fn build(&self) -> Box<dyn PairFeature> {
        match self {
            Self::EntityTypes => Box::new(EntityTypes),
            Self::TokenDistance => Box::new(TokenDistance),
            Self::WordsBetween => Box::new(WordsBetween),
            Self::EntityText => Box::new(EntityText),
            Self::EntitiesBetween => Box::new(EntitiesBetween),
            Self::SameSentence => Box::new(SameSentence),
            Self::EndpointLexicon => Box::new(EndpointLexicon),
        }
    }
}

/// Both pipelines and the relation candidate policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Token units, in extraction order
    pub token_features: Vec<TokenFeatureSpec>,

    /// Pair units, in extraction order
    pub pair_features: Vec<PairFeatureSpec>,

    /// Maximum number of tokens between the entities of a candidate pair
    pub max_token_distance: usize,

    /// Only pair entities of the same sentence
    pub same_sentence_only: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_features: vec![
                TokenFeatureSpec::WordForm {
                    window: DEFAULT_WORD_WINDOW,
                },
                TokenFeatureSpec::Shape { window: 1 },
                TokenFeatureSpec::Affixes {
                    lengths: vec![2, 3],
                },
                TokenFeatureSpec::PartOfSpeech { window: 1 },
                TokenFeatureSpec::Lemma { window: 0 },
                TokenFeatureSpec::Lexicon { window: 1 },
                TokenFeatureSpec::UnitOfMeasure { window: 1 },
                TokenFeatureSpec::SentenceBoundary,
                TokenFeatureSpec::Dependency,
            ],
            pair_features: vec![
                PairFeatureSpec::EntityTypes,
                PairFeatureSpec::TokenDistance,
                PairFeatureSpec::WordsBetween,
                PairFeatureSpec::EntityText,
                PairFeatureSpec::EntitiesBetween,
                PairFeatureSpec::SameSentence,
                PairFeatureSpec::EndpointLexicon,
            ],
            max_token_distance: CandidatePolicy::default().max_token_distance,
            same_sentence_only: false,
        }
    }
}

#[derive(Deserialize)]
struct FeaturesSection {
    #[serde(default)]
    features: PipelineConfig,
}

impl PipelineConfig {
    /// Read the `[features]` table of a TOML file; a missing table yields
    /// the default pipeline
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| MedError::io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let section: FeaturesSection = toml::from_str(content)
            .map_err(|e| MedError::InvalidConfig(format!("features: {e}")))?;
        Ok(section.features)
    }

    pub fn candidate_policy(&self) -> CandidatePolicy {
        CandidatePolicy {
            max_token_distance: self.max_token_distance,
            same_sentence_only: self.same_sentence_only,
        }
    }

    pub fn token_pipeline(&self, lexicon: Arc<Lexicon>) -> Result<TokenPipeline> {
        let units = self.token_features.iter().map(TokenFeatureSpec::build).collect();
        TokenPipeline::new(units, lexicon)
    }

    pub fn pair_pipeline(&self, lexicon: Arc<Lexicon>) -> Result<PairPipeline> {
        let units = self.pair_features.iter().map(PairFeatureSpec::build).collect();
        PairPipeline::new(units, lexicon, self.candidate_policy())
    }

    /// Build both pipelines over a shared lexicon
    pub fn build(&self, lexicon: Arc<Lexicon>) -> Result<Pipelines> {
        Ok(Pipelines {
            token: self.token_pipeline(Arc::clone(&lexicon))?,
            pair: self.pair_pipeline(lexicon)?,
        })
    }
}

/// Token and pair pipelines built from one [`PipelineConfig`]
pub struct Pipelines {
    pub token: TokenPipeline,
    pub pair: PairPipeline,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipelines_build() {
        let pipelines = PipelineConfig::default()
            .build(Arc::new(Lexicon::new()))
            .unwrap();
        let names = pipelines.token.feature_names();
        assert!(names.contains(&"+0:lower".to_string()));
        assert!(names.contains(&"-5:lower".to_string()));
        assert!(names.contains(&"+5:lower".to_string()));
        assert!(!names.contains(&"+6:lower".to_string()));
        assert!(pipelines.pair.feature_names().contains(&"type_pair".to_string()));
        assert_eq!(pipelines.pair.candidate_policy().max_token_distance, 10);
    }

    #[test]
    fn test_from_toml_section() {
        let config = PipelineConfig::from_toml(
            r#"
            [ingest]
            strict = true

            [features]
            max_token_distance = 4
            pair_features = [{ kind = "entity_types" }, { kind = "same_sentence" }]

            [[features.token_features]]
            kind = "word_form"
            window = 1

            [[features.token_features]]
            kind = "sentence_boundary"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_token_distance, 4);
        assert_eq!(
            config.token_features,
            vec![
                TokenFeatureSpec::WordForm { window: 1 },
                TokenFeatureSpec::SentenceBoundary
            ]
        );
        assert_eq!(config.pair_features.len(), 2);
    }

    #[test]
    fn test_missing_section_is_default() {
        let config = PipelineConfig::from_toml("[ingest]\nstrict = false\n").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_repeated_unit_is_duplicate() {
        let config = PipelineConfig {
            token_features: vec![
                TokenFeatureSpec::Shape { window: 1 },
                TokenFeatureSpec::Shape { window: 0 },
            ],
            ..Default::default()
        };
        assert!(matches!(
            config.token_pipeline(Arc::new(Lexicon::new())),
            Err(MedError::DuplicateFeatureName { .. })
        ));
    }
}
