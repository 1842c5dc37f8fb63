//! medner Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with defaults suitable for small clinical corpora.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::document::OverlapPolicy;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MedConfig {
    /// Annotation ingestion
    pub ingest: IngestConfig,

    /// NER model training
    pub ner: NerConfig,

    /// Relation model training
    pub relations: RelationConfig,

    /// Cross-validation
    pub evaluation: EvaluationConfig,

    /// Optional lexicon file (TSV)
    pub lexicon_path: Option<PathBuf>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl MedConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(env_var)?;
        Ok(config)
    }

    /// Set every value whose variable `var` returns, whatever the current
    /// value is
    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(strict) = var("MEDNER_STRICT") {
            self.ingest.strict = parse_bool("MEDNER_STRICT", &strict)?;
        }
        if let Some(policy) = var("MEDNER_OVERLAP_POLICY") {
            self.ingest.overlap_policy =
                policy.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MEDNER_OVERLAP_POLICY".to_string(),
                    value: policy,
                })?;
        }

        if let Some(epochs) = var("MEDNER_EPOCHS") {
            let epochs = parse_usize("MEDNER_EPOCHS", &epochs)?;
            self.ner.epochs = epochs;
            self.relations.epochs = epochs;
        }
        if let Some(folds) = var("MEDNER_FOLDS") {
            self.evaluation.folds = parse_usize("MEDNER_FOLDS", &folds)?;
        }

        if let Some(path) = var("MEDNER_LEXICON") {
            self.lexicon_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            self.logging.json_format = parse_bool("LOG_JSON", &json)?;
        }
        Ok(())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(env_var)?;
        self.validate()?;
        Ok(self)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ner.epochs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ner.epochs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.relations.epochs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "relations.epochs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.relations.negative_label.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "relations.negative_label".to_string(),
            ));
        }
        if self.evaluation.folds < 2 {
            return Err(ConfigError::InvalidValue {
                key: "evaluation.folds".to_string(),
                value: self.evaluation.folds.to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Annotation ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Abort a document on its first malformed record instead of skipping it
    pub strict: bool,

    /// Handling of overlapping entities with different types
    pub overlap_policy: OverlapPolicy,
}

/// NER training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    /// Minimum number of tokens inside gold entities
    pub min_labeled_tokens: usize,

    /// Passes over the training data
    pub epochs: usize,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            min_labeled_tokens: 1,
            epochs: 10,
        }
    }
}

/// Relation extraction training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    /// Passes over the training data
    pub epochs: usize,

    /// Label of the "no relation" class
    pub negative_label: String,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            negative_label: "NONE".to_string(),
        }
    }
}

/// Cross-validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Number of folds
    pub folds: usize,

    /// Train and score the NER model in each fold
    pub ner: bool,

    /// Train and score the relation model in each fold
    pub relations: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            ner: true,
            relations: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MedConfig::default();
        assert!(!config.ingest.strict);
        assert_eq!(config.ingest.overlap_policy, OverlapPolicy::Allow);
        assert_eq!(config.relations.negative_label, "NONE");
        assert_eq!(config.evaluation.folds, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[ingest]\nstrict = true\noverlap_policy = \"reject\"\n\n[evaluation]\nfolds = 3\n"
        )
        .unwrap();

        let config = MedConfig::from_file(file.path()).unwrap();
        assert!(config.ingest.strict);
        assert_eq!(config.ingest.overlap_policy, OverlapPolicy::Reject);
        assert_eq!(config.evaluation.folds, 3);
        assert_eq!(config.ner.epochs, 10);
    }

    #[test]
    fn test_invalid_folds_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[evaluation]\nfolds = 1\n").unwrap();
        let err = MedConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ingest\nstrict = ").unwrap();
        let err = MedConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_overrides_reset_file_values_to_defaults() {
        let mut config: MedConfig = toml::from_str(
            "[ingest]\nstrict = true\noverlap_policy = \"reject\"\n\n[logging]\nlevel = \"debug\"\njson_format = true\n",
        )
        .unwrap();
        let env = |key: &str| match key {
            "MEDNER_STRICT" => Some("false".to_string()),
            "MEDNER_OVERLAP_POLICY" => Some("allow".to_string()),
            "LOG_LEVEL" => Some("info".to_string()),
            "LOG_JSON" => Some("0".to_string()),
            _ => None,
        };
        config.apply_overrides(env).unwrap();

        assert!(!config.ingest.strict);
        assert_eq!(config.ingest.overlap_policy, OverlapPolicy::Allow);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        // unset variables leave file values alone
        assert_eq!(config.evaluation.folds, 5);
    }

    #[test]
    fn test_invalid_override_value() {
        let mut config = MedConfig::default();
        let err = config
            .apply_overrides(|key| (key == "MEDNER_FOLDS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_bool_values() {
        assert!(parse_bool("K", "yes").unwrap());
        assert!(!parse_bool("K", "0").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }
}
