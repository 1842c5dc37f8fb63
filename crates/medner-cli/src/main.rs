//! medner CLI - Command-line interface
//!
//! Usage:
//!   medner convert --from brat --to json <input> <output>
//!   medner train --format brat <corpus> <artifact>
//!   medner predict --format brat <artifact> <input> <output>
//!   medner evaluate --format brat <corpus> [--folds N]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use medner_core::{BatchReport, Document, Lexicon, LoggingConfig, MedConfig};
use medner_extractor::{
    AnnotatorAdapter, CrossValidator, ModelArtifact, PipelineConfig, RuleBasedAnnotator,
};
use medner_formats::{load_corpus, load_texts, write_corpus, FormatKind, ParseOptions};

#[derive(Parser)]
#[command(name = "medner")]
#[command(about = "Medical named entity and relation extraction")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a corpus between annotation formats
    Convert {
        #[arg(long)]
        from: FormatKind,
        #[arg(long)]
        to: FormatKind,
        input: PathBuf,
        output: PathBuf,
    },
    /// Train models and write a model artifact
    Train {
        #[arg(long, default_value = "brat")]
        format: FormatKind,
        /// Skip the NER model
        #[arg(long)]
        no_ner: bool,
        /// Skip the relation model
        #[arg(long)]
        no_relations: bool,
        corpus: PathBuf,
        artifact: PathBuf,
    },
    /// Annotate raw text files with a trained artifact
    Predict {
        /// Output format
        #[arg(long, default_value = "brat")]
        format: FormatKind,
        artifact: PathBuf,
        /// Directory of .txt files
        input: PathBuf,
        output: PathBuf,
    },
    /// Cross-validate on an annotated corpus
    Evaluate {
        #[arg(long, default_value = "brat")]
        format: FormatKind,
        #[arg(long)]
        folds: Option<usize>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        corpus: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MedConfig> {
    let config = match path {
        Some(path) => MedConfig::from_file(path)?.with_env_override()?,
        None => MedConfig::from_env()?,
    };
    Ok(config)
}

fn load_pipeline(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    Ok(match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    })
}

fn load_lexicon(config: &MedConfig) -> anyhow::Result<Arc<Lexicon>> {
    let lexicon = match &config.lexicon_path {
        Some(path) => Lexicon::load(path)
            .with_context(|| format!("loading lexicon {}", path.display()))?,
        None => Lexicon::new(),
    };
    tracing::info!(entries = lexicon.len(), "lexicon ready");
    Ok(Arc::new(lexicon))
}

fn init_tracing(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load and annotate an annotated corpus, logging every problem
fn annotated_corpus(
    dir: &Path,
    format: FormatKind,
    config: &MedConfig,
) -> anyhow::Result<Vec<Document>> {
    let report = load_corpus(dir, format, &ParseOptions::from(&config.ingest))
        .with_context(|| format!("loading corpus {}", dir.display()))?;
    let report = AnnotatorAdapter::new(RuleBasedAnnotator).annotate_report(report);
    finish(report)
}

fn finish(report: BatchReport<Document>) -> anyhow::Result<Vec<Document>> {
    report.log_problems();
    tracing::info!("{}", report.summary());
    let documents = report.into_items();
    if documents.is_empty() {
        anyhow::bail!("no usable documents");
    }
    Ok(documents)
}

/// Number of documents written; fails only when every document failed
fn written(report: BatchReport<String>) -> anyhow::Result<usize> {
    report.log_problems();
    if report.succeeded() == 0 && report.failed() > 0 {
        anyhow::bail!("no document could be written");
    }
    Ok(report.succeeded())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Convert {
            from,
            to,
            input,
            output,
        } => {
            let report = load_corpus(&input, from, &ParseOptions::from(&config.ingest))
                .with_context(|| format!("loading corpus {}", input.display()))?;
            let documents = finish(report)?;
            let count = written(write_corpus(&output, to, &documents)?)?;
            println!(
                "Converted {count} of {} document(s) from {from} to {to}",
                documents.len()
            );
        }
        Commands::Train {
            format,
            no_ner,
            no_relations,
            corpus,
            artifact,
        } => {
            let pipeline = load_pipeline(cli.config.as_deref())?;
            let lexicon = load_lexicon(&config)?;
            let documents = annotated_corpus(&corpus, format, &config)?;
            let trained = ModelArtifact::train(
                &documents,
                pipeline,
                lexicon,
                (!no_ner).then_some(&config.ner),
                (!no_relations).then_some(&config.relations),
            )?;
            trained.save(&artifact)?;
            println!(
                "Trained artifact {} on {} document(s): {}",
                trained.id,
                documents.len(),
                artifact.display()
            );
        }
        Commands::Predict {
            format,
            artifact,
            input,
            output,
        } => {
            let model = ModelArtifact::load(&artifact)?;
            let pipelines = model.pipelines(load_lexicon(&config)?)?;
            let texts = load_texts(&input, &ParseOptions::from(&config.ingest))
                .with_context(|| format!("loading texts {}", input.display()))?;
            let annotated = AnnotatorAdapter::new(RuleBasedAnnotator).annotate_report(texts);

            let (mut entities, mut relations) = (0, 0);
            let predicted = annotated.and_then(
                |document| document.name().to_string(),
                |mut document| {
                    let (e, r) = model.apply(&mut document, &pipelines)?;
                    entities += e;
                    relations += r;
                    Ok(document)
                },
            );
            let documents = finish(predicted)?;
            let count = written(write_corpus(&output, format, &documents)?)?;
            println!(
                "Predicted {entities} entities and {relations} relations, wrote {count} of {} document(s)",
                documents.len()
            );
        }
        Commands::Evaluate {
            format,
            folds,
            json,
            corpus,
        } => {
            let pipelines = load_pipeline(cli.config.as_deref())?.build(load_lexicon(&config)?)?;
            let documents = annotated_corpus(&corpus, format, &config)?;
            let mut evaluation = config.evaluation.clone();
            if let Some(folds) = folds {
                evaluation.folds = folds;
            }
            let report = CrossValidator::new(evaluation)
                .with_ner_config(config.ner.clone())
                .with_relation_config(config.relations.clone())
                .run(&documents, &pipelines)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.report());
            }
        }
    }

    Ok(())
}
