//! Corpus directories
//!
//! A corpus is a flat directory of `<name>.txt` files, each with a sibling
//! annotation file `<name>.<ext>` in the chosen format.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use medner_core::{BatchReport, Document, MedError, Result};

use crate::{AnnotationBundle, FormatKind, ParseOptions};

/// Read the text file `<dir>/<name>.txt` and its annotation file
pub fn read_bundle(dir: &Path, name: &str, kind: FormatKind) -> Result<AnnotationBundle> {
    let text_path = dir.join(format!("{name}.txt"));
    let ann_path = dir.join(format!("{name}.{}", kind.extension()));

    let text = std::fs::read_to_string(&text_path).map_err(|e| MedError::io(&text_path, e))?;
    let annotations =
        std::fs::read_to_string(&ann_path).map_err(|e| MedError::io(&ann_path, e))?;
    Ok(AnnotationBundle::new(name, text, annotations))
}

/// Sorted stems of every `.txt` file in `dir`
fn text_stems(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| MedError::io(dir, e))?;
    let mut stems = Vec::new();
    for entry in entries {
        let path: PathBuf = entry.map_err(|e| MedError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

/// Documents for every `.txt` file of `dir`, without annotations, in name
/// order. Unreadable files become failures of the batch.
pub fn load_texts(
    dir: impl AsRef<Path>,
    options: &ParseOptions,
) -> Result<BatchReport<Document>> {
    let dir = dir.as_ref();
    let stems = text_stems(dir)?;

    let texts: Vec<_> = stems
        .par_iter()
        .map(|name| {
            let path = dir.join(format!("{name}.txt"));
            std::fs::read_to_string(&path).map_err(|e| MedError::io(&path, e))
        })
        .collect();

    let mut report = BatchReport::new();
    for (name, text) in stems.into_iter().zip(texts) {
        match text {
            Ok(text) => report
                .items
                .push(Document::new(name, text).with_overlap_policy(options.overlap_policy)),
            Err(error) => report.push_failure(name, error),
        }
    }

    tracing::info!(corpus = %dir.display(), summary = %report.summary(), "raw texts loaded");
    Ok(report)
}

/// Load every document of a corpus directory.
///
/// Documents are parsed in parallel but reported in name order. A document
/// whose files cannot be read, or that fails in strict mode, becomes a
/// failure of the batch; skipped records of the other documents are
/// collected in the report.
pub fn load_corpus(
    dir: impl AsRef<Path>,
    kind: FormatKind,
    options: &ParseOptions,
) -> Result<BatchReport<Document>> {
    let dir = dir.as_ref();
    let stems = text_stems(dir)?;
    let converter = kind.converter();

    let outcomes: Vec<_> = stems
        .par_iter()
        .map(|name| {
            let bundle = read_bundle(dir, name, kind)?;
            converter.parse(&bundle, options)
        })
        .collect();

    let mut report = BatchReport::new();
    for (name, outcome) in stems.into_iter().zip(outcomes) {
        match outcome {
            Ok(outcome) => {
                report.skipped_records.extend(outcome.skipped);
                report.items.push(outcome.document);
            }
            Err(error) => report.push_failure(name, error),
        }
    }

    tracing::info!(
        corpus = %dir.display(),
        format = %kind,
        summary = %report.summary(),
        "corpus loaded"
    );
    Ok(report)
}

/// Write documents as `<name>.txt` plus `<name>.<ext>` into `dir`, creating
/// it when missing. The report holds the names of the documents written; a
/// document that cannot be serialized or written is a failure and the
/// others are still written.
pub fn write_corpus(
    dir: impl AsRef<Path>,
    kind: FormatKind,
    documents: &[Document],
) -> Result<BatchReport<String>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| MedError::io(dir, e))?;
    let converter = kind.converter();

    let mut report = BatchReport::new();
    for document in documents {
        let written = converter.serialize(document).and_then(|bundle| {
            let text_path = dir.join(format!("{}.txt", bundle.name));
            let ann_path = dir.join(format!("{}.{}", bundle.name, kind.extension()));
            std::fs::write(&text_path, &bundle.text).map_err(|e| MedError::io(&text_path, e))?;
            std::fs::write(&ann_path, &bundle.annotations)
                .map_err(|e| MedError::io(&ann_path, e))?;
            Ok(bundle.name)
        });
        match written {
            Ok(name) => report.items.push(name),
            Err(error) => report.push_failure(document.name(), error),
        }
    }

    tracing::info!(
        corpus = %dir.display(),
        format = %kind,
        summary = %report.summary(),
        "corpus written"
    );
    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use medner_core::{OverlapPolicy, Span};

    const TEXT: &str = "Patient received 5 mg of aspirin.";
    const ANN: &str = "T1\tDOSAGE 17 21\t5 mg\nT2\tMEDICATION 25 32\taspirin\nR1\tdosage_of Arg1:T1 Arg2:T2\n";

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_load_corpus_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.txt", TEXT);
        write(dir.path(), "b.ann", ANN);
        write(dir.path(), "a.txt", TEXT);
        write(dir.path(), "a.ann", "T1\tMEDICATION 25 32\taspirin\n");
        write(dir.path(), "notes.md", "ignored");

        let report = load_corpus(dir.path(), FormatKind::Brat, &ParseOptions::default()).unwrap();
        assert!(report.is_clean());
        let names: Vec<&str> = report.items.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(report.items[1].relation_count(), 1);
    }

    #[test]
    fn test_missing_annotation_file_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", TEXT);
        write(dir.path(), "a.ann", ANN);
        write(dir.path(), "orphan.txt", TEXT);

        let report = load_corpus(dir.path(), FormatKind::Brat, &ParseOptions::default()).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].item, "orphan");
        assert!(matches!(report.failures[0].error, MedError::Io { .. }));
    }

    #[test]
    fn test_one_good_one_malformed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.txt", TEXT);
        write(dir.path(), "good.ann", ANN);
        write(dir.path(), "bad.txt", TEXT);
        write(dir.path(), "bad.ann", "T1\tDOSAGE 17 21\t5 mg\nT2\tMEDICATION x y\taspirin\n");

        let report = load_corpus(dir.path(), FormatKind::Brat, &ParseOptions::default()).unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.skipped(), 1);

        let strict = load_corpus(dir.path(), FormatKind::Brat, &ParseOptions::strict()).unwrap();
        assert_eq!(strict.succeeded(), 1);
        assert_eq!(strict.failures[0].item, "bad");
    }

    #[test]
    fn test_load_texts_ignores_annotations() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.txt", TEXT);
        write(dir.path(), "b.ann", ANN);
        write(dir.path(), "a.txt", "Aspirin daily.");

        let options = ParseOptions {
            overlap_policy: OverlapPolicy::Reject,
            ..Default::default()
        };
        let report = load_texts(dir.path(), &options).unwrap();
        assert!(report.is_clean());
        let names: Vec<&str> = report.items.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(report.items.iter().all(|d| d.entity_count() == 0));
        assert!(report
            .items
            .iter()
            .all(|d| d.overlap_policy() == OverlapPolicy::Reject));
    }

    #[test]
    fn test_unreadable_text_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", TEXT);
        std::fs::write(dir.path().join("b.txt"), [0xff, 0xfe, 0x41]).unwrap();

        let report = load_texts(dir.path(), &ParseOptions::default()).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.items[0].name(), "a");
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].item, "b");
        assert!(matches!(report.failures[0].error, MedError::Io { .. }));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            load_corpus(&missing, FormatKind::Json, &ParseOptions::default()),
            Err(MedError::Io { .. })
        ));
    }

    #[test]
    fn test_write_then_load() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "note.txt", TEXT);
        write(src.path(), "note.ann", ANN);
        let docs = load_corpus(src.path(), FormatKind::Brat, &ParseOptions::default())
            .unwrap()
            .into_items();

        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("json");
        let written = write_corpus(&target, FormatKind::Json, &docs).unwrap();
        assert_eq!(written.items, vec!["note".to_string()]);
        assert!(target.join("note.json").exists());

        let reloaded = load_corpus(&target, FormatKind::Json, &ParseOptions::strict())
            .unwrap()
            .into_items();
        assert_eq!(reloaded[0].entity_count(), 2);
        assert_eq!(reloaded[0].relation_count(), 1);
    }

    #[test]
    fn test_write_continues_past_failed_documents() {
        let good = Document::new("a_ok", "Aspirin daily.");
        let mut blank = Document::new("b_blank", "Aspirin  daily.");
        // covers only the double space, so no token can represent it
        blank.add_entity(Span::new(7, 9), "GAP").unwrap();
        let mut aspirin = Document::new("c_aspirin", TEXT);
        aspirin.add_entity(Span::new(25, 32), "MEDICATION").unwrap();

        let out = tempfile::tempdir().unwrap();
        let report = write_corpus(out.path(), FormatKind::Con, &[good, blank, aspirin]).unwrap();
        assert_eq!(report.items, vec!["a_ok".to_string(), "c_aspirin".to_string()]);
        assert_eq!(report.failures[0].item, "b_blank");
        assert!(matches!(report.failures[0].error, MedError::InvalidSpan { .. }));

        assert!(out.path().join("c_aspirin.con").exists());
        assert!(!out.path().join("b_blank.con").exists());
    }
}
