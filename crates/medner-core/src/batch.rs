//! Batch reporting
//!
//! Batch operations (corpus ingestion, annotation) never drop data silently:
//! every item either lands in `items` or in `failures`, and per-record skips
//! inside otherwise successful items are counted separately.

use crate::MedError;

/// A batch item that could not be processed
#[derive(Debug)]
pub struct ItemFailure {
    /// Item name (usually the document name)
    pub item: String,
    pub error: MedError,
}

/// Outcome of a batch operation
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Successfully processed items, in input order
    pub items: Vec<T>,
    /// Items that failed, in input order
    pub failures: Vec<ItemFailure>,
    /// Records skipped inside successful items (e.g. malformed annotation lines)
    pub skipped_records: Vec<MedError>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
            skipped_records: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&self) -> usize {
        self.items.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped_records.len()
    }

    pub fn push_failure(&mut self, item: impl Into<String>, error: MedError) {
        self.failures.push(ItemFailure {
            item: item.into(),
            error,
        });
    }

    /// Whether every item succeeded without skipping records
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped_records.is_empty()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} record(s) skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }

    /// Log every failure and skipped record at warn level
    pub fn log_problems(&self) {
        for failure in &self.failures {
            tracing::warn!(item = %failure.item, error = %failure.error, "batch item failed");
        }
        for skipped in &self.skipped_records {
            tracing::warn!(error = %skipped, "record skipped");
        }
    }

    /// Keep only the successfully processed items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Apply `f` to every successful item; errors move the item to `failures`
    pub fn and_then<U, F>(self, name: impl Fn(&T) -> String, mut f: F) -> BatchReport<U>
    where
        F: FnMut(T) -> crate::Result<U>,
    {
        let mut report = BatchReport {
            items: Vec::with_capacity(self.items.len()),
            failures: self.failures,
            skipped_records: self.skipped_records,
        };
        for item in self.items {
            let item_name = name(&item);
            match f(item) {
                Ok(value) => report.items.push(value),
                Err(error) => report.push_failure(item_name, error),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut report: BatchReport<u32> = BatchReport::new();
        report.items.push(1);
        report.items.push(2);
        report.push_failure("doc-3", MedError::EmptyCorpus);
        report.skipped_records.push(MedError::MalformedAnnotation {
            record: "T9".to_string(),
            line: 9,
            reason: "bad offsets".to_string(),
        });

        assert_eq!(report.summary(), "2 succeeded, 1 failed, 1 record(s) skipped");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_and_then_moves_errors_to_failures() {
        let report = BatchReport {
            items: vec![1, 2, 3],
            failures: Vec::new(),
            skipped_records: Vec::new(),
        };
        let mapped = report.and_then(
            |n| format!("item-{n}"),
            |n| {
                if n == 2 {
                    Err(MedError::ModelNotTrained)
                } else {
                    Ok(n * 10)
                }
            },
        );
        assert_eq!(mapped.items, vec![10, 30]);
        assert_eq!(mapped.failures.len(), 1);
        assert_eq!(mapped.failures[0].item, "item-2");
    }
}
