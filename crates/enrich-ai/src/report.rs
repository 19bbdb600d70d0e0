use enrich_core::Value;
use serde::Serialize;

/// A row or cluster the pipeline could not enrich.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

/// Output of one pipeline run.
///
/// `rows` always has one entry per input row. Rows that could not be enriched
/// are passed through as they came in and show up in `skipped`.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub rows: Vec<Value>,
    pub skipped: Vec<SkippedEntry>,
    /// Units of work attempted: rows for embeddings, clusters for topics.
    pub attempted: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.attempted.saturating_sub(self.skipped.len())
    }

    pub fn skip(&mut self, index: usize, reason: impl Into<String>) {
        self.skipped.push(SkippedEntry {
            index,
            reason: reason.into(),
        });
    }

    pub fn is_skipped(&self, index: usize) -> bool {
        self.skipped.iter().any(|entry| entry.index == index)
    }
}
