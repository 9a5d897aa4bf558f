use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One unit of work: a parcel number, document number or profile URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl Into<String>) -> Self { Identifier(raw.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self { Identifier(s.to_string()) }
}

/// Output of one navigation+extraction cycle, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub identifier: Identifier,
    pub fields: BTreeMap<String, String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl FetchResult {
    pub fn success(identifier: Identifier, fields: BTreeMap<String, String>, attempts: u32) -> Self {
        FetchResult { identifier, fields, error: None, attempts }
    }

    pub fn failed(identifier: Identifier, error: impl Into<String>, attempts: u32) -> Self {
        FetchResult { identifier, fields: BTreeMap::new(), error: Some(error.into()), attempts }
    }

    pub fn is_ok(&self) -> bool { self.error.is_none() }
}

/// A result tagged with the batch it was produced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub batch: usize,
    pub result: FetchResult,
}

/// Every row produced so far, in batch order and submission order within a batch.
#[derive(Debug, Default)]
pub struct Accumulator {
    rows: Vec<Row>,
    flushed: usize,
}

impl Accumulator {
    pub fn new() -> Self { Self::default() }

    pub fn extend_batch(&mut self, batch: usize, results: Vec<FetchResult>) {
        self.rows.extend(results.into_iter().map(|result| Row { batch, result }));
    }

    pub fn rows(&self) -> &[Row] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn succeeded(&self) -> usize { self.rows.iter().filter(|r| r.result.is_ok()).count() }
    pub fn failed(&self) -> usize { self.len() - self.succeeded() }

    /// Rows appended since the last `mark_flushed`.
    pub fn unflushed(&self) -> usize { self.rows.len() - self.flushed }
    pub fn mark_flushed(&mut self) { self.flushed = self.rows.len(); }
}

// Plan envelope types
#[derive(Serialize)]
pub struct UrlSample { pub identifier: String, pub url: String }

#[derive(Serialize)]
pub struct RunPlan {
    pub profile: String,
    pub identifiers: usize,
    pub duplicates: usize,
    pub batches: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retries: u32,
    pub timeout_secs: u64,
    pub output: String,
    pub format: String,
    pub engine: String,
    pub proxy: bool,
    pub sample: Vec<UrlSample>,
}

// Apply/result envelope types
#[derive(Serialize)]
pub struct BatchSummary { pub batch: usize, pub attempted: usize, pub succeeded: usize, pub failed: usize }

#[derive(Serialize)]
pub struct FailedIdentifier { pub identifier: String, pub error: String }

#[derive(Serialize)]
pub struct RunResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub checkpoints: usize,
    pub output: String,
    pub per_batch: Vec<BatchSummary>,
    pub failures: Vec<FailedIdentifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(id: &str) -> FetchResult { FetchResult::success(id.into(), BTreeMap::new(), 1) }

    #[test]
    fn accumulator_tracks_flushes_and_outcomes() {
        let mut acc = Accumulator::new();
        acc.extend_batch(1, vec![ok("a"), FetchResult::failed("b".into(), "timeout", 3)]);
        assert_eq!(acc.unflushed(), 2);
        acc.mark_flushed();
        assert_eq!(acc.unflushed(), 0);
        acc.extend_batch(2, vec![ok("c")]);
        assert_eq!(acc.unflushed(), 1);
        assert_eq!((acc.len(), acc.succeeded(), acc.failed()), (3, 2, 1));
        assert_eq!(acc.rows()[2].batch, 2);
        assert_eq!(acc.rows()[1].result.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn identifier_serializes_as_plain_string() {
        let v = serde_json::to_value(Identifier::new("P-1")).unwrap();
        assert_eq!(v, serde_json::json!("P-1"));
    }
}
