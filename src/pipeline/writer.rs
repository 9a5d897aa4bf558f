use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use super::types::Row;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat { Csv, Json }

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self { OutputFormat::Csv => "csv", OutputFormat::Json => "json" }
    }
}

/// Persists the accumulated rows. Every checkpoint replaces the whole file
/// through a rename, so readers see either the previous or the new snapshot.
pub struct BatchWriter {
    path: PathBuf,
    format: OutputFormat,
    fields: Vec<String>,
}

impl BatchWriter {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat, fields: Vec<String>) -> Self {
        BatchWriter { path: path.into(), format, fields }
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn columns(&self) -> Vec<String> {
        let mut cols = vec!["identifier".to_string(), "batch".to_string()];
        cols.extend(self.fields.iter().cloned());
        cols.push("attempts".into());
        cols.push("error".into());
        cols
    }

    pub fn checkpoint(&self, rows: &[Row]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).with_context(|| format!("create output dir {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        match self.format {
            OutputFormat::Csv => self.write_csv(tmp.as_file_mut(), rows)?,
            OutputFormat::Json => self.write_json(tmp.as_file_mut(), rows)?,
        }
        tmp.as_file().sync_all().context("sync checkpoint")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }

    fn write_csv(&self, file: &mut File, rows: &[Row]) -> Result<()> {
        let mut w = csv::Writer::from_writer(file);
        w.write_record(self.columns())?;
        for row in rows {
            let r = &row.result;
            let mut rec = vec![r.identifier.to_string(), row.batch.to_string()];
            rec.extend(self.fields.iter().map(|f| r.fields.get(f).cloned().unwrap_or_default()));
            rec.push(r.attempts.to_string());
            rec.push(r.error.clone().unwrap_or_default());
            w.write_record(&rec)?;
        }
        w.flush()?;
        Ok(())
    }

    fn write_json(&self, file: &mut File, rows: &[Row]) -> Result<()> {
        let records: Vec<Value> = rows
            .iter()
            .map(|row| {
                let r = &row.result;
                let mut obj = Map::new();
                obj.insert("identifier".into(), Value::String(r.identifier.to_string()));
                obj.insert("batch".into(), Value::from(row.batch));
                for f in &self.fields {
                    obj.insert(f.clone(), Value::String(r.fields.get(f).cloned().unwrap_or_default()));
                }
                obj.insert("attempts".into(), Value::from(r.attempts));
                obj.insert("error".into(), r.error.clone().map(Value::String).unwrap_or(Value::Null));
                Value::Object(obj)
            })
            .collect();
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, &records)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Accumulator, FetchResult};
    use std::collections::BTreeMap;

    fn ok(id: &str, owner: &str) -> FetchResult {
        let mut fields = BTreeMap::new();
        fields.insert("Owner".to_string(), owner.to_string());
        fields.insert("Address".to_string(), format!("{} Main St, Lancaster", id));
        FetchResult::success(id.into(), fields, 1)
    }

    fn writer(dir: &Path, format: OutputFormat) -> BatchWriter {
        BatchWriter::new(dir.join(format!("out.{}", format.extension())), format, vec!["Owner".into(), "Address".into()])
    }

    fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut r = csv::Reader::from_path(path).unwrap();
        let header = r.headers().unwrap().iter().map(String::from).collect();
        let rows = r.records().map(|rec| rec.unwrap().iter().map(String::from).collect()).collect();
        (header, rows)
    }

    #[test]
    fn csv_has_header_then_one_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Csv);
        let mut acc = Accumulator::new();
        acc.extend_batch(1, (1..=5).map(|i| ok(&format!("P{}", i), "SMITH, JOHN")).collect());
        w.checkpoint(acc.rows()).unwrap();

        let (header, rows) = read_csv(w.path());
        assert_eq!(header, vec!["identifier", "batch", "Owner", "Address", "attempts", "error"]);
        assert_eq!(rows.len(), 5);
        // embedded comma survives quoting
        assert_eq!(rows[0][2], "SMITH, JOHN");
        assert_eq!(rows[4][0], "P5");
    }

    #[test]
    fn repeated_checkpoint_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Csv);
        let mut acc = Accumulator::new();
        acc.extend_batch(1, vec![ok("A", "x"), ok("B", "y")]);
        w.checkpoint(acc.rows()).unwrap();
        let first = std::fs::read(w.path()).unwrap();
        w.checkpoint(acc.rows()).unwrap();
        let second = std::fs::read(w.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(read_csv(w.path()).1.len(), 2);
    }

    #[test]
    fn interruption_leaves_last_complete_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Csv);
        let mut acc = Accumulator::new();
        for batch in 1..=3usize {
            acc.extend_batch(batch, (0..4).map(|i| ok(&format!("B{}-{}", batch, i), "o")).collect());
            if batch < 3 {
                w.checkpoint(acc.rows()).unwrap();
            }
            // the third checkpoint never happens
        }
        let (header, rows) = read_csv(w.path());
        assert_eq!(header.len(), 6);
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r[1] == "1" || r[1] == "2"));
        // no stray temp files next to the output
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn error_rows_have_blank_fields_and_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Csv);
        let mut acc = Accumulator::new();
        acc.extend_batch(1, vec![FetchResult::failed("BAD-001".into(), "navigation timed out", 3)]);
        w.checkpoint(acc.rows()).unwrap();
        let (_, rows) = read_csv(w.path());
        assert_eq!(rows[0], vec!["BAD-001", "1", "", "", "3", "navigation timed out"]);
    }

    #[test]
    fn empty_run_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Csv);
        w.checkpoint(&[]).unwrap();
        let (header, rows) = read_csv(w.path());
        assert_eq!(header.len(), 6);
        assert!(rows.is_empty());
    }

    #[test]
    fn json_is_an_array_of_objects() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), OutputFormat::Json);
        let mut acc = Accumulator::new();
        acc.extend_batch(1, vec![ok("A", "x")]);
        acc.extend_batch(2, vec![FetchResult::failed("B".into(), "boom", 2)]);
        w.checkpoint(acc.rows()).unwrap();

        let v: Value = serde_json::from_str(&std::fs::read_to_string(w.path()).unwrap()).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["Owner"], "x");
        assert_eq!(arr[0]["error"], Value::Null);
        assert_eq!(arr[1]["batch"], 2);
        assert_eq!(arr[1]["error"], "boom");
        assert_eq!(arr[1]["Owner"], "");
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let w = BatchWriter::new(dir.path().join("nested/deeper/out.csv"), OutputFormat::Csv, vec!["Owner".into()]);
        w.checkpoint(&[]).unwrap();
        assert!(w.path().exists());
    }
}
