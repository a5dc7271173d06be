use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::MappingError;
use crate::raw::RawRecord;
use crate::trial::Source;

/// Raw records loaded from disk for one registry.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub source: Source,
    pub records: Vec<RawRecord>,
    /// Entries that could not be decoded, by position in the input.
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub position: usize,
    pub error: MappingError,
}

impl RawBatch {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn push(&mut self, value: Result<Value, MappingError>) {
        let position = self.records.len() + self.rejected.len();
        match value.and_then(|v| RawRecord::from_value(v, self.source)) {
            Ok(record) => self.records.push(record),
            Err(error) => self.rejected.push(RejectedRecord { position, error }),
        }
    }

    fn extend(&mut self, other: RawBatch) {
        let offset = self.records.len() + self.rejected.len();
        self.records.extend(other.records);
        self.rejected.extend(other.rejected.into_iter().map(|r| RejectedRecord {
            position: r.position + offset,
            error: r.error,
        }));
    }
}

pub struct RawRecordReader;

impl RawRecordReader {
    pub async fn read_file(path: &Path, source: Source) -> Result<RawBatch> {
        let content = fs::read_to_string(path)
            .await
            .context(format!("Failed to read raw records: {:?}", path))?;

        let batch = Self::parse_str(&content, source)?;
        debug!(
            path = %path.display(),
            source = %source,
            records = batch.records.len(),
            rejected = batch.rejected.len(),
            "Loaded raw records"
        );
        Ok(batch)
    }

    /// Read every `.json` / `.jsonl` file below `dir`, in path order.
    pub async fn read_directory(dir: &Path, source: Source) -> Result<RawBatch> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json") | Some("jsonl")
                )
            })
            .collect();
        paths.sort();

        let mut batch = RawBatch::new(source);
        for path in paths {
            batch.extend(Self::read_file(&path, source).await?);
        }
        Ok(batch)
    }

    /// Accepts a JSON array, a ClinicalTrials.gov page (`{"studies": [...]}`),
    /// a single JSON object, or JSON lines.
    pub fn parse_str(content: &str, source: Source) -> Result<RawBatch> {
        let mut batch = RawBatch::new(source);
        let trimmed = content.trim_start();

        if trimmed.is_empty() {
            return Ok(batch);
        }

        if trimmed.starts_with('[') {
            let values: Vec<Value> =
                serde_json::from_str(trimmed).context("Failed to parse raw record array")?;
            for value in values {
                batch.push(Ok(value));
            }
            return Ok(batch);
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            match value {
                Value::Object(mut map) if map.get("studies").is_some_and(Value::is_array) => {
                    if let Some(Value::Array(studies)) = map.remove("studies") {
                        for study in studies {
                            batch.push(Ok(study));
                        }
                    }
                }
                other => batch.push(Ok(other)),
            }
            return Ok(batch);
        }

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str::<Value>(line).map_err(|e| {
                warn!(source = %source, line = line_no + 1, error = %e, "Skipping unreadable line");
                MappingError::Malformed {
                    registry: source,
                    message: format!("line {}: {}", line_no + 1, e),
                }
            });
            batch.push(value);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let content = r#"[{"curie": "who:1"}, {"curie": "who:2"}]"#;
        let batch = RawRecordReader::parse_str(content, Source::Who).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert!(batch.rejected.is_empty());
    }

    #[test]
    fn test_parse_studies_page() {
        let content = r#"{"studies": [{"protocolSection": {"identificationModule": {"nctId": "NCT1"}}}], "nextPageToken": "abc"}"#;
        let batch = RawRecordReader::parse_str(content, Source::ClinicalTrials).unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[test]
    fn test_parse_json_lines_keeps_going_past_bad_lines() {
        let content = "{\"curie\": \"who:1\"}\nnot json\n\n{\"curie\": \"who:3\", \"conditions\": 5}\n{\"curie\": \"who:4\"}\n";
        let batch = RawRecordReader::parse_str(content, Source::Who).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.rejected.len(), 2);
        assert_eq!(batch.rejected[0].position, 1);
        assert_eq!(batch.rejected[1].position, 2);
    }

    #[test]
    fn test_parse_empty_content() {
        let batch = RawRecordReader::parse_str("  \n", Source::Who).unwrap();
        assert!(batch.records.is_empty());
    }

    #[tokio::test]
    async fn test_read_directory_in_path_order() {
        let dir = std::env::temp_dir().join(format!("ingest-reader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.jsonl"), "{\"curie\": \"who:2\"}\n").unwrap();
        std::fs::write(dir.join("a.json"), "[{\"curie\": \"who:1\"}]").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let batch = RawRecordReader::read_directory(&dir, Source::Who).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(batch.records.len(), 2);
        match &batch.records[0] {
            RawRecord::Who(record) => assert_eq!(record.curie.as_deref(), Some("who:1")),
            other => panic!("unexpected record {:?}", other),
        }
    }
}
