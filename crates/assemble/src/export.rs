use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::assembler::GraphTables;

pub const NODES_FILE: &str = "nodes.tsv";
pub const EDGES_FILE: &str = "edges.tsv";
pub const NODES_SAMPLE_FILE: &str = "nodes_sample.tsv";
pub const EDGES_SAMPLE_FILE: &str = "edges_sample.tsv";
pub const TRIALS_FILE: &str = "trials.tsv";
pub const TRIALS_SAMPLE_FILE: &str = "trials_sample.tsv";

/// Write the full tables into `dir`, plus samples of the first
/// `num_samples` rows when `num_samples > 0`. Returns the written paths.
pub fn write_tables(dir: &Path, tables: &GraphTables, num_samples: usize) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut written = Vec::new();
    written.push(write_one(dir, NODES_FILE, |w| tables.write_nodes(w, None))?);
    written.push(write_one(dir, EDGES_FILE, |w| tables.write_edges(w, None))?);
    written.push(write_one(dir, TRIALS_FILE, |w| tables.write_trials(w, None))?);

    if num_samples > 0 {
        written.push(write_one(dir, NODES_SAMPLE_FILE, |w| {
            tables.write_nodes(w, Some(num_samples))
        })?);
        written.push(write_one(dir, EDGES_SAMPLE_FILE, |w| {
            tables.write_edges(w, Some(num_samples))
        })?);
        written.push(write_one(dir, TRIALS_SAMPLE_FILE, |w| {
            tables.write_trials(w, Some(num_samples))
        })?);
    }

    info!(
        dir = %dir.display(),
        nodes = tables.nodes.len(),
        edges = tables.edges.len(),
        trials = tables.trials.len(),
        "Wrote graph tables"
    );
    Ok(written)
}

fn write_one(
    dir: &Path,
    name: &str,
    write: impl FnOnce(BufWriter<File>) -> Result<()>,
) -> Result<PathBuf> {
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    write(BufWriter::new(file)).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{EdgeRow, NodeLabel, NodeRow};
    use ground::Predicate;

    fn tables() -> GraphTables {
        let nodes = (1..=3)
            .map(|i| NodeRow {
                id: format!("clinicaltrials:NCT00{}", i),
                label: NodeLabel::ClinicalTrial,
                name: format!("Trial {}", i),
                provenance: "clinicaltrials".to_string(),
            })
            .collect();
        let edges = vec![EdgeRow {
            subject: "who:1".to_string(),
            predicate: Predicate::MappedToTrial,
            object: "clinicaltrials:NCT001".to_string(),
        }];
        GraphTables {
            nodes,
            edges,
            trials: Vec::new(),
        }
    }

    #[test]
    fn test_write_tables_with_samples() {
        let dir = std::env::temp_dir().join(format!("trialgraph-export-{}", std::process::id()));
        let written = write_tables(&dir, &tables(), 2).unwrap();
        assert_eq!(written.len(), 6);

        let nodes = std::fs::read_to_string(dir.join(NODES_FILE)).unwrap();
        assert_eq!(nodes.lines().count(), 4);
        assert!(nodes.starts_with("id\tlabel\tname\tprovenance\n"));

        let sample = std::fs::read_to_string(dir.join(NODES_SAMPLE_FILE)).unwrap();
        assert_eq!(sample.lines().count(), 3);

        assert!(dir.join(TRIALS_FILE).exists());
        assert!(dir.join(TRIALS_SAMPLE_FILE).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_no_samples_when_disabled() {
        let dir = std::env::temp_dir().join(format!("trialgraph-nosample-{}", std::process::id()));
        let written = write_tables(&dir, &tables(), 0).unwrap();

        assert_eq!(written.len(), 3);
        assert!(!dir.join(EDGES_SAMPLE_FILE).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
