//! Graph Assembler: deduplicated, deterministically ordered node, edge and
//! trial-attribute tables.

use anyhow::{Context, Result};
use ground::{BioEntityNode, Edge, Predicate};
use ingest::{EntityKind, Outcome};
use resolve::TrialNode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ConsistencyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    ClinicalTrial,
    TrialRecord,
    Condition,
    Intervention,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::ClinicalTrial => "clinical_trial",
            NodeLabel::TrialRecord => "trial_record",
            NodeLabel::Condition => "condition",
            NodeLabel::Intervention => "intervention",
        }
    }

    /// Trial nodes sort before bio-entity nodes.
    pub fn rank(&self) -> u8 {
        match self {
            NodeLabel::ClinicalTrial | NodeLabel::TrialRecord => 0,
            NodeLabel::Condition | NodeLabel::Intervention => 1,
        }
    }

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Condition => NodeLabel::Condition,
            EntityKind::Intervention => NodeLabel::Intervention,
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: String,
    pub label: NodeLabel,
    pub name: String,
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeRow {
    pub subject: String,
    pub predicate: Predicate,
    pub object: String,
}

impl From<&Edge> for EdgeRow {
    fn from(edge: &Edge) -> Self {
        Self {
            subject: edge.subject.clone(),
            predicate: edge.predicate,
            object: edge.object.clone(),
        }
    }
}

/// Merged attributes of one resolved trial. List columns are `;`-joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRow {
    pub id: String,
    pub title: String,
    pub official_title: String,
    pub brief_summary: String,
    pub study_type: String,
    pub design: String,
    pub phase: String,
    pub status: String,
    pub why_stopped: String,
    pub start_year: Option<i32>,
    pub primary_outcomes: String,
    pub secondary_outcomes: String,
    pub secondary_ids: String,
    pub countries: String,
    pub references: String,
    pub provenance: String,
}

impl From<&TrialNode> for TrialRow {
    fn from(trial: &TrialNode) -> Self {
        Self {
            id: trial.id.clone(),
            title: trial.title.clone(),
            official_title: trial.official_title.clone(),
            brief_summary: trial.brief_summary.clone(),
            study_type: trial.study_type.clone(),
            design: trial.design.describe(),
            phase: trial.phase.clone(),
            status: trial.status.clone(),
            why_stopped: trial.why_stopped.clone(),
            start_year: trial.start_year,
            primary_outcomes: Outcome::join(&trial.primary_outcomes),
            secondary_outcomes: Outcome::join(&trial.secondary_outcomes),
            secondary_ids: trial.secondary_ids.join(";"),
            countries: trial.countries.join(";"),
            references: trial.references.join(";"),
            provenance: trial.provenance(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTables {
    pub nodes: Vec<NodeRow>,
    pub edges: Vec<EdgeRow>,
    pub trials: Vec<TrialRow>,
}

impl GraphTables {
    pub fn write_nodes<W: io::Write>(&self, writer: W, limit: Option<usize>) -> Result<()> {
        write_rows(writer, self.nodes.iter().take(limit.unwrap_or(usize::MAX)))
    }

    pub fn write_edges<W: io::Write>(&self, writer: W, limit: Option<usize>) -> Result<()> {
        write_rows(writer, self.edges.iter().take(limit.unwrap_or(usize::MAX)))
    }

    pub fn write_trials<W: io::Write>(&self, writer: W, limit: Option<usize>) -> Result<()> {
        write_rows(writer, self.trials.iter().take(limit.unwrap_or(usize::MAX)))
    }

    /// SHA-256 over the TSV rendering of all three tables.
    pub fn digest(&self) -> Result<String> {
        let mut nodes = Vec::new();
        self.write_nodes(&mut nodes, None)?;
        let mut edges = Vec::new();
        self.write_edges(&mut edges, None)?;
        let mut trials = Vec::new();
        self.write_trials(&mut trials, None)?;

        let mut hasher = Sha256::new();
        hasher.update(&nodes);
        hasher.update(&edges);
        hasher.update(&trials);
        Ok(hex::encode(hasher.finalize()))
    }
}

fn write_rows<W, T>(writer: W, rows: impl Iterator<Item = T>) -> Result<()>
where
    W: io::Write,
    T: Serialize,
{
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for row in rows {
        writer.serialize(row).context("Failed to write table row")?;
    }
    writer.flush().context("Failed to flush table")?;
    Ok(())
}

/// Tables plus everything that had to be dropped to build them.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub tables: GraphTables,
    pub errors: Vec<ConsistencyError>,
}

#[derive(Default)]
pub struct GraphAssembler {
    nodes: Vec<NodeRow>,
    index: HashMap<String, usize>,
    edges: Vec<EdgeRow>,
    seen_edges: HashSet<EdgeRow>,
    trials: Vec<TrialRow>,
    errors: Vec<ConsistencyError>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. A repeated ID keeps the first row; a repeat with
    /// different content is recorded as a consistency error.
    pub fn add_node(&mut self, row: NodeRow) {
        match self.index.get(&row.id) {
            Some(&existing) => {
                let kept = &self.nodes[existing];
                if *kept != row {
                    let error = ConsistencyError::ConflictingNode {
                        id: row.id.clone(),
                        kept: describe(kept),
                        dropped: describe(&row),
                    };
                    warn!(node_id = %row.id, %error, "Conflicting node definition");
                    self.errors.push(error);
                }
            }
            None => {
                self.index.insert(row.id.clone(), self.nodes.len());
                self.nodes.push(row);
            }
        }
    }

    /// Merged trial node plus one provenance node per aliased source record.
    pub fn add_trial(&mut self, trial: &TrialNode) {
        if !self.index.contains_key(&trial.id) {
            self.trials.push(TrialRow::from(trial));
        }
        self.add_node(NodeRow {
            id: trial.id.clone(),
            label: NodeLabel::ClinicalTrial,
            name: trial.title.clone(),
            provenance: trial.provenance(),
        });
        for alias in trial.aliases() {
            self.add_node(NodeRow {
                id: alias.id.clone(),
                label: NodeLabel::TrialRecord,
                name: alias.title.clone(),
                provenance: alias.source.tag().to_string(),
            });
        }
    }

    /// A concept already added under the other kind keeps its first label.
    pub fn add_entity(&mut self, entity: &BioEntityNode) {
        let row = NodeRow {
            id: entity.id.clone(),
            label: NodeLabel::for_kind(entity.kind),
            name: entity.name.clone(),
            provenance: entity.namespace.clone(),
        };
        if let Some(&existing) = self.index.get(&row.id) {
            let kept = &self.nodes[existing];
            let same_concept = kept.label.rank() == row.label.rank()
                && kept.name == row.name
                && kept.provenance == row.provenance;
            if same_concept && kept.label != row.label {
                debug!(
                    node_id = %row.id,
                    kept = %kept.label,
                    also = %row.label,
                    "Entity grounded under both kinds"
                );
                return;
            }
        }
        self.add_node(row);
    }

    pub fn add_edge(&mut self, edge: &Edge) {
        let row = EdgeRow::from(edge);
        if self.seen_edges.insert(row.clone()) {
            self.edges.push(row);
        }
    }

    /// Drop dangling edges and sort both tables.
    pub fn finish(mut self) -> Assembly {
        let mut edges = Vec::with_capacity(self.edges.len());
        for edge in std::mem::take(&mut self.edges) {
            if self.index.contains_key(&edge.subject) && self.index.contains_key(&edge.object) {
                edges.push(edge);
                continue;
            }
            let error = ConsistencyError::DanglingEdge {
                subject: edge.subject,
                predicate: edge.predicate.to_string(),
                object: edge.object,
            };
            warn!(%error, "Dropping dangling edge");
            self.errors.push(error);
        }

        let mut nodes = self.nodes;
        nodes.sort_by(|a, b| (a.label.rank(), &a.id).cmp(&(b.label.rank(), &b.id)));
        let mut trials = self.trials;
        trials.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| {
            (&a.subject, a.predicate.as_str(), &a.object).cmp(&(&b.subject, b.predicate.as_str(), &b.object))
        });

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            trials = trials.len(),
            "Assembled graph tables"
        );
        Assembly {
            tables: GraphTables { nodes, edges, trials },
            errors: self.errors,
        }
    }
}

fn describe(row: &NodeRow) -> String {
    format!("{}|{}|{}", row.label, row.name, row.provenance)
}

/// Build the output tables from resolved trials, grounded entities and
/// edges of every kind.
///
/// Entities are added in `(id, kind)` order, so a concept grounded as both
/// a condition and an intervention is labelled `condition` on every run.
pub fn assemble(trials: &[TrialNode], entities: &[Arc<BioEntityNode>], edges: &[Edge]) -> Assembly {
    let mut assembler = GraphAssembler::new();
    for trial in trials {
        assembler.add_trial(trial);
    }
    let mut entities: Vec<&Arc<BioEntityNode>> = entities.iter().collect();
    entities.sort_by(|a, b| (&a.id, a.kind).cmp(&(&b.id, b.kind)));
    for entity in entities {
        assembler.add_entity(entity);
    }
    for edge in edges {
        assembler.add_edge(edge);
    }
    assembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::{Source, TrialRecord};

    fn trial(native: &str) -> TrialNode {
        let mut record = TrialRecord::new(Source::ClinicalTrials, "clinicaltrials", native);
        record.title = format!("Trial {}", native);
        TrialNode::merge(&[&record]).unwrap()
    }

    fn entity(id: &str, name: &str) -> Arc<BioEntityNode> {
        Arc::new(BioEntityNode::new("MESH", id, name, EntityKind::Condition))
    }

    fn fixture() -> (Vec<TrialNode>, Vec<Arc<BioEntityNode>>, Vec<Edge>) {
        let trials = vec![trial("NCT002"), trial("NCT001")];
        let entities = vec![entity("D2", "Asthma"), entity("D1", "Diabetes")];
        let edges = vec![
            Edge::new("clinicaltrials:NCT002", Predicate::HasCondition, "mesh:D2"),
            Edge::new("clinicaltrials:NCT001", Predicate::HasCondition, "mesh:D1"),
            Edge::new("clinicaltrials:NCT001", Predicate::HasCondition, "mesh:D1"),
        ];
        (trials, entities, edges)
    }

    #[test]
    fn test_stable_ordering() {
        let (trials, entities, edges) = fixture();
        let assembly = assemble(&trials, &entities, &edges);

        let ids: Vec<&str> = assembly.tables.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["clinicaltrials:NCT001", "clinicaltrials:NCT002", "mesh:D1", "mesh:D2"]
        );
        assert_eq!(assembly.tables.edges.len(), 2);
        assert_eq!(assembly.tables.edges[0].subject, "clinicaltrials:NCT001");
        assert!(assembly.errors.is_empty());
    }

    #[test]
    fn test_repeated_runs_are_byte_identical() {
        let (trials, entities, edges) = fixture();
        let first = assemble(&trials, &entities, &edges);

        let (mut trials, mut entities, mut edges) = fixture();
        trials.reverse();
        entities.reverse();
        edges.reverse();
        let second = assemble(&trials, &entities, &edges);

        assert_eq!(first.tables, second.tables);
        assert_eq!(first.tables.digest().unwrap(), second.tables.digest().unwrap());
    }

    #[test]
    fn test_conflicting_node_keeps_first() {
        let mut assembler = GraphAssembler::new();
        assembler.add_entity(&entity("D1", "Diabetes"));
        assembler.add_entity(&entity("D1", "Diabetes"));
        assembler.add_entity(&entity("D1", "Sugar disease"));
        let assembly = assembler.finish();

        assert_eq!(assembly.tables.nodes.len(), 1);
        assert_eq!(assembly.tables.nodes[0].name, "Diabetes");
        assert!(matches!(
            assembly.errors.as_slice(),
            [ConsistencyError::ConflictingNode { .. }]
        ));
    }

    #[test]
    fn test_dangling_edges_dropped() {
        let (trials, entities, mut edges) = fixture();
        edges.push(Edge::new("clinicaltrials:NCT001", Predicate::HasIntervention, "chebi:missing"));
        let assembly = assemble(&trials, &entities, &edges);

        let node_ids: HashSet<&str> = assembly.tables.nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(
            assembly
                .tables
                .edges
                .iter()
                .all(|e| node_ids.contains(e.subject.as_str()) && node_ids.contains(e.object.as_str()))
        );
        assert_eq!(assembly.errors.len(), 1);
    }

    #[test]
    fn test_tsv_rendering() {
        let (trials, entities, edges) = fixture();
        let tables = assemble(&trials, &entities, &edges).tables;

        let mut out = Vec::new();
        tables.write_edges(&mut out, Some(1)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "subject\tpredicate\tobject\nclinicaltrials:NCT001\thas_condition\tmesh:D1\n"
        );
    }

    #[test]
    fn test_entity_under_both_kinds_gets_stable_label() {
        let condition = Arc::new(BioEntityNode::new("MESH", "D015444", "Exercise", EntityKind::Condition));
        let intervention =
            Arc::new(BioEntityNode::new("MESH", "D015444", "Exercise", EntityKind::Intervention));
        let edges = vec![
            Edge::new("clinicaltrials:NCT001", Predicate::HasCondition, "mesh:D015444"),
            Edge::new("clinicaltrials:NCT001", Predicate::HasIntervention, "mesh:D015444"),
        ];
        let trials = vec![trial("NCT001")];

        let first = assemble(&trials, &[Arc::clone(&condition), Arc::clone(&intervention)], &edges);
        let second = assemble(&trials, &[intervention, condition], &edges);

        assert_eq!(first.tables, second.tables);
        assert!(first.errors.is_empty());
        let exercise = first.tables.nodes.iter().find(|n| n.id == "mesh:D015444").unwrap();
        assert_eq!(exercise.label, NodeLabel::Condition);
        assert_eq!(first.tables.edges.len(), 2);
    }

    #[test]
    fn test_trials_table_carries_merged_attributes() {
        let mut who = TrialRecord::new(Source::Who, "who", "EUCTR2020-000001-01");
        who.phase = "phase 3".to_string();
        who.status = "recruiting".to_string();
        who.countries = vec!["France".to_string()];
        who.cross_references = vec!["clinicaltrials:NCT001".to_string()];

        let mut ct = TrialRecord::new(Source::ClinicalTrials, "clinicaltrials", "NCT001");
        ct.title = "Exercise in asthma".to_string();
        ct.phase = "phase 2".to_string();
        ct.start_year = Some(2020);
        ct.primary_outcomes = vec![Outcome {
            measure: "FEV1".to_string(),
            time_frame: "6 months".to_string(),
        }];

        let resolution = resolve::resolve(&[who, ct]);
        let tables = assemble(&resolution.trials, &[], &resolution.edges).tables;

        assert_eq!(tables.trials.len(), 1);
        let row = &tables.trials[0];
        assert_eq!(row.id, "clinicaltrials:NCT001");
        assert_eq!(row.phase, "phase 2");
        assert_eq!(row.status, "recruiting");
        assert_eq!(row.start_year, Some(2020));
        assert_eq!(row.primary_outcomes, "Measure: FEV1, Time Frame: 6 months");
        assert_eq!(row.countries, "France");
        assert_eq!(row.provenance, "clinicaltrials;who");

        let mut out = Vec::new();
        tables.write_trials(&mut out, None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("id\ttitle\tofficial_title\tbrief_summary\tstudy_type\tdesign\tphase\t"));
        assert!(text.contains("\tphase 2\trecruiting\t"));
    }
}
