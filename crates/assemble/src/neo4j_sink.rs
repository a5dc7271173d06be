use anyhow::{Context, Result, anyhow};
use ground::Predicate;
use neo4rs::{Graph, Query};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::assembler::{EdgeRow, GraphTables, NodeLabel, NodeRow, TrialRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "127.0.0.1:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

fn cypher_label(label: NodeLabel) -> &'static str {
    match label {
        NodeLabel::ClinicalTrial => "ClinicalTrial",
        NodeLabel::TrialRecord => "TrialRecord",
        NodeLabel::Condition => "Condition",
        NodeLabel::Intervention => "Intervention",
    }
}

fn relationship_type(predicate: Predicate) -> &'static str {
    match predicate {
        Predicate::HasCondition => "HAS_CONDITION",
        Predicate::HasIntervention => "HAS_INTERVENTION",
        Predicate::MappedToTrial => "MAPPED_TO_TRIAL",
    }
}

// Endpoints are matched by label so the per-label ID indexes apply.
fn edge_statement(predicate: Predicate, subject: NodeLabel, object: NodeLabel) -> String {
    format!(
        r#"
            MATCH (subject:{} {{id: $subject}})
            MATCH (object:{} {{id: $object}})
            MERGE (subject)-[:{}]->(object)
            "#,
        cypher_label(subject),
        cypher_label(object),
        relationship_type(predicate)
    )
}

/// Loads assembled tables into Neo4j. Every statement is idempotent, so
/// reloading the same tables is a no-op.
pub struct Neo4jSink {
    graph: Graph,
}

impl Neo4jSink {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {}", config.uri))?;
        Ok(Self::new(graph))
    }

    /// Create an ID index per node label.
    pub async fn init_schema(&self) -> Result<()> {
        for label in [
            NodeLabel::ClinicalTrial,
            NodeLabel::TrialRecord,
            NodeLabel::Condition,
            NodeLabel::Intervention,
        ] {
            let query = Query::new(format!(
                "CREATE INDEX {}_id_index IF NOT EXISTS FOR (n:{}) ON (n.id)",
                label.as_str(),
                cypher_label(label)
            ));
            self.graph
                .run(query)
                .await
                .with_context(|| format!("Failed to create index for {}", label))?;
        }
        Ok(())
    }

    pub async fn load_node(&self, node: &NodeRow) -> Result<()> {
        let query = Query::new(format!(
            r#"
            MERGE (n:{} {{id: $id}})
            SET n.name = $name,
                n.provenance = $provenance
            "#,
            cypher_label(node.label)
        ))
        .param("id", node.id.clone())
        .param("name", node.name.clone())
        .param("provenance", node.provenance.clone());

        self.graph
            .run(query)
            .await
            .with_context(|| format!("Failed to load node {}", node.id))?;
        Ok(())
    }

    /// Attach merged trial attributes to an already loaded trial node.
    pub async fn load_trial(&self, trial: &TrialRow) -> Result<()> {
        let query = Query::new(
            r#"
            MATCH (n:ClinicalTrial {id: $id})
            SET n.official_title = $official_title,
                n.study_type = $study_type,
                n.design = $design,
                n.phase = $phase,
                n.status = $status,
                n.why_stopped = $why_stopped,
                n.start_year = $start_year,
                n.primary_outcomes = $primary_outcomes,
                n.secondary_outcomes = $secondary_outcomes,
                n.secondary_ids = $secondary_ids,
                n.countries = $countries,
                n.references = $references
            "#
            .to_string(),
        )
        .param("id", trial.id.clone())
        .param("official_title", trial.official_title.clone())
        .param("study_type", trial.study_type.clone())
        .param("design", trial.design.clone())
        .param("phase", trial.phase.clone())
        .param("status", trial.status.clone())
        .param("why_stopped", trial.why_stopped.clone())
        .param("start_year", trial.start_year.map(i64::from))
        .param("primary_outcomes", trial.primary_outcomes.clone())
        .param("secondary_outcomes", trial.secondary_outcomes.clone())
        .param("secondary_ids", trial.secondary_ids.clone())
        .param("countries", trial.countries.clone())
        .param("references", trial.references.clone());

        self.graph
            .run(query)
            .await
            .with_context(|| format!("Failed to load attributes of trial {}", trial.id))?;
        Ok(())
    }

    pub async fn load_edge(
        &self,
        edge: &EdgeRow,
        subject: NodeLabel,
        object: NodeLabel,
    ) -> Result<()> {
        let query = Query::new(edge_statement(edge.predicate, subject, object))
            .param("subject", edge.subject.clone())
        .param("object", edge.object.clone());

        self.graph
            .run(query)
            .await
            .with_context(|| format!("Failed to load edge {} -> {}", edge.subject, edge.object))?;
        Ok(())
    }

    /// Nodes first so edge endpoints always exist.
    pub async fn load(&self, tables: &GraphTables) -> Result<()> {
        for node in &tables.nodes {
            self.load_node(node).await?;
        }
        for trial in &tables.trials {
            self.load_trial(trial).await?;
        }
        let labels = node_labels(tables);
        for edge in &tables.edges {
            let endpoints = (
                labels.get(edge.subject.as_str()),
                labels.get(edge.object.as_str()),
            );
            let (Some(&subject), Some(&object)) = endpoints else {
                return Err(anyhow!("Edge {} -> {} has no node", edge.subject, edge.object));
            };
            self.load_edge(edge, subject, object).await?;
        }
        info!(nodes = tables.nodes.len(), edges = tables.edges.len(), "Loaded tables into Neo4j");
        Ok(())
    }
}

fn node_labels(tables: &GraphTables) -> HashMap<&str, NodeLabel> {
    tables.nodes.iter().map(|n| (n.id.as_str(), n.label)).collect()
}
