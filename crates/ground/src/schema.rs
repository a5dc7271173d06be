use ingest::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical grounded entity. Unique per `(namespace, local_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioEntityNode {
    /// `namespace:local_id`, namespace lower-cased.
    pub id: String,
    pub namespace: String,
    pub local_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
}

impl BioEntityNode {
    pub fn new(namespace: &str, local_id: &str, name: &str, kind: EntityKind) -> Self {
        let namespace = namespace.trim().to_lowercase();
        let local_id = strip_namespace(&namespace, local_id.trim());
        Self {
            id: format!("{}:{}", namespace, local_id),
            namespace,
            local_id,
            name: name.trim().to_string(),
            kind,
        }
    }
}

// Some vocabularies embed the prefix in the ID itself (`DOID:4`, `GO:0008150`).
fn strip_namespace(namespace: &str, local_id: &str) -> String {
    match local_id.split_once(':') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case(namespace) => rest.to_string(),
        _ => local_id.to_string(),
    }
}

/// One ranked answer from a grounding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub namespace: String,
    pub id: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    HasCondition,
    HasIntervention,
    MappedToTrial,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::HasCondition => "has_condition",
            Predicate::HasIntervention => "has_intervention",
            Predicate::MappedToTrial => "mapped_to_trial",
        }
    }

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Condition => Predicate::HasCondition,
            EntityKind::Intervention => Predicate::HasIntervention,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed edge between two node IDs. Identity is `(subject, predicate, object)`;
/// metadata does not take part in deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub subject: String,
    pub predicate: Predicate,
    pub object: String,
    pub metadata: Option<String>,
}

impl Edge {
    pub fn new(subject: impl Into<String>, predicate: Predicate, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate,
            object: object.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn key(&self) -> (&str, Predicate, &str) {
        (&self.subject, self.predicate, &self.object)
    }
}
