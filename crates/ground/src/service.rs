//! Grounding service boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ingest::EntityKind;
use serde::{Deserialize, Serialize};

use crate::error::GroundingError;
use crate::normalizer::MentionNormalizer;
use crate::schema::Candidate;

pub const CONDITION_NAMESPACES: &[&str] = &["MESH", "DOID", "MONDO", "EFO", "HP", "GO"];
pub const INTERVENTION_NAMESPACES: &[&str] = &["MESH", "CHEBI", "DRUGBANK", "HGNC", "FPLX", "GO"];

/// Vocabularies a mention of the given kind may be grounded to.
pub fn namespaces_for(hint: EntityKind) -> &'static [&'static str] {
    match hint {
        EntityKind::Condition => CONDITION_NAMESPACES,
        EntityKind::Intervention => INTERVENTION_NAMESPACES,
    }
}

/// Free-text lookup against an external vocabulary index.
///
/// Implementations return candidates ordered best first. The grounder
/// applies thresholds and namespace filtering on top.
#[async_trait]
pub trait GroundingService: Send + Sync {
    async fn lookup(&self, text: &str, hint: EntityKind) -> Result<Vec<Candidate>, GroundingError>;

    async fn health(&self) -> Result<(), GroundingError> {
        self.lookup("health check", EntityKind::Condition)
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub namespace: String,
    pub id: String,
    pub name: String,
    /// Restrict the entry to one mention kind; `None` matches both.
    #[serde(default, rename = "type")]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// In-memory vocabulary scored by word overlap. Serves offline runs and
/// tests in place of a remote grounding service.
pub struct LexiconService {
    entries: Vec<LexiconEntry>,
    normalizer: MentionNormalizer,
}

impl LexiconService {
    pub fn new(entries: Vec<LexiconEntry>) -> Self {
        Self {
            entries,
            normalizer: MentionNormalizer::new(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<LexiconEntry> =
            serde_json::from_str(content).context("Failed to parse lexicon entries")?;
        Ok(Self::new(entries))
    }

    pub fn with_entry(
        mut self,
        namespace: &str,
        id: &str,
        name: &str,
        kind: Option<EntityKind>,
        synonyms: &[&str],
    ) -> Self {
        self.entries.push(LexiconEntry {
            namespace: namespace.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            kind,
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn score(&self, query: &str, entry: &LexiconEntry) -> f64 {
        std::iter::once(&entry.name)
            .chain(entry.synonyms.iter())
            .map(|term| self.normalizer.overlap(query, &self.normalizer.normalize(term)))
            .fold(0.0, f64::max)
    }
}

#[async_trait]
impl GroundingService for LexiconService {
    async fn lookup(&self, text: &str, hint: EntityKind) -> Result<Vec<Candidate>, GroundingError> {
        let query = self.normalizer.normalize(text);
        let mut candidates: Vec<Candidate> = self
            .entries
            .iter()
            .filter(|entry| entry.kind.is_none_or(|kind| kind == hint))
            .filter_map(|entry| {
                let score = self.score(&query, entry);
                (score > 0.0).then(|| Candidate {
                    namespace: entry.namespace.clone(),
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    score,
                })
            })
            .collect();

        // Stable sort keeps lexicon order among equal scores.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(candidates)
    }

    async fn health(&self) -> Result<(), GroundingError> {
        Ok(())
    }
}
