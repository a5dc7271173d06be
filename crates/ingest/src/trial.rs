use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry a record was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    ClinicalTrials,
    Who,
}

impl Source {
    pub fn tag(&self) -> &'static str {
        match self {
            Source::ClinicalTrials => "clinicaltrials",
            Source::Who => "who",
        }
    }

    /// ClinicalTrials.gov is authoritative when merged records disagree.
    pub fn is_canonical(&self) -> bool {
        matches!(self, Source::ClinicalTrials)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Condition,
    Intervention,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Condition => "condition",
            EntityKind::Intervention => "intervention",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A grounding supplied by the registry itself (e.g. derived MeSH terms).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetGrounding {
    pub namespace: String,
    pub id: String,
}

/// Free-text biomedical mention as it appeared in the source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    pub kind: EntityKind,
    /// Registry-provided qualifier such as the intervention type ("drug").
    pub label: Option<String>,
    pub preset: Option<PresetGrounding>,
}

impl Mention {
    pub fn new(text: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            text: text.into(),
            kind,
            label: None,
            preset: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label.filter(|l| !l.is_empty());
        self
    }

    pub fn with_preset(mut self, namespace: &str, id: &str) -> Self {
        self.preset = Some(PresetGrounding {
            namespace: namespace.to_string(),
            id: id.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignInfo {
    pub purpose: String,
    pub allocation: String,
    pub masking: String,
    pub assignment: String,
    /// Raw design text kept when it could not be split into attributes.
    pub fallback: Option<String>,
}

impl DesignInfo {
    pub fn is_empty(&self) -> bool {
        self.fallback.is_none()
            && self.purpose.is_empty()
            && self.allocation.is_empty()
            && self.masking.is_empty()
            && self.assignment.is_empty()
    }

    pub fn describe(&self) -> String {
        if let Some(fallback) = &self.fallback {
            return fallback.clone();
        }
        if self.is_empty() {
            return String::new();
        }
        format!(
            "Purpose: {}; Allocation: {}; Masking: {}; Assignment: {}",
            self.purpose, self.allocation, self.masking, self.assignment
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome {
    pub measure: String,
    pub time_frame: String,
}

impl Outcome {
    pub fn describe(&self) -> String {
        if self.time_frame.is_empty() {
            format!("Measure: {}", self.measure)
        } else {
            format!("Measure: {}, Time Frame: {}", self.measure, self.time_frame)
        }
    }

    /// Outcomes flattened into one `;`-separated text column.
    pub fn join(outcomes: &[Outcome]) -> String {
        outcomes.iter().map(Outcome::describe).collect::<Vec<_>>().join("; ")
    }
}

/// Common intermediate trial representation, one per raw record.
///
/// Missing source fields are defaulted, never an error; only the primary
/// identifier is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Source-qualified identifier, e.g. `clinicaltrials:NCT00000102`.
    pub id: String,
    pub native_id: String,
    pub source: Source,
    pub title: String,
    pub official_title: String,
    pub brief_summary: String,
    pub study_type: String,
    pub design: DesignInfo,
    pub phase: String,
    pub status: String,
    pub why_stopped: String,
    pub start_year: Option<i32>,
    pub conditions: Vec<Mention>,
    pub interventions: Vec<Mention>,
    pub primary_outcomes: Vec<Outcome>,
    pub secondary_outcomes: Vec<Outcome>,
    pub secondary_ids: Vec<String>,
    /// Explicit pointers to the same trial in another registry.
    pub cross_references: Vec<String>,
    pub countries: Vec<String>,
    pub references: Vec<String>,
}

impl TrialRecord {
    pub fn new(source: Source, prefix: &str, native_id: &str) -> Self {
        Self {
            id: format!("{}:{}", prefix, native_id),
            native_id: native_id.to_string(),
            source,
            title: String::new(),
            official_title: String::new(),
            brief_summary: String::new(),
            study_type: String::new(),
            design: DesignInfo::default(),
            phase: String::new(),
            status: String::new(),
            why_stopped: String::new(),
            start_year: None,
            conditions: Vec::new(),
            interventions: Vec::new(),
            primary_outcomes: Vec::new(),
            secondary_outcomes: Vec::new(),
            secondary_ids: Vec::new(),
            cross_references: Vec::new(),
            countries: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn mentions(&self) -> impl Iterator<Item = &Mention> {
        self.conditions.iter().chain(self.interventions.iter())
    }
}
