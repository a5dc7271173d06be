use ingest::{DesignInfo, Mention, Outcome, Source, TrialRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

/// Source record folded into a `TrialNode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub source: Source,
    pub title: String,
}

/// One real-world trial after identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialNode {
    /// ID of the primary source record.
    pub id: String,
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
    pub countries: Vec<String>,
    pub references: Vec<String>,
    /// Members in precedence order; the first one is the primary.
    pub members: Vec<MemberRecord>,
}

impl TrialNode {
    /// Merge records already sorted by precedence.
    ///
    /// Scalars take the first non-empty value, lists are unioned in order.
    /// Returns `None` for an empty group.
    pub fn merge(records: &[&TrialRecord]) -> Option<Self> {
        let primary = records.first()?;

        let node = Self {
            id: primary.id.clone(),
            source: primary.source,
            title: first_text(records, "title", |r| &r.title),
            official_title: first_text(records, "official_title", |r| &r.official_title),
            brief_summary: first_text(records, "brief_summary", |r| &r.brief_summary),
            study_type: first_text(records, "study_type", |r| &r.study_type),
            design: records
                .iter()
                .map(|r| &r.design)
                .find(|d| !d.is_empty())
                .cloned()
                .unwrap_or_default(),
            phase: first_text(records, "phase", |r| &r.phase),
            status: first_text(records, "status", |r| &r.status),
            why_stopped: first_text(records, "why_stopped", |r| &r.why_stopped),
            start_year: records.iter().find_map(|r| r.start_year),
            conditions: union(records, |r| &r.conditions),
            interventions: union(records, |r| &r.interventions),
            primary_outcomes: union(records, |r| &r.primary_outcomes),
            secondary_outcomes: union(records, |r| &r.secondary_outcomes),
            secondary_ids: union(records, |r| &r.secondary_ids),
            countries: union(records, |r| &r.countries),
            references: union(records, |r| &r.references),
            members: dedup_members(records),
        };

        Some(node)
    }

    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }

    /// Distinct sources of the members, e.g. `clinicaltrials;who`.
    pub fn provenance(&self) -> String {
        let mut sources: Vec<Source> = self.members.iter().map(|m| m.source).collect();
        sources.sort();
        sources.dedup();
        sources.iter().map(|s| s.tag()).collect::<Vec<_>>().join(";")
    }

    pub fn mentions(&self) -> impl Iterator<Item = &Mention> {
        self.conditions.iter().chain(self.interventions.iter())
    }

    /// Members whose ID differs from the merged node's ID.
    pub fn aliases(&self) -> impl Iterator<Item = &MemberRecord> {
        self.members.iter().filter(move |m| m.id != self.id)
    }
}

fn first_text<'a>(
    records: &[&'a TrialRecord],
    field: &str,
    get: impl Fn(&'a TrialRecord) -> &'a String,
) -> String {
    let mut values = records.iter().map(|r| get(*r)).filter(|v| !v.is_empty());
    let Some(chosen) = values.next() else {
        return String::new();
    };
    for other in values.filter(|v| *v != chosen) {
        debug!(
            trial = %records[0].id,
            field,
            kept = %chosen,
            dropped = %other,
            "Conflicting field resolved by source precedence"
        );
    }
    chosen.clone()
}

fn union<'a, T>(records: &[&'a TrialRecord], get: impl Fn(&'a TrialRecord) -> &'a Vec<T>) -> Vec<T>
where
    T: Clone + Eq + Hash + 'a,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for record in records {
        for item in get(*record) {
            if seen.insert(item) {
                merged.push(item.clone());
            }
        }
    }
    merged
}

fn dedup_members(records: &[&TrialRecord]) -> Vec<MemberRecord> {
    let mut seen = HashSet::new();
    let mut members = Vec::new();
    for record in records {
        if seen.insert(record.id.clone()) {
            members.push(MemberRecord {
                id: record.id.clone(),
                source: record.source,
                title: record.title.clone(),
            });
        }
    }
    members
}
