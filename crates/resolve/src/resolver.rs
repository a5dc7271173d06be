//! Trial Identity Resolver.
//!
//! Records are grouped with a disjoint-set over record indices. Evidence is
//! applied in priority order: identical IDs, explicit cross-references,
//! then secondary IDs. A union that would put two distinct canonical
//! registry trials in one group is refused.

use ground::{Edge, Predicate};
use ingest::TrialRecord;
use ingest::registry::identity_key;
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::ResolutionWarning;
use crate::trial_node::TrialNode;

/// Evidence that linked a record to its trial's primary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    CrossReference,
    SecondaryId,
}

impl MatchBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossReference => "cross_reference",
            Self::SecondaryId => "secondary_id",
        }
    }
}

impl fmt::Display for MatchBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub trials: Vec<TrialNode>,
    /// `mapped_to_trial` edges, non-primary record to primary record.
    pub edges: Vec<Edge>,
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    pub fn merged_count(&self) -> usize {
        self.trials.iter().filter(|t| t.is_merged()).count()
    }
}

struct Groups<'a> {
    records: &'a [TrialRecord],
    sets: UnionFind<usize>,
    // Canonical native ID held by each set, indexed by root.
    canonical: Vec<Option<String>>,
    warnings: Vec<ResolutionWarning>,
}

impl<'a> Groups<'a> {
    fn new(records: &'a [TrialRecord]) -> Self {
        let canonical = records
            .iter()
            .map(|r| r.source.is_canonical().then(|| r.native_id.clone()))
            .collect();
        Self {
            records,
            sets: UnionFind::new(records.len()),
            canonical,
            warnings: Vec::new(),
        }
    }

    fn join(&mut self, record: usize, other: usize) {
        let (a, b) = (self.sets.find_mut(record), self.sets.find_mut(other));
        if a == b {
            return;
        }

        if let (Some(left), Some(right)) = (&self.canonical[a], &self.canonical[b]) {
            if left != right {
                let warning = ResolutionWarning::AmbiguousLink {
                    record: self.records[record].id.clone(),
                    left: left.clone(),
                    right: right.clone(),
                };
                warn!(record_id = %self.records[record].id, %warning, "Refusing ambiguous trial link");
                self.warnings.push(warning);
                return;
            }
        }

        let merged = self.canonical[a].take().or_else(|| self.canonical[b].take());
        self.sets.union(a, b);
        let root = self.sets.find_mut(a);
        self.canonical[root] = merged;
    }
}

/// Group records denoting the same trial and merge each group.
///
/// Output does not depend on input order beyond the first-seen rule for
/// groups without a canonical record.
pub fn resolve(records: &[TrialRecord]) -> Resolution {
    let mut groups = Groups::new(records);

    let mut by_id: HashMap<&str, usize> = HashMap::new();
    let mut by_native: HashMap<String, usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        match by_id.entry(record.id.as_str()) {
            Entry::Occupied(first) => groups.join(index, *first.get()),
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
        }
        by_native.entry(identity_key(&record.native_id)).or_insert(index);
    }

    for (index, record) in records.iter().enumerate() {
        for target in &record.cross_references {
            let found = by_id
                .get(target.as_str())
                .or_else(|| by_native.get(&identity_key(target)))
                .copied();
            match found {
                Some(other) if other != index => groups.join(index, other),
                Some(_) => {}
                None => {
                    let warning = ResolutionWarning::BrokenCrossReference {
                        record: record.id.clone(),
                        target: target.clone(),
                    };
                    debug!(record_id = %record.id, target = %target, "Cross-reference target not in batch");
                    groups.warnings.push(warning);
                }
            }
        }
    }

    let mut by_secondary: HashMap<String, usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        for secondary in &record.secondary_ids {
            let key = identity_key(secondary);
            if key.is_empty() {
                continue;
            }
            if let Some(&other) = by_native.get(&key) {
                if other != index {
                    groups.join(index, other);
                }
            }
            match by_secondary.entry(key) {
                Entry::Occupied(first) => groups.join(index, *first.get()),
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }
    }

    // Members per root, in input order; roots in order of first member.
    let mut order: Vec<usize> = Vec::new();
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..records.len() {
        let root = groups.sets.find_mut(index);
        members
            .entry(root)
            .or_insert_with(|| {
                order.push(root);
                Vec::new()
            })
            .push(index);
    }

    let mut resolution = Resolution::default();
    for root in order {
        let mut group = members.remove(&root).unwrap_or_default();
        // Stable: canonical records first, otherwise input order.
        group.sort_by_key(|&i| !records[i].source.is_canonical());

        let ranked: Vec<&TrialRecord> = group.iter().map(|&i| &records[i]).collect();
        let Some(trial) = TrialNode::merge(&ranked) else {
            continue;
        };

        for alias in trial.aliases() {
            let basis = match_basis(&ranked, &alias.id, &trial.id);
            resolution.edges.push(
                Edge::new(alias.id.clone(), Predicate::MappedToTrial, trial.id.clone())
                    .with_metadata(basis.as_str()),
            );
        }
        resolution.trials.push(trial);
    }

    resolution.warnings = std::mem::take(&mut groups.warnings);
    info!(
        records = records.len(),
        trials = resolution.trials.len(),
        merged = resolution.merged_count(),
        warnings = resolution.warnings.len(),
        "Resolved trial identities"
    );
    resolution
}

fn match_basis(group: &[&TrialRecord], alias: &str, primary: &str) -> MatchBasis {
    let points_at = |from: &str, to: &str| {
        group
            .iter()
            .filter(|r| r.id == from)
            .any(|r| r.cross_references.iter().any(|x| x == to))
    };
    if points_at(alias, primary) || points_at(primary, alias) {
        MatchBasis::CrossReference
    } else {
        MatchBasis::SecondaryId
    }
}
