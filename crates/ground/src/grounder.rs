//! Entity Grounder: free-text mentions to canonical `BioEntityNode`s.
//!
//! One `Grounder` lives for exactly one pipeline run. It memoizes every
//! `(normalized mention, hint)` lookup and interns nodes by `(ID, kind)`, so
//! identical mentions always resolve to the same `Arc<BioEntityNode>` and no
//! lookup is ever issued twice. A concept reached under both hints keeps one
//! node per kind, whichever lookup finishes first.

use dashmap::DashMap;
use ingest::{EntityKind, Mention};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::normalizer::MentionNormalizer;
use crate::schema::{BioEntityNode, Candidate};
use crate::service::{GroundingService, namespaces_for};

/// Root concepts too generic to be useful as graph nodes.
const SKIPPED_IDS: &[&str] = &["doid:4"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Candidates scoring below this are ignored.
    pub min_confidence: f64,
    pub lookup_timeout_ms: u64,
    pub max_concurrent_lookups: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            lookup_timeout_ms: 5000,
            max_concurrent_lookups: 8,
        }
    }
}

pub type CacheKey = (String, EntityKind);
type Slot = Arc<OnceCell<Option<Arc<BioEntityNode>>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingStats {
    pub lookups: usize,
    pub grounded: usize,
    pub ungrounded: usize,
    pub timeouts: usize,
    pub failures: usize,
    pub nodes: usize,
}

#[derive(Default)]
struct Counters {
    lookups: AtomicUsize,
    grounded: AtomicUsize,
    ungrounded: AtomicUsize,
    timeouts: AtomicUsize,
    failures: AtomicUsize,
}

pub struct Grounder {
    service: Arc<dyn GroundingService>,
    config: GroundingConfig,
    normalizer: MentionNormalizer,
    cache: DashMap<CacheKey, Slot>,
    nodes: DashMap<(String, EntityKind), Arc<BioEntityNode>>,
    counters: Counters,
}

impl Grounder {
    pub fn new(service: Arc<dyn GroundingService>, config: GroundingConfig) -> Self {
        Self {
            service,
            config,
            normalizer: MentionNormalizer::new(),
            cache: DashMap::new(),
            nodes: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &GroundingConfig {
        &self.config
    }

    pub fn cache_key(&self, text: &str, hint: EntityKind) -> CacheKey {
        (self.normalizer.normalize(text), hint)
    }

    /// Resolve a mention to its node, or `None` when nothing qualifies.
    ///
    /// Concurrent calls for the same key wait on a single lookup.
    pub async fn ground(&self, text: &str, hint: EntityKind) -> Option<Arc<BioEntityNode>> {
        let key = self.cache_key(text, hint);
        if key.0.is_empty() {
            return None;
        }

        let slot: Slot = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        slot.get_or_init(|| self.lookup(&key.0, hint)).await.clone()
    }

    /// Like `ground`, but registry-supplied groundings bypass the service.
    pub async fn ground_mention(&self, mention: &Mention) -> Option<Arc<BioEntityNode>> {
        match &mention.preset {
            Some(preset) => {
                let node = BioEntityNode::new(&preset.namespace, &preset.id, &mention.text, mention.kind);
                if SKIPPED_IDS.contains(&node.id.as_str()) {
                    return None;
                }
                Some(self.intern(node))
            }
            None => self.ground(&mention.text, mention.kind).await,
        }
    }

    /// Ground many mentions concurrently, bounded by `max_concurrent_lookups`.
    ///
    /// Once `cancelled` is set, keys not yet started are left out of the
    /// result.
    pub async fn ground_all(
        self: &Arc<Self>,
        mentions: Vec<(String, EntityKind)>,
        cancelled: Arc<AtomicBool>,
    ) -> HashMap<CacheKey, Option<Arc<BioEntityNode>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_lookups.max(1)));
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();

        for (text, hint) in mentions {
            let key = self.cache_key(&text, hint);
            if key.0.is_empty() || !seen.insert(key.clone()) {
                continue;
            }

            let grounder = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&cancelled);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                if cancelled.load(Ordering::Relaxed) {
                    return None;
                }
                let node = grounder.ground(&key.0, key.1).await;
                Some((key, node))
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some((key, node))) => {
                    results.insert(key, node);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Grounding task failed"),
            }
        }
        results
    }

    /// Issue one uncached lookup so a cold service loads its index before
    /// the real batch starts.
    pub async fn warm_up(&self) {
        info!("Warming up grounding service...");
        let timeout = Duration::from_millis(self.config.lookup_timeout_ms);
        match tokio::time::timeout(timeout, self.service.lookup("stuff", EntityKind::Condition)).await {
            Ok(Ok(_)) => info!("Grounding service ready"),
            Ok(Err(e)) => warn!(error = %e, "Grounding warm-up failed"),
            Err(_) => warn!(timeout_ms = self.config.lookup_timeout_ms, "Grounding warm-up timed out"),
        }
    }

    /// All nodes created so far, ordered by ID and then kind.
    pub fn nodes(&self) -> Vec<Arc<BioEntityNode>> {
        let mut nodes: Vec<Arc<BioEntityNode>> =
            self.nodes.iter().map(|entry| Arc::clone(entry.value())).collect();
        nodes.sort_by(|a, b| (&a.id, a.kind).cmp(&(&b.id, b.kind)));
        nodes
    }

    pub fn stats(&self) -> GroundingStats {
        GroundingStats {
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            grounded: self.counters.grounded.load(Ordering::Relaxed),
            ungrounded: self.counters.ungrounded.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            nodes: self.nodes.len(),
        }
    }

    async fn lookup(&self, text: &str, hint: EntityKind) -> Option<Arc<BioEntityNode>> {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        let timeout = Duration::from_millis(self.config.lookup_timeout_ms);

        let candidates = match tokio::time::timeout(timeout, self.service.lookup(text, hint)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(mention = %text, hint = %hint, error = %e, "Grounding lookup failed");
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.counters.ungrounded.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(_) => {
                warn!(
                    mention = %text,
                    hint = %hint,
                    timeout_ms = self.config.lookup_timeout_ms,
                    "Grounding lookup timed out"
                );
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                self.counters.ungrounded.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match self.select(&candidates, hint) {
            Some(node) => {
                self.counters.grounded.fetch_add(1, Ordering::Relaxed);
                Some(self.intern(node))
            }
            None => {
                debug!(
                    mention = %text,
                    hint = %hint,
                    candidates = candidates.len(),
                    "No grounding above confidence threshold"
                );
                self.counters.ungrounded.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // Best-scoring admissible candidate; earlier candidates win ties.
    fn select(&self, candidates: &[Candidate], hint: EntityKind) -> Option<BioEntityNode> {
        let allowed = namespaces_for(hint);
        let mut best: Option<&Candidate> = None;

        for candidate in candidates {
            if candidate.score < self.config.min_confidence {
                continue;
            }
            if !allowed.iter().any(|ns| ns.eq_ignore_ascii_case(&candidate.namespace)) {
                continue;
            }
            if best.is_some_and(|b| b.score >= candidate.score) {
                continue;
            }
            let node = BioEntityNode::new(&candidate.namespace, &candidate.id, &candidate.name, hint);
            if SKIPPED_IDS.contains(&node.id.as_str()) {
                continue;
            }
            best = Some(candidate);
        }

        best.map(|c| BioEntityNode::new(&c.namespace, &c.id, &c.name, hint))
    }

    // Insert-if-absent per (ID, kind).
    fn intern(&self, node: BioEntityNode) -> Arc<BioEntityNode> {
        self.nodes
            .entry((node.id.clone(), node.kind))
            .or_insert_with(|| Arc::new(node))
            .clone()
    }
}
