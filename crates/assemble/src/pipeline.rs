//! End-to-end run: map, ground, resolve, assemble.
//!
//! Every run gets its own `RunContext`, so the grounding cache and node
//! registry never outlive the run that filled them.

use ground::{CacheKey, Edge, Grounder, GroundingConfig, GroundingService, GroundingStats, Predicate};
use ingest::{RawBatch, TrialRecord};
use resolve::{TrialNode, resolve};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::{GraphTables, assemble};
use crate::error::{Diagnostic, PipelineError};

type Grounded = HashMap<CacheKey, Option<Arc<ground::BioEntityNode>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub grounding: GroundingConfig,
    /// Send one throwaway lookup before the batch.
    pub warm_up: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grounding: GroundingConfig::default(),
            warm_up: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let grounding = &self.grounding;
        if !(0.0..=1.0).contains(&grounding.min_confidence) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                grounding.min_confidence
            )));
        }
        if grounding.lookup_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "lookup_timeout_ms must be positive".to_string(),
            ));
        }
        if grounding.max_concurrent_lookups == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrent_lookups must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cooperative cancellation, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub records_read: usize,
    pub records_mapped: usize,
    pub mapping_failures: usize,
    pub trials: usize,
    pub merged_trials: usize,
    pub grounded_mentions: usize,
    pub ungrounded_mentions: usize,
    pub nodes: usize,
    pub edges: usize,
    pub grounding: GroundingStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub tables: GraphTables,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: PipelineStats,
    pub cancelled: bool,
}

/// State owned by a single run.
struct RunContext {
    run_id: Uuid,
    grounder: Arc<Grounder>,
    cancel: CancelHandle,
    diagnostics: Vec<Diagnostic>,
    stats: PipelineStats,
}

impl RunContext {
    fn new(service: Arc<dyn GroundingService>, config: &PipelineConfig, cancel: CancelHandle) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            grounder: Arc::new(Grounder::new(service, config.grounding)),
            cancel,
            diagnostics: Vec::new(),
            stats: PipelineStats::default(),
        }
    }
}

pub struct Pipeline {
    service: Arc<dyn GroundingService>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(service: Arc<dyn GroundingService>, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { service, config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<dyn GroundingService> {
        &self.service
    }

    pub async fn run(&self, batches: Vec<RawBatch>) -> Result<PipelineOutput, PipelineError> {
        self.run_with_cancel(batches, &CancelHandle::new()).await
    }

    /// Best-effort run: per-record problems become diagnostics, only
    /// precondition violations are returned as errors.
    pub async fn run_with_cancel(
        &self,
        batches: Vec<RawBatch>,
        cancel: &CancelHandle,
    ) -> Result<PipelineOutput, PipelineError> {
        if batches.is_empty() {
            return Err(PipelineError::NoInput);
        }

        let started = Instant::now();
        let mut ctx = RunContext::new(Arc::clone(&self.service), &self.config, cancel.clone());
        info!(run_id = %ctx.run_id, batches = batches.len(), "Starting pipeline run");

        let records = map_batches(&mut ctx, &batches);

        if self.config.warm_up && !ctx.cancel.is_cancelled() {
            ctx.grounder.warm_up().await;
        }
        let grounded = ground_records(&ctx, &records).await;

        let resolution = resolve(&records);
        ctx.stats.trials = resolution.trials.len();
        ctx.stats.merged_trials = resolution.merged_count();
        ctx.diagnostics
            .extend(resolution.warnings.iter().cloned().map(Diagnostic::from));

        let mut edges = resolution.edges.clone();
        edges.extend(associate(&mut ctx, &resolution.trials, &grounded).await);

        let assembly = assemble(&resolution.trials, &ctx.grounder.nodes(), &edges);
        ctx.diagnostics
            .extend(assembly.errors.into_iter().map(Diagnostic::from));

        let cancelled = ctx.cancel.is_cancelled();
        let mut stats = ctx.stats;
        stats.nodes = assembly.tables.nodes.len();
        stats.edges = assembly.tables.edges.len();
        stats.grounding = ctx.grounder.stats();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            run_id = %ctx.run_id,
            nodes = stats.nodes,
            edges = stats.edges,
            diagnostics = ctx.diagnostics.len(),
            cancelled,
            elapsed_ms = stats.elapsed_ms,
            "Pipeline run finished"
        );

        Ok(PipelineOutput {
            run_id: ctx.run_id,
            tables: assembly.tables,
            diagnostics: ctx.diagnostics,
            stats,
            cancelled,
        })
    }
}

fn map_batches(ctx: &mut RunContext, batches: &[RawBatch]) -> Vec<TrialRecord> {
    let mut records = Vec::new();

    for batch in batches {
        for rejected in &batch.rejected {
            warn!(source = %batch.source, position = rejected.position, error = %rejected.error, "Skipping undecodable record");
            ctx.stats.records_read += 1;
            ctx.stats.mapping_failures += 1;
            ctx.diagnostics.push(Diagnostic::Mapping {
                source: batch.source,
                position: rejected.position,
                message: rejected.error.to_string(),
            });
        }

        for (position, raw) in batch.records.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                info!(run_id = %ctx.run_id, "Run cancelled; skipping remaining records");
                return records;
            }
            ctx.stats.records_read += 1;

            match ingest::map(raw, batch.source) {
                Ok(record) => {
                    debug!(record_id = %record.id, "Mapped record");
                    ctx.stats.records_mapped += 1;
                    records.push(record);
                }
                Err(error) => {
                    warn!(source = %batch.source, position, %error, "Skipping record");
                    ctx.stats.mapping_failures += 1;
                    ctx.diagnostics.push(Diagnostic::Mapping {
                        source: batch.source,
                        position,
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    records
}

// Preset mentions are resolved later without touching the service.
async fn ground_records(ctx: &RunContext, records: &[TrialRecord]) -> Grounded {
    let mentions: Vec<_> = records
        .iter()
        .flat_map(|r| r.mentions())
        .filter(|m| m.preset.is_none())
        .map(|m| (m.text.clone(), m.kind))
        .collect();

    ctx.grounder.ground_all(mentions, Arc::clone(&ctx.cancel.0)).await
}

async fn associate(ctx: &mut RunContext, trials: &[TrialNode], grounded: &Grounded) -> Vec<Edge> {
    let mut edges = Vec::new();

    for trial in trials {
        if ctx.cancel.is_cancelled() {
            break;
        }
        for mention in trial.mentions() {
            let node = if mention.preset.is_some() {
                ctx.grounder.ground_mention(mention).await
            } else {
                let key = ctx.grounder.cache_key(&mention.text, mention.kind);
                match grounded.get(&key) {
                    Some(node) => node.clone(),
                    // Never looked up: empty text or a cancelled run.
                    None => continue,
                }
            };

            match node {
                Some(node) => {
                    ctx.stats.grounded_mentions += 1;
                    edges.push(Edge::new(&trial.id, Predicate::for_kind(mention.kind), &node.id));
                }
                None => {
                    debug!(trial = %trial.id, mention = %mention.text, hint = %mention.kind, "Ungrounded mention");
                    ctx.stats.ungrounded_mentions += 1;
                    ctx.diagnostics.push(Diagnostic::Ungrounded {
                        trial: trial.id.clone(),
                        mention: mention.text.clone(),
                        hint: mention.kind,
                    });
                }
            }
        }
    }

    edges
}
