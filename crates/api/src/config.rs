use anyhow::{Context, Result, bail};
use assemble::{Neo4jConfig, PipelineConfig};
use ground::{GroundingConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const CONFIG_ENV: &str = "TRIALGRAPH_CONFIG";
pub const MODE_ENV: &str = "TRIALGRAPH_MODE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub bind_addr: String,
    pub pipeline: PipelineConfig,
    pub grounding: GroundingBackend,
    pub retry: RetryPolicy,
    pub output: OutputConfig,
    pub neo4j: Option<Neo4jConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Short timeouts, wide fan-out, few retries
    Accurate,  // Patient lookups, warm-up, more retries
    Balanced,  // Default
}

impl FromStr for OperationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "accurate" => Ok(Self::Accurate),
            "balanced" => Ok(Self::Balanced),
            other => bail!("unknown operation mode `{}`", other),
        }
    }
}

/// Where mentions get grounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum GroundingBackend {
    /// Gilda-compatible web service.
    Gilda { url: String },
    /// JSON list of lexicon entries loaded into memory.
    Lexicon { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// Rows written to the `*_sample.tsv` files; 0 disables samples.
    pub num_sample_entries: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/output"),
            num_sample_entries: 100,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            bind_addr: "0.0.0.0:3000".to_string(),
            pipeline: PipelineConfig::default(),
            grounding: GroundingBackend::Gilda {
                url: "http://localhost:8001".to_string(),
            },
            retry: RetryPolicy::default(),
            output: OutputConfig::default(),
            neo4j: None,
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            pipeline: PipelineConfig {
                grounding: GroundingConfig {
                    lookup_timeout_ms: 2000,
                    max_concurrent_lookups: 16,
                    ..GroundingConfig::default()
                },
                warm_up: false,
            },
            retry: RetryPolicy::new(1, 250, 1000),
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            pipeline: PipelineConfig {
                grounding: GroundingConfig {
                    lookup_timeout_ms: 15000,
                    max_concurrent_lookups: 4,
                    ..GroundingConfig::default()
                },
                warm_up: true,
            },
            retry: RetryPolicy::new(3, 1000, 8000),
            ..Self::default()
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// The lookup timeout wraps every retry of a grounding call, so the
    /// retry backoff has to fit inside it.
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        let timeout_ms = self.pipeline.grounding.lookup_timeout_ms;
        let backoff_ms = self.retry.total_backoff().as_millis() as u64;
        if backoff_ms >= timeout_ms {
            bail!(
                "retry backoff of {}ms does not fit in lookup_timeout_ms ({}ms)",
                backoff_ms,
                timeout_ms
            );
        }
        Ok(())
    }

    /// Config file named by `TRIALGRAPH_CONFIG`, else the preset named by
    /// `TRIALGRAPH_MODE`, else defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            return Self::from_json(&content);
        }
        match std::env::var(MODE_ENV) {
            Ok(mode) => Ok(Self::for_mode(mode.parse()?)),
            Err(_) => Ok(Self::default()),
        }
    }
}
