mod config;
mod metrics;

use anyhow::{Context, Result};
use assemble::{CancelHandle, Diagnostic, Neo4jSink, Pipeline, PipelineStats};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use ground::{GildaClient, GroundingService, LexiconService};
use ingest::{RawBatch, RawRecordReader, Source};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, GroundingBackend};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    config: AppConfig,
    pipeline: Pipeline,
    neo4j: Option<Neo4jSink>,
    metrics: Arc<Metrics>,
    // One run at a time; the handle lets /cancel reach it.
    run_lock: Mutex<()>,
    current_run: std::sync::Mutex<Option<CancelHandle>>,
}

#[derive(Serialize)]
struct HealthResponse {
    grounding: String,
    neo4j: Option<String>,
}

#[derive(Deserialize)]
struct RunRequest {
    clinicaltrials: Option<String>,
    who: Option<String>,
}

#[derive(Serialize)]
struct RunResponse {
    run_id: String,
    cancelled: bool,
    digest: String,
    files: Vec<String>,
    stats: PipelineStats,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()?;
    info!(mode = ?config.mode, "Loaded configuration");

    let state = build_state(config).await?;
    let addr = state.config.bind_addr.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn grounding_service(config: &AppConfig) -> Result<Arc<dyn GroundingService>> {
    match &config.grounding {
        GroundingBackend::Gilda { url } => Ok(Arc::new(GildaClient::new(url.clone(), config.retry))),
        GroundingBackend::Lexicon { path } => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read lexicon {}", path.display()))?;
            let lexicon = LexiconService::from_json(&content)?;
            info!(entries = lexicon.len(), "Loaded grounding lexicon");
            Ok(Arc::new(lexicon))
        }
    }
}

async fn build_state(config: AppConfig) -> Result<Arc<AppState>> {
    let service = grounding_service(&config)?;
    let pipeline = Pipeline::new(service, config.pipeline.clone())?;

    let neo4j = match &config.neo4j {
        Some(neo4j_config) => {
            let sink = Neo4jSink::connect(neo4j_config).await?;
            sink.init_schema().await?;
            Some(sink)
        }
        None => None,
    };

    Ok(Arc::new(AppState {
        config,
        pipeline,
        neo4j,
        metrics: Metrics::new(),
        run_lock: Mutex::new(()),
        current_run: std::sync::Mutex::new(None),
    }))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_pipeline))
        .route("/cancel", post(cancel_run))
        .route("/stats", get(get_stats))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let grounding = match state.pipeline.service().health().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let neo4j = state.neo4j.as_ref().map(|_| "configured".to_string());

    Json(HealthResponse { grounding, neo4j })
}

async fn load_batch(path: &str, source: Source) -> Result<RawBatch, StatusCode> {
    let path = PathBuf::from(path);
    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }

    let batch = if path.is_dir() {
        RawRecordReader::read_directory(&path, source).await
    } else {
        RawRecordReader::read_file(&path, source).await
    };
    batch.map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to read raw records");
        StatusCode::UNPROCESSABLE_ENTITY
    })
}

async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, StatusCode> {
    let result = execute_run(&state, req).await;
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

async fn execute_run(state: &AppState, req: RunRequest) -> Result<RunResponse, StatusCode> {
    if req.clinicaltrials.is_none() && req.who.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let _guard = state.run_lock.try_lock().map_err(|_| StatusCode::CONFLICT)?;

    // Reachable from /cancel while the inputs are still loading.
    let cancel = CancelHandle::new();
    let current = CurrentRun::install(state, cancel.clone());

    let mut batches = Vec::new();
    if let Some(path) = &req.clinicaltrials {
        batches.push(load_batch(path, Source::ClinicalTrials).await?);
    }
    if let Some(path) = &req.who {
        batches.push(load_batch(path, Source::Who).await?);
    }

    let timer = TimedOperation::start();
    let outcome = state.pipeline.run_with_cancel(batches, &cancel).await;
    drop(current);

    let output = outcome.map_err(|e| {
        error!(error = %e, "Pipeline run rejected");
        StatusCode::BAD_REQUEST
    })?;
    state.metrics.record_run(timer.elapsed(), &output.stats, output.cancelled);

    let internal = |e: anyhow::Error| {
        error!(error = %e, "Failed to emit tables");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let digest = output.tables.digest().map_err(internal)?;
    let files = assemble::write_tables(
        &state.config.output.output_dir,
        &output.tables,
        state.config.output.num_sample_entries,
    )
    .map_err(internal)?;

    if let Some(sink) = &state.neo4j {
        if output.cancelled {
            warn!(run_id = %output.run_id, "Skipping Neo4j load for cancelled run");
        } else {
            sink.load(&output.tables).await.map_err(internal)?;
        }
    }

    Ok(RunResponse {
        run_id: output.run_id.to_string(),
        cancelled: output.cancelled,
        digest,
        files: files.iter().map(|p| display(p)).collect(),
        stats: output.stats,
        diagnostics: output.diagnostics,
    })
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn set_current_run(state: &AppState, handle: Option<CancelHandle>) {
    match state.current_run.lock() {
        Ok(mut current) => *current = handle,
        Err(poisoned) => *poisoned.into_inner() = handle,
    }
}

/// Publishes a run's cancel handle until dropped.
struct CurrentRun<'a> {
    state: &'a AppState,
}

impl<'a> CurrentRun<'a> {
    fn install(state: &'a AppState, handle: CancelHandle) -> Self {
        set_current_run(state, Some(handle));
        Self { state }
    }
}

impl Drop for CurrentRun<'_> {
    fn drop(&mut self) {
        set_current_run(self.state, None);
    }
}

async fn cancel_run(State(state): State<Arc<AppState>>) -> Json<CancelResponse> {
    let handle = match state.current_run.lock() {
        Ok(current) => current.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    let cancelled = match handle {
        Some(handle) => {
            info!("Cancelling in-flight run");
            handle.cancel();
            true
        }
        None => false,
    };
    Json(CancelResponse { cancelled })
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("trialgraph-api-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn test_state(dir: &Path) -> Arc<AppState> {
        let lexicon = dir.join("lexicon.json");
        std::fs::write(
            &lexicon,
            r#"[{"namespace": "MESH", "id": "D003924", "name": "Type 2 Diabetes",
                 "type": "condition", "synonyms": ["Diabetes Mellitus Type 2"]}]"#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.grounding = GroundingBackend::Lexicon { path: lexicon };
        config.output.output_dir = dir.join("out");
        config.output.num_sample_entries = 1;
        build_state(config).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_endpoint_writes_tables() {
        let dir = temp_dir("run");
        let ct = dir.join("ct.json");
        std::fs::write(
            &ct,
            r#"[{"protocolSection": {"identificationModule": {"nctId": "NCT001"},
                 "conditionsModule": {"conditions": ["Type 2 Diabetes"]}}}]"#,
        )
        .unwrap();
        let who = dir.join("who.json");
        std::fs::write(
            &who,
            r#"[{"curie": "who:123", "conditions": ["Diabetes Mellitus Type 2"], "mappings": ["NCT001"]}]"#,
        )
        .unwrap();

        let state = test_state(&dir).await;
        let body = format!(
            r#"{{"clinicaltrials": {:?}, "who": {:?}}}"#,
            ct.display().to_string(),
            who.display().to_string()
        );
        let response = router(state.clone()).oneshot(post_json("/run", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["stats"]["trials"], 1);
        assert_eq!(json["stats"]["nodes"], 3);
        assert_eq!(json["files"].as_array().unwrap().len(), 6);
        assert!(dir.join("out").join("trials.tsv").exists());
        assert!(dir.join("out").join("edges.tsv").exists());

        let stats = router(state)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(stats).await["total_runs"], 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_run_requires_input() {
        let dir = temp_dir("empty");
        let state = test_state(&dir).await;

        let response = router(state).oneshot(post_json("/run", "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let dir = temp_dir("missing");
        let state = test_state(&dir).await;

        let response = router(state.clone())
            .oneshot(post_json("/run", r#"{"who": "/nonexistent/who.json"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(state.current_run.lock().unwrap().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_reaches_run_before_pipeline_starts() {
        let dir = temp_dir("cancel-early");
        let state = test_state(&dir).await;
        let cancel = CancelHandle::new();

        let current = CurrentRun::install(&state, cancel.clone());
        let response = router(state.clone()).oneshot(post_json("/cancel", "")).await.unwrap();
        assert_eq!(body_json(response).await["cancelled"], true);
        assert!(cancel.is_cancelled());

        drop(current);
        let response = router(state.clone()).oneshot(post_json("/cancel", "")).await.unwrap();
        assert_eq!(body_json(response).await["cancelled"], false);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_without_run_and_health() {
        let dir = temp_dir("cancel");
        let state = test_state(&dir).await;

        let response = router(state.clone()).oneshot(post_json("/cancel", "")).await.unwrap();
        assert_eq!(body_json(response).await["cancelled"], false);

        let health = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(health).await["grounding"], "ok");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
