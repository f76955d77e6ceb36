//!
//! sqlgate HTTP server
//! -------------------
//! Axum surface in front of the execution pipeline. Four endpoints share one
//! [`Pipeline`]: parameterized execution, the two legacy dashboard shapes
//! (paged grid, single-value tile), and cache flush.
//!
//! Every execution-layer outcome is returned as HTTP 200 with the body
//! distinguishing success from failure; only transport problems (malformed
//! JSON, wrong route) produce non-200 statuses. This keeps "the query
//! failed" separate from "the request never arrived" for dashboard clients.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use futures_util::FutureExt; // for catch_unwind on async blocks
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::PipelineError;
use crate::exec::PgExecutor;
use crate::limits::PageRequest;
use crate::pipeline::{Pipeline, PipelineOutput, QueryKind, QueryRequest};
use crate::vars::EnvVars;

/// Set by the fronting auth layer; part of the cache key so one user's
/// results are never replayed to another.
const IDENTITY_HEADER: &str = "x-dashboard-user";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

pub async fn run() -> anyhow::Result<()> {
    serve(Config::from_env()).await
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    if config.targets.is_empty() {
        warn!("no target databases configured; set SQLGATE_DB_URL");
    }
    let executor = Arc::new(PgExecutor::new(&config.targets, config.pool_size));
    let cache = ResultCache::new(!config.cache_disabled, config.cache_capacity);
    let vars = Arc::new(EnvVars::from_env());
    let pipeline = Arc::new(Pipeline::new(
        executor,
        cache,
        vars,
        config.grid_ttl,
        config.tile_ttl,
    ));

    let app = router(AppState { pipeline });
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/query/execute", post(execute_handler))
        .route("/api/query/grid", post(grid_handler))
        .route("/api/query/tile", post(tile_handler))
        .route("/api/cache/flush", post(flush_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    match run_pipeline(&state, &payload, QueryKind::Grid, &identity).await {
        Ok(output) => Json(execute_envelope(&output)),
        Err(err) => {
            log_refusal(&err);
            Json(err.envelope())
        }
    }
}

/// Legacy paged-grid shape: `page`/`pageSize` as flat body fields. The grid
/// always pages (defaults page 1, pageSize 100) so `totalRows` is always
/// present for the client's pager.
#[derive(Debug, Deserialize)]
struct GridRequest {
    #[serde(flatten)]
    query: QueryRequest,
    #[serde(default)]
    page: Option<Value>,
    #[serde(default, rename = "pageSize")]
    page_size: Option<Value>,
}

async fn grid_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GridRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    let mut request = payload.query;
    request.pagination = Some(PageRequest {
        page: payload.page.unwrap_or(Value::Null),
        page_size: payload.page_size.unwrap_or(Value::Null),
    });
    match run_pipeline(&state, &request, QueryKind::Grid, &identity).await {
        Ok(output) => Json(grid_envelope(&output)),
        Err(err) => {
            log_refusal(&err);
            Json(err.envelope())
        }
    }
}

async fn tile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> impl IntoResponse {
    let identity = identity_from_headers(&headers);
    match run_pipeline(&state, &payload, QueryKind::Tile, &identity).await {
        Ok(output) => Json(json!({ "value": tile_value(&output) })),
        Err(err) => {
            log_refusal(&err);
            Json(err.envelope())
        }
    }
}

async fn flush_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.pipeline.flush_cache();
    info!("result cache flushed");
    Json(json!({"success": true}))
}

/// Run the pipeline with panic containment: a parser or driver panic
/// becomes an INTERNAL_ERROR response instead of a dead connection.
async fn run_pipeline(
    state: &AppState,
    request: &QueryRequest,
    kind: QueryKind,
    identity: &str,
) -> Result<PipelineOutput, PipelineError> {
    let fut = state.pipeline.run(request, kind, identity);
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic_payload) => {
            let msg = panic_message(panic_payload);
            error!(target: "panic", "pipeline panic: {}", msg);
            Err(PipelineError::internal(msg))
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn identity_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn log_refusal(err: &PipelineError) {
    match err {
        PipelineError::Internal(detail) => error!("pipeline internal fault: {}", detail),
        PipelineError::Execution { message, .. } => info!("execution failed: {}", message),
        other => debug!("request refused: {}", other),
    }
}

fn execute_envelope(output: &PipelineOutput) -> Value {
    let result = &output.payload.result;
    let mut body = json!({
        "columns": result.columns,
        "rows": result.rows,
        "stats": {
            "rowCount": result.row_count(),
            "elapsedMs": result.elapsed_ms,
            "usedParamCount": output.used_params,
        },
    });
    if let Some(page) = &output.pagination {
        let total = output.payload.total_rows.unwrap_or(result.row_count() as i64);
        let total_pages = if total <= 0 {
            0
        } else {
            (total as u64).div_ceil(page.page_size as u64)
        };
        body["pagination"] = json!({
            "page": page.page,
            "pageSize": page.page_size,
            "totalRows": total,
            "totalPages": total_pages,
        });
    }
    body
}

fn grid_envelope(output: &PipelineOutput) -> Value {
    let result = &output.payload.result;
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    json!({
        "columns": names,
        "rows": result.rows,
        "totalRows": output.payload.total_rows.unwrap_or(result.row_count() as i64),
    })
}

/// First cell of the first row, as a number. Numeric strings (NUMERIC
/// columns decode to exact decimal text) are parsed; everything else is
/// null.
fn tile_value(output: &PipelineOutput) -> Value {
    match output.payload.result.rows.first().and_then(|row| row.first()) {
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
