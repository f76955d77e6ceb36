//! Request orchestration. One call runs the whole state machine: placeholder
//! scan, safety gate, parameter binding, limit resolution, cache lookup,
//! bounded execution, cache store. Rejections terminate before any
//! connection is used, and cache hits never touch the database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{fingerprint, CachedResult, ResultCache};
use crate::config::DEFAULT_TARGET;
use crate::error::{PipelineError, PipelineResult};
use crate::exec::{ExecError, QueryExecutor};
use crate::gate::{self, GateError};
use crate::limits::{self, EffectiveLimits, PageRequest, Pagination};
use crate::params::{self, BindError, ParamSpec, TypedValue};
use crate::vars::{self, VarStore};

/// Global variables consulted for limit precedence.
const VAR_TIMEOUT_MS: &str = "query_timeout_ms";
const VAR_MAX_ROWS: &str = "query_max_rows";

/// Per-request limit overrides, nested under `limits` in the body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsRequest {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_rows: Option<u32>,
}

/// One execution request as the HTTP layer hands it over. Every field is
/// optional except the statement text so malformed callers fail inside the
/// pipeline with coded errors, not at deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default, rename = "paramSpecs")]
    pub param_specs: HashMap<String, ParamSpec>,
    #[serde(default)]
    pub limits: Option<LimitsRequest>,
    #[serde(default)]
    pub pagination: Option<PageRequest>,
}

/// Consumption path. Grids are tabular (optionally paged); tiles are a
/// single value. The kind selects the row bound and the cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Grid,
    Tile,
}

/// Everything the HTTP layer needs to shape a response.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub payload: Arc<CachedResult>,
    pub cache_hit: bool,
    pub limits: EffectiveLimits,
    pub pagination: Option<Pagination>,
    pub used_params: usize,
}

pub struct Pipeline {
    executor: Arc<dyn QueryExecutor>,
    cache: ResultCache,
    vars: Arc<dyn VarStore>,
    grid_ttl: Duration,
    tile_ttl: Duration,
}

impl Pipeline {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        cache: ResultCache,
        vars: Arc<dyn VarStore>,
        grid_ttl: Duration,
        tile_ttl: Duration,
    ) -> Self {
        Pipeline { executor, cache, vars, grid_ttl, tile_ttl }
    }

    pub fn flush_cache(&self) {
        self.cache.flush_all();
    }

    pub async fn run(
        &self,
        request: &QueryRequest,
        kind: QueryKind,
        identity: &str,
    ) -> PipelineResult<PipelineOutput> {
        check_request_options(request)?;
        let target = request.database.as_deref().unwrap_or(DEFAULT_TARGET);

        // Rewrite `:name` references first so the gate parses standard `$n`
        // placeholders; the rewritten text is also what gets executed.
        let scan = params::scan_placeholders(&request.statement);
        let accepted = gate::validate(&scan.rewritten).map_err(|err| match err {
            GateError::Rejected(issues) => PipelineError::Rejected(issues),
            GateError::Internal(detail) => PipelineError::Internal(detail),
        })?;

        let pagination = match (kind, &request.pagination) {
            (QueryKind::Grid, Some(page)) => {
                Some(page.validate().map_err(PipelineError::InvalidPagination)?)
            }
            // Tiles return one value; a pagination block selects nothing.
            _ => None,
        };

        let globals = vars::collect(self.vars.as_ref(), &scan.names);
        let bound = params::bind(&request.param_specs, &scan.names, &request.params, &globals)
            .map_err(|err| match err {
                BindError::Missing(name) => PipelineError::MissingParam { name },
                BindError::Invalid { name, message } => {
                    PipelineError::InvalidParam { name, message }
                }
            })?;

        let limits = limits::resolve(
            request.limits.as_ref().and_then(|l| l.timeout_ms),
            vars::lookup(self.vars.as_ref(), VAR_TIMEOUT_MS),
            request.limits.as_ref().and_then(|l| l.max_rows),
            vars::lookup(self.vars.as_ref(), VAR_MAX_ROWS),
        );

        let key = fingerprint(&accepted.sql, &bound, identity, target, pagination.as_ref());
        if let Some(hit) = self.cache.get(&key) {
            debug!("cache hit {}", &key[..12]);
            return Ok(PipelineOutput {
                payload: hit,
                cache_hit: true,
                limits,
                pagination,
                used_params: bound.len(),
            });
        }

        let values: Vec<TypedValue> = bound.iter().map(|p| p.value.clone()).collect();
        let payload = match (kind, &pagination) {
            (QueryKind::Tile, _) => {
                let sql = wrap_capped(&accepted.sql, 1);
                let result = self
                    .executor
                    .select(target, &sql, &values, &limits)
                    .await
                    .map_err(map_exec_error)?;
                CachedResult { result, total_rows: None }
            }
            (QueryKind::Grid, None) => {
                let sql = wrap_capped(&accepted.sql, limits.max_rows);
                let result = self
                    .executor
                    .select(target, &sql, &values, &limits)
                    .await
                    .map_err(map_exec_error)?;
                CachedResult { result, total_rows: None }
            }
            (QueryKind::Grid, Some(page)) => {
                let sql = wrap_paged(&accepted.sql, values.len());
                let mut page_values = values.clone();
                page_values.push(TypedValue::Int(page.page_size as i64));
                page_values.push(TypedValue::Int(page.offset() as i64));
                let result = self
                    .executor
                    .select(target, &sql, &page_values, &limits)
                    .await
                    .map_err(map_exec_error)?;
                let total = self
                    .executor
                    .count(target, &wrap_count(&accepted.sql), &values, &limits)
                    .await
                    .map_err(map_exec_error)?;
                CachedResult { result, total_rows: Some(total) }
            }
        };

        info!(
            "executed on '{}': {} rows in {} ms",
            target,
            payload.result.row_count(),
            payload.result.elapsed_ms
        );

        let ttl = match kind {
            QueryKind::Grid => self.grid_ttl,
            QueryKind::Tile => self.tile_ttl,
        };
        let payload = Arc::new(payload);
        self.cache.put(key, Arc::clone(&payload), ttl);

        Ok(PipelineOutput {
            payload,
            cache_hit: false,
            limits,
            pagination,
            used_params: bound.len(),
        })
    }
}

fn check_request_options(request: &QueryRequest) -> PipelineResult<()> {
    if let Some(dialect) = &request.dialect {
        if !dialect.trim().eq_ignore_ascii_case("postgresql") {
            return Err(PipelineError::config(format!(
                "unsupported dialect '{dialect}'; only postgresql is supported"
            )));
        }
    }
    if request.read_only == Some(false) {
        return Err(PipelineError::config(
            "read_only=false is not supported; this endpoint only executes reads",
        ));
    }
    Ok(())
}

fn map_exec_error(err: ExecError) -> PipelineError {
    match err {
        ExecError::UnknownTarget(name) => {
            PipelineError::config(format!("target database '{name}' is not configured"))
        }
        ExecError::Connect(detail) => {
            PipelineError::config(format!("could not reach target database: {detail}"))
        }
        ExecError::Db { message, sql_state, position } => {
            PipelineError::Execution { message, sql_state, position, timed_out: false }
        }
        ExecError::Timeout(ms) => PipelineError::Execution {
            message: format!("statement timed out after {ms} ms"),
            sql_state: Some("57014".to_string()),
            position: None,
            timed_out: true,
        },
    }
}

/// Outer row bound. The user's statement runs unmodified as a subquery, so
/// an embedded LIMIT still bounds output and is never widened.
fn wrap_capped(sql: &str, cap: u32) -> String {
    format!("SELECT * FROM ( {sql} ) AS sqlgate_q LIMIT {cap}")
}

/// Paged slice. Two extra positional parameters carry LIMIT and OFFSET.
fn wrap_paged(sql: &str, bound: usize) -> String {
    format!(
        "SELECT * FROM ( {sql} ) AS sqlgate_q LIMIT ${} OFFSET ${}",
        bound + 1,
        bound + 2
    )
}

fn wrap_count(sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ( {sql} ) AS sqlgate_count")
}
