use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use sqlgate::cache::ResultCache;
use sqlgate::error::PipelineError;
use sqlgate::exec::{ColumnMeta, ExecError, QueryExecutor, QueryResult};
use sqlgate::gate::IssueCode;
use sqlgate::limits::{EffectiveLimits, PageRequest, Pagination, DEFAULT_MAX_ROWS, DEFAULT_TIMEOUT_MS};
use sqlgate::params::TypedValue;
use sqlgate::pipeline::{LimitsRequest, Pipeline, QueryKind, QueryRequest};
use sqlgate::vars::{EnvVars, VarStore, VarStoreError};

/// Everything the fake saw, in call order.
#[derive(Default)]
struct Recorded {
    targets: Vec<String>,
    sql: Vec<String>,
    params: Vec<Vec<TypedValue>>,
    limits: Vec<EffectiveLimits>,
    count_sql: Vec<String>,
    count_params: Vec<Vec<TypedValue>>,
}

/// In-memory executor standing in for a database. Records every call so
/// tests can assert on the SQL and parameters that actually reach the
/// driver boundary.
struct FakeExecutor {
    selects: AtomicUsize,
    counts: AtomicUsize,
    result: QueryResult,
    total: i64,
    fail_timeout: Option<u64>,
    recorded: Mutex<Recorded>,
}

impl FakeExecutor {
    fn answering(result: QueryResult) -> Arc<Self> {
        Arc::new(FakeExecutor {
            selects: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            result,
            total: 42,
            fail_timeout: None,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    fn timing_out(ms: u64) -> Arc<Self> {
        Arc::new(FakeExecutor {
            selects: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            result: QueryResult::empty(),
            total: 0,
            fail_timeout: Some(ms),
            recorded: Mutex::new(Recorded::default()),
        })
    }

    fn select_calls(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    fn count_calls(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn select(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<QueryResult, ExecError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        {
            let mut recorded = self.recorded.lock();
            recorded.targets.push(target.to_string());
            recorded.sql.push(sql.to_string());
            recorded.params.push(params.to_vec());
            recorded.limits.push(*limits);
        }
        if let Some(ms) = self.fail_timeout {
            return Err(ExecError::Timeout(ms));
        }
        Ok(self.result.clone())
    }

    async fn count(
        &self,
        _target: &str,
        sql: &str,
        params: &[TypedValue],
        _limits: &EffectiveLimits,
    ) -> Result<i64, ExecError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        let mut recorded = self.recorded.lock();
        recorded.count_sql.push(sql.to_string());
        recorded.count_params.push(params.to_vec());
        Ok(self.total)
    }
}

/// Store whose every lookup fails, as when the backing service is down.
struct FailingVars;

impl VarStore for FailingVars {
    fn get(&self, _name: &str) -> Result<Option<String>, VarStoreError> {
        Err(VarStoreError("store offline".to_string()))
    }
}

fn sample_result() -> QueryResult {
    QueryResult {
        columns: vec![
            ColumnMeta { name: "id".to_string(), type_name: "int4".to_string() },
            ColumnMeta { name: "name".to_string(), type_name: "text".to_string() },
        ],
        rows: vec![vec![json!(1), json!("ada")], vec![json!(2), json!("grace")]],
        elapsed_ms: 3,
    }
}

fn no_vars() -> Arc<dyn VarStore> {
    Arc::new(EnvVars::from_pairs(Vec::new()))
}

fn vars_from(pairs: &[(&str, &str)]) -> Arc<dyn VarStore> {
    Arc::new(EnvVars::from_pairs(
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
    ))
}

fn pipeline_for(executor: &Arc<FakeExecutor>, vars: Arc<dyn VarStore>) -> Pipeline {
    Pipeline::new(
        Arc::clone(executor) as Arc<dyn QueryExecutor>,
        ResultCache::new(true, 128),
        vars,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

fn request(statement: &str) -> QueryRequest {
    QueryRequest { statement: statement.to_string(), ..Default::default() }
}

#[tokio::test]
async fn identical_requests_replay_from_cache() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let req = request("SELECT id, name FROM users");

    let first = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("first run");
    let second = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("second run");

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.payload.result, second.payload.result);
    assert_eq!(exec.select_calls(), 1, "cache hit must not re-execute");
}

#[tokio::test]
async fn disabled_cache_executes_every_time() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = Pipeline::new(
        Arc::clone(&exec) as Arc<dyn QueryExecutor>,
        ResultCache::disabled(),
        no_vars(),
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let req = request("SELECT id FROM users");

    let first = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("first run");
    let second = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("second run");

    assert!(!first.cache_hit);
    assert!(!second.cache_hit);
    assert_eq!(exec.select_calls(), 2);
}

#[tokio::test]
async fn rejected_statements_never_reach_the_executor() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());

    let err = pipeline
        .run(&request("DROP TABLE users"), QueryKind::Grid, "alice")
        .await
        .expect_err("writes must be refused");
    match err {
        PipelineError::Rejected(issues) => {
            assert!(issues.iter().any(|i| i.code == IssueCode::NotSelect), "issues: {issues:?}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(exec.select_calls(), 0);
}

#[tokio::test]
async fn invalid_pagination_fails_before_execution() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT * FROM events");
    req.pagination = Some(PageRequest { page: json!(1), page_size: json!(50_000) });

    let err = pipeline
        .run(&req, QueryKind::Grid, "alice")
        .await
        .expect_err("oversized page must be refused");
    assert!(matches!(err, PipelineError::InvalidPagination(_)), "got {err:?}");
    assert_eq!(exec.select_calls(), 0);
}

#[tokio::test]
async fn missing_parameters_fail_before_execution() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());

    let err = pipeline
        .run(&request("SELECT * FROM orders WHERE region = :region"), QueryKind::Grid, "alice")
        .await
        .expect_err("unbound placeholder must be refused");
    match err {
        PipelineError::MissingParam { name } => assert_eq!(name, "region"),
        other => panic!("expected missing param, got {other:?}"),
    }
    assert_eq!(exec.select_calls(), 0);
}

#[tokio::test]
async fn unsupported_dialects_fail_before_execution() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT 1");
    req.dialect = Some("mysql".to_string());

    let err = pipeline
        .run(&req, QueryKind::Grid, "alice")
        .await
        .expect_err("foreign dialect must be refused");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
    assert_eq!(exec.select_calls(), 0);
}

#[tokio::test]
async fn global_limits_clamp_request_limits() {
    let exec = FakeExecutor::answering(sample_result());
    let vars = vars_from(&[("SQLGATE_VAR_QUERY_TIMEOUT_MS", "5000")]);
    let pipeline = pipeline_for(&exec, vars);
    let mut req = request("SELECT id FROM users");
    req.limits = Some(LimitsRequest { timeout_ms: Some(30_000), max_rows: Some(500) });

    pipeline.run(&req, QueryKind::Grid, "alice").await.expect("runs");

    let recorded = exec.recorded.lock();
    // Global 5000 wins over the requested 30000; the row cap has no global
    // here so the request value holds.
    assert_eq!(recorded.limits[0], EffectiveLimits { timeout_ms: 5_000, max_rows: 500 });
    assert!(recorded.sql[0].ends_with("LIMIT 500"), "sql: {}", recorded.sql[0]);
}

#[tokio::test]
async fn var_store_failure_degrades_to_defaults() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, Arc::new(FailingVars));

    pipeline
        .run(&request("SELECT id FROM users"), QueryKind::Grid, "alice")
        .await
        .expect("store failure must not fail the request");

    let recorded = exec.recorded.lock();
    assert_eq!(
        recorded.limits[0],
        EffectiveLimits { timeout_ms: DEFAULT_TIMEOUT_MS, max_rows: DEFAULT_MAX_ROWS }
    );
}

#[tokio::test]
async fn named_placeholders_are_rewritten_and_bound() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT * FROM orders WHERE region = :region AND total > :floor");
    req.params.insert("region".to_string(), json!("emea"));
    req.params.insert("floor".to_string(), json!("100"));

    let out = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("runs");

    assert_eq!(out.used_params, 2);
    let recorded = exec.recorded.lock();
    assert!(recorded.sql[0].contains("region = $1 AND total > $2"), "sql: {}", recorded.sql[0]);
    assert_eq!(
        recorded.params[0],
        vec![TypedValue::Text("emea".to_string()), TypedValue::Text("100".to_string())]
    );
}

#[tokio::test]
async fn globals_feed_unbound_placeholders() {
    let exec = FakeExecutor::answering(sample_result());
    let vars = vars_from(&[("SQLGATE_VAR_REGION", "emea")]);
    let pipeline = pipeline_for(&exec, vars);

    let out = pipeline
        .run(&request("SELECT * FROM sales WHERE region = :region"), QueryKind::Grid, "alice")
        .await
        .expect("global fills the placeholder");

    assert_eq!(out.used_params, 1);
    let recorded = exec.recorded.lock();
    assert_eq!(recorded.params[0], vec![TypedValue::Text("emea".to_string())]);
}

#[tokio::test]
async fn request_params_override_globals() {
    let exec = FakeExecutor::answering(sample_result());
    let vars = vars_from(&[("SQLGATE_VAR_REGION", "emea")]);
    let pipeline = pipeline_for(&exec, vars);
    let mut req = request("SELECT * FROM sales WHERE region = :region");
    req.params.insert("region".to_string(), json!("apac"));

    pipeline.run(&req, QueryKind::Grid, "alice").await.expect("runs");

    let recorded = exec.recorded.lock();
    assert_eq!(recorded.params[0], vec![TypedValue::Text("apac".to_string())]);
}

#[tokio::test]
async fn paged_grids_slice_and_count() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT * FROM events WHERE kind = :kind");
    req.params.insert("kind".to_string(), json!("login"));
    req.pagination = Some(PageRequest { page: json!(3), page_size: json!(25) });

    let out = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("runs");

    assert_eq!(out.pagination, Some(Pagination { page: 3, page_size: 25 }));
    assert_eq!(out.payload.total_rows, Some(42));
    assert_eq!(exec.count_calls(), 1);

    let recorded = exec.recorded.lock();
    assert_eq!(
        recorded.sql[0],
        "SELECT * FROM ( SELECT * FROM events WHERE kind = $1 ) AS sqlgate_q \
         LIMIT $2 OFFSET $3"
    );
    // Page 3 of 25 starts at row 50.
    assert_eq!(
        recorded.params[0],
        vec![
            TypedValue::Text("login".to_string()),
            TypedValue::Int(25),
            TypedValue::Int(50),
        ]
    );
    assert_eq!(
        recorded.count_sql[0],
        "SELECT COUNT(*) FROM ( SELECT * FROM events WHERE kind = $1 ) AS sqlgate_count"
    );
    assert_eq!(recorded.count_params[0], vec![TypedValue::Text("login".to_string())]);
}

#[tokio::test]
async fn unpaged_grids_are_capped_at_max_rows() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());

    pipeline
        .run(&request("SELECT id FROM users"), QueryKind::Grid, "alice")
        .await
        .expect("runs");

    let recorded = exec.recorded.lock();
    assert_eq!(
        recorded.sql[0],
        format!("SELECT * FROM ( SELECT id FROM users ) AS sqlgate_q LIMIT {DEFAULT_MAX_ROWS}")
    );
    assert_eq!(exec.count_calls(), 0);
}

#[tokio::test]
async fn tiles_run_bounded_to_one_row_and_ignore_pagination() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT count(*) FROM users");
    req.pagination = Some(PageRequest { page: json!(5), page_size: json!(10) });

    let out = pipeline.run(&req, QueryKind::Tile, "alice").await.expect("runs");

    assert!(out.pagination.is_none());
    assert!(out.payload.total_rows.is_none());
    assert_eq!(exec.count_calls(), 0);
    let recorded = exec.recorded.lock();
    assert_eq!(
        recorded.sql[0],
        "SELECT * FROM ( SELECT count(*) FROM users ) AS sqlgate_q LIMIT 1"
    );
}

#[tokio::test]
async fn trailing_terminators_are_stripped_before_wrapping() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());

    pipeline
        .run(&request("SELECT count(*) FROM users;;"), QueryKind::Tile, "alice")
        .await
        .expect("runs");

    // A terminator surviving into the wrapped text would be a server-side
    // syntax error.
    let recorded = exec.recorded.lock();
    assert_eq!(
        recorded.sql[0],
        "SELECT * FROM ( SELECT count(*) FROM users ) AS sqlgate_q LIMIT 1"
    );
}

#[tokio::test]
async fn identities_do_not_share_cache_entries() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let req = request("SELECT id FROM users");

    let alice = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("alice");
    let bob = pipeline.run(&req, QueryKind::Grid, "bob").await.expect("bob");
    let alice_again = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("alice again");

    assert!(!alice.cache_hit);
    assert!(!bob.cache_hit, "another identity must not see alice's entry");
    assert!(alice_again.cache_hit);
    assert_eq!(exec.select_calls(), 2);
}

#[tokio::test]
async fn different_pages_are_distinct_cache_entries() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let mut req = request("SELECT id FROM users");

    req.pagination = Some(PageRequest { page: json!(1), page_size: json!(10) });
    let first = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("page 1");
    req.pagination = Some(PageRequest { page: json!(2), page_size: json!(10) });
    let second = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("page 2");

    assert!(!first.cache_hit);
    assert!(!second.cache_hit);
    assert_eq!(exec.select_calls(), 2);
}

#[tokio::test]
async fn flush_clears_cached_results() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());
    let req = request("SELECT id FROM users");

    pipeline.run(&req, QueryKind::Grid, "alice").await.expect("first run");
    pipeline.flush_cache();
    let after = pipeline.run(&req, QueryKind::Grid, "alice").await.expect("after flush");

    assert!(!after.cache_hit);
    assert_eq!(exec.select_calls(), 2);
}

#[tokio::test]
async fn timeouts_surface_as_timed_out_execution_errors() {
    let exec = FakeExecutor::timing_out(5_000);
    let pipeline = pipeline_for(&exec, no_vars());
    let req = request("SELECT * FROM slow_view");

    let err = pipeline
        .run(&req, QueryKind::Grid, "alice")
        .await
        .expect_err("timeout must surface");
    match err {
        PipelineError::Execution { sql_state, timed_out, message, .. } => {
            assert_eq!(sql_state.as_deref(), Some("57014"));
            assert!(timed_out);
            assert!(message.contains("5000"), "message: {message}");
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    // Failures are never cached; a retry reaches the executor again.
    let _ = pipeline.run(&req, QueryKind::Grid, "alice").await.expect_err("still failing");
    assert_eq!(exec.select_calls(), 2);
}

#[tokio::test]
async fn unnamed_database_routes_to_the_default_target() {
    let exec = FakeExecutor::answering(sample_result());
    let pipeline = pipeline_for(&exec, no_vars());

    pipeline
        .run(&request("SELECT 1"), QueryKind::Grid, "alice")
        .await
        .expect("runs");
    let mut req = request("SELECT 1");
    req.database = Some("reporting".to_string());
    pipeline.run(&req, QueryKind::Grid, "alice").await.expect("runs");

    let recorded = exec.recorded.lock();
    assert_eq!(recorded.targets, vec!["default".to_string(), "reporting".to_string()]);
}
