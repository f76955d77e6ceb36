//! PostgreSQL execution: connection pool, typed parameter encoding, row
//! decoding, and the `QueryExecutor` seam the pipeline runs against.
//!
//! Timeouts are enforced twice. `SET statement_timeout` makes the server
//! cancel the statement itself; a client-side deadline with a small grace
//! window backstops an unresponsive server, issuing an out-of-band cancel
//! and discarding the connection.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::error::{ErrorPosition, SqlState};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::warn;
use uuid::Uuid;

use crate::limits::EffectiveLimits;
use crate::params::TypedValue;

/// Extra client-side wait beyond the server timeout before the connection is
/// declared unresponsive and cancelled out-of-band.
const TIMEOUT_GRACE_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One finished result set, decoded to JSON values. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
    pub elapsed_ms: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        QueryResult { columns: Vec::new(), rows: Vec::new(), elapsed_ms: 0 }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("target database '{0}' is not configured")]
    UnknownTarget(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{message}")]
    Db {
        message: String,
        sql_state: Option<String>,
        position: Option<u32>,
    },
    #[error("statement timed out after {0} ms")]
    Timeout(u64),
}

/// Execution seam between the pipeline and PostgreSQL. `select` returns the
/// decoded result set; `count` expects a single scalar bigint row.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn select(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<QueryResult, ExecError>;

    async fn count(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<i64, ExecError>;
}

struct PoolInner {
    url: String,
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
}

/// Minimal connection pool: a semaphore caps concurrent checkouts, finished
/// connections return to an idle stack, closed or poisoned ones are dropped.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

impl PgPool {
    pub fn new(url: &str, size: usize) -> Self {
        PgPool {
            inner: Arc::new(PoolInner {
                url: url.to_string(),
                idle: Mutex::new(Vec::with_capacity(size)),
                permits: Arc::new(Semaphore::new(size.max(1))),
            }),
        }
    }

    pub async fn checkout(&self) -> Result<PooledClient, ExecError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecError::Connect("connection pool is shut down".to_string()))?;

        loop {
            let candidate = self.inner.idle.lock().pop();
            match candidate {
                Some(client) => {
                    if client.is_closed() {
                        continue;
                    }
                    return Ok(PooledClient {
                        client: Some(client),
                        inner: Arc::clone(&self.inner),
                        broken: false,
                        _permit: permit,
                    });
                }
                None => break,
            }
        }

        let client = connect(&self.inner.url).await?;
        Ok(PooledClient {
            client: Some(client),
            inner: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        })
    }
}

async fn connect(url: &str) -> Result<Client, ExecError> {
    let cfg: tokio_postgres::Config = url
        .parse()
        .map_err(|err| ExecError::Connect(format!("invalid connection string: {err}")))?;
    let (client, connection) = cfg
        .connect(NoTls)
        .await
        .map_err(|err| ExecError::Connect(err.to_string()))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!("postgres connection error: {}", err);
        }
    });
    Ok(client)
}

/// A checked-out connection. Returns to the pool on drop unless marked
/// broken or already closed.
pub struct PooledClient {
    client: Option<Client>,
    inner: Arc<PoolInner>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("connection already returned")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !self.broken && !client.is_closed() {
                self.inner.idle.lock().push(client);
            }
        }
    }
}

/// Pool-per-target executor backed by tokio-postgres.
pub struct PgExecutor {
    pools: HashMap<String, PgPool>,
}

impl PgExecutor {
    pub fn new(targets: &HashMap<String, String>, pool_size: usize) -> Self {
        let pools = targets
            .iter()
            .map(|(name, url)| (name.clone(), PgPool::new(url, pool_size)))
            .collect();
        PgExecutor { pools }
    }

    fn pool(&self, target: &str) -> Result<&PgPool, ExecError> {
        self.pools
            .get(target)
            .ok_or_else(|| ExecError::UnknownTarget(target.to_string()))
    }

    async fn run(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<(tokio_postgres::Statement, Vec<Row>, u64), ExecError> {
        let pool = self.pool(target)?;
        let mut conn = pool.checkout().await?;

        if let Err(err) = conn
            .batch_execute(&format!("SET statement_timeout = {}", limits.timeout_ms))
            .await
        {
            conn.mark_broken();
            return Err(ExecError::Connect(format!(
                "failed to set statement timeout: {err}"
            )));
        }

        let started = Instant::now();
        let statement = match conn.prepare(sql).await {
            Ok(statement) => statement,
            Err(err) => return Err(map_db_error(err, limits.timeout_ms)),
        };

        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let cancel = conn.cancel_token();
        let deadline = Duration::from_millis(limits.timeout_ms.saturating_add(TIMEOUT_GRACE_MS));

        match tokio::time::timeout(deadline, conn.query(&statement, &refs)).await {
            Err(_) => {
                // Server missed its own timeout. The connection has an
                // abandoned query in flight, so it cannot be reused.
                conn.mark_broken();
                let _ = cancel.cancel_query(NoTls).await;
                Err(ExecError::Timeout(limits.timeout_ms))
            }
            Ok(Err(err)) => Err(map_db_error(err, limits.timeout_ms)),
            Ok(Ok(rows)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                Ok((statement, rows, elapsed_ms))
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn select(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<QueryResult, ExecError> {
        let (statement, rows, elapsed_ms) = self.run(target, sql, params, limits).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|column| ColumnMeta {
                name: column.name().to_string(),
                type_name: column.type_().name().to_string(),
            })
            .collect();
        let data = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| row_value(row, idx)).collect())
            .collect();
        Ok(QueryResult { columns, rows: data, elapsed_ms })
    }

    async fn count(
        &self,
        target: &str,
        sql: &str,
        params: &[TypedValue],
        limits: &EffectiveLimits,
    ) -> Result<i64, ExecError> {
        let (_, rows, _) = self.run(target, sql, params, limits).await?;
        let first = rows.first().ok_or_else(|| ExecError::Db {
            message: "count query returned no rows".to_string(),
            sql_state: None,
            position: None,
        })?;
        first.try_get::<_, i64>(0).map_err(|err| ExecError::Db {
            message: format!("count decode failed: {err}"),
            sql_state: None,
            position: None,
        })
    }
}

fn map_db_error(err: tokio_postgres::Error, timeout_ms: u64) -> ExecError {
    if let Some(db) = err.as_db_error() {
        if db.code() == &SqlState::QUERY_CANCELED {
            return ExecError::Timeout(timeout_ms);
        }
        let position = match db.position() {
            Some(ErrorPosition::Original(p)) => Some(*p),
            Some(ErrorPosition::Internal { position, .. }) => Some(*position),
            None => None,
        };
        ExecError::Db {
            message: db.message().to_string(),
            sql_state: Some(db.code().code().to_string()),
            position,
        }
    } else {
        ExecError::Db { message: err.to_string(), sql_state: None, position: None }
    }
}

/// Decode one cell to JSON by column type name. Unknown or undecodable
/// values become null rather than failing the whole result.
fn row_value(row: &Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();
    match ty.name() {
        "bool" => match row.try_get::<_, Option<bool>>(idx) {
            Ok(Some(v)) => Value::Bool(v),
            _ => Value::Null,
        },
        "int2" => match row.try_get::<_, Option<i16>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "int4" => match row.try_get::<_, Option<i32>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "int8" => match row.try_get::<_, Option<i64>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "float4" => match row.try_get::<_, Option<f32>>(idx) {
            Ok(Some(v)) => Value::from(v as f64),
            _ => Value::Null,
        },
        "float8" => match row.try_get::<_, Option<f64>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        // NUMERIC is kept as its exact decimal text; aggregates must not
        // round through f64.
        "numeric" => match row.try_get::<_, Option<PgNumeric>>(idx) {
            Ok(Some(v)) => Value::String(v.0),
            _ => Value::Null,
        },
        "text" | "varchar" | "bpchar" | "name" | "citext" => {
            match row.try_get::<_, Option<String>>(idx) {
                Ok(Some(v)) => Value::String(v),
                _ => Value::Null,
            }
        }
        "uuid" => match row.try_get::<_, Option<Uuid>>(idx) {
            Ok(Some(v)) => Value::String(v.to_string()),
            _ => Value::Null,
        },
        "json" | "jsonb" => match row.try_get::<_, Option<Value>>(idx) {
            Ok(Some(v)) => v,
            _ => Value::Null,
        },
        "timestamptz" => match row.try_get::<_, Option<DateTime<Utc>>>(idx) {
            Ok(Some(v)) => Value::String(v.to_rfc3339()),
            _ => Value::Null,
        },
        "timestamp" => match row.try_get::<_, Option<NaiveDateTime>>(idx) {
            Ok(Some(v)) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            _ => Value::Null,
        },
        "date" => match row.try_get::<_, Option<NaiveDate>>(idx) {
            Ok(Some(v)) => Value::String(v.to_string()),
            _ => Value::Null,
        },
        "time" => match row.try_get::<_, Option<NaiveTime>>(idx) {
            Ok(Some(v)) => Value::String(v.to_string()),
            _ => Value::Null,
        },
        "bytea" => match row.try_get::<_, Option<Vec<u8>>>(idx) {
            Ok(Some(v)) => Value::String(format!("\\x{}", hex::encode(v))),
            _ => Value::Null,
        },
        "_text" | "_varchar" => match row.try_get::<_, Option<Vec<String>>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "_int4" => match row.try_get::<_, Option<Vec<i32>>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "_int8" => match row.try_get::<_, Option<Vec<i64>>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "_float8" => match row.try_get::<_, Option<Vec<f64>>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "_bool" => match row.try_get::<_, Option<Vec<bool>>>(idx) {
            Ok(Some(v)) => Value::from(v),
            _ => Value::Null,
        },
        "_uuid" => match row.try_get::<_, Option<Vec<Uuid>>>(idx) {
            Ok(Some(v)) => {
                Value::from(v.into_iter().map(|u| u.to_string()).collect::<Vec<_>>())
            }
            _ => Value::Null,
        },
        _ => match ty.kind() {
            Kind::Enum(_) => match row.try_get::<_, Option<EnumText>>(idx) {
                Ok(Some(v)) => Value::String(v.0),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
    }
}

/// NUMERIC column decoded to its exact decimal text.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        decode_numeric(raw)
            .map(PgNumeric)
            .ok_or_else(|| "malformed numeric value".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Enum label read as raw text, whatever the enum type is.
struct EnumText(String);

impl<'a> FromSql<'a> for EnumText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(EnumText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// Decode PostgreSQL NUMERIC wire format (i16 ndigits, weight, sign, dscale,
/// then base-10000 digit groups) into canonical decimal text.
fn decode_numeric(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = i16::from_be_bytes([bytes[6], bytes[7]]) as i32;

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        0x0000 | 0x4000 => {}
        _ => return None,
    }
    if ndigits < 0 || dscale < 0 {
        return None;
    }
    if bytes.len() < 8 + (ndigits as usize) * 2 {
        return None;
    }

    let mut groups = Vec::with_capacity(ndigits as usize);
    let mut offset = 8;
    for _ in 0..ndigits {
        groups.push(i16::from_be_bytes([bytes[offset], bytes[offset + 1]]) as i32);
        offset += 2;
    }

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight >= 0 {
        for idx in 0..=(weight as usize) {
            let group = groups.get(idx).copied().unwrap_or(0);
            if idx == 0 {
                out.push_str(&group.to_string());
            } else {
                out.push_str(&format!("{group:04}"));
            }
        }
    } else {
        out.push('0');
    }

    if dscale > 0 {
        let mut frac = String::new();
        let first_frac = weight + 1;
        if first_frac < 0 {
            frac.push_str(&"0".repeat((-first_frac) as usize * 4));
        }
        for idx in first_frac.max(0)..(groups.len() as i32) {
            frac.push_str(&format!("{:04}", groups[idx as usize]));
        }
        if (frac.len() as i32) < dscale {
            frac.push_str(&"0".repeat((dscale - frac.len() as i32) as usize));
        }
        frac.truncate(dscale as usize);
        out.push('.');
        out.push_str(&frac);
    }

    Some(out)
}

/// Encode decimal text into NUMERIC wire format. Digit groups are aligned to
/// the decimal point, as the server requires.
fn encode_numeric(text: &str) -> Option<Vec<u8>> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        return Some(numeric_header(0, 0, 0xC000, 0, &[]));
    }

    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (0x4000u16, rest),
        None => (0u16, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let mut parts = unsigned.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let dscale = i16::try_from(frac_part.len()).ok()?;
    let int_digits = int_part.trim_start_matches('0');
    let frac_digits = frac_part.trim_end_matches('0');

    if int_digits.is_empty() && frac_digits.is_empty() {
        return Some(numeric_header(0, 0, 0, dscale, &[]));
    }

    // Align groups of four decimal digits to the decimal point.
    let int_pad = (4 - int_digits.len() % 4) % 4;
    let frac_pad = (4 - frac_digits.len() % 4) % 4;
    let mut aligned = String::with_capacity(int_pad + int_digits.len() + frac_digits.len() + frac_pad);
    aligned.push_str(&"0".repeat(int_pad));
    aligned.push_str(int_digits);
    aligned.push_str(frac_digits);
    aligned.push_str(&"0".repeat(frac_pad));

    let mut groups: Vec<i16> = Vec::with_capacity(aligned.len() / 4);
    for chunk in aligned.as_bytes().chunks(4) {
        let value = chunk.iter().fold(0i32, |acc, b| acc * 10 + (b - b'0') as i32);
        groups.push(value as i16);
    }

    let mut weight = if int_digits.is_empty() {
        -1
    } else {
        (int_digits.len() as i32 + 3) / 4 - 1
    };
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        return Some(numeric_header(0, 0, 0, dscale, &[]));
    }

    Some(numeric_header(
        i16::try_from(groups.len()).ok()?,
        i16::try_from(weight).ok()?,
        sign,
        dscale,
        &groups,
    ))
}

fn numeric_header(ndigits: i16, weight: i16, sign: u16, dscale: i16, groups: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + groups.len() * 2);
    out.extend_from_slice(&ndigits.to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    for group in groups {
        out.extend_from_slice(&group.to_be_bytes());
    }
    out
}

fn encode_mismatch(kind: &str, ty: &Type) -> Box<dyn std::error::Error + Sync + Send> {
    format!("cannot bind a {kind} parameter as postgres type {ty}").into()
}

/// Encode a bound value for whatever parameter type the server inferred
/// during prepare. Widths and representations are adapted here so callers
/// never have to guess column types.
impl ToSql for TypedValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            TypedValue::Null => Ok(IsNull::Yes),
            TypedValue::Bool(b) => match ty.name() {
                "bool" => b.to_sql(ty, out),
                "text" | "varchar" => b.to_string().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("bool", ty)),
            },
            TypedValue::Int(i) => match ty.name() {
                "int2" => i16::try_from(*i)?.to_sql(ty, out),
                "int4" => i32::try_from(*i)?.to_sql(ty, out),
                "int8" => i.to_sql(ty, out),
                "oid" => u32::try_from(*i)?.to_sql(ty, out),
                "float4" => (*i as f32).to_sql(ty, out),
                "float8" => (*i as f64).to_sql(ty, out),
                "numeric" => {
                    let encoded = encode_numeric(&i.to_string())
                        .ok_or_else(|| encode_mismatch("int", ty))?;
                    out.extend_from_slice(&encoded);
                    Ok(IsNull::No)
                }
                "text" | "varchar" => i.to_string().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("int", ty)),
            },
            TypedValue::Numeric(s) => match ty.name() {
                "numeric" => {
                    let encoded =
                        encode_numeric(s).ok_or_else(|| encode_mismatch("numeric", ty))?;
                    out.extend_from_slice(&encoded);
                    Ok(IsNull::No)
                }
                "float4" => s.parse::<f32>()?.to_sql(ty, out),
                "float8" => s.parse::<f64>()?.to_sql(ty, out),
                "int2" => s.parse::<i16>()?.to_sql(ty, out),
                "int4" => s.parse::<i32>()?.to_sql(ty, out),
                "int8" => s.parse::<i64>()?.to_sql(ty, out),
                "text" | "varchar" => s.clone().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("numeric", ty)),
            },
            TypedValue::Text(s) => match ty.name() {
                "text" | "varchar" | "bpchar" | "name" | "citext" => {
                    s.clone().to_sql(&Type::TEXT, out)
                }
                "uuid" => Uuid::parse_str(s.trim())?.to_sql(ty, out),
                "json" | "jsonb" => serde_json::from_str::<Value>(s)?.to_sql(ty, out),
                _ => {
                    // Enum parameters travel as their label bytes.
                    if matches!(ty.kind(), Kind::Enum(_)) {
                        out.extend_from_slice(s.as_bytes());
                        Ok(IsNull::No)
                    } else {
                        Err(encode_mismatch("text", ty))
                    }
                }
            },
            TypedValue::Uuid(u) => match ty.name() {
                "uuid" => u.to_sql(ty, out),
                "text" | "varchar" => u.to_string().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("uuid", ty)),
            },
            TypedValue::Timestamp(dt) => match ty.name() {
                "timestamptz" => dt.to_sql(ty, out),
                "timestamp" => dt.naive_utc().to_sql(ty, out),
                "date" => dt.date_naive().to_sql(ty, out),
                "text" | "varchar" => dt.to_rfc3339().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("timestamp", ty)),
            },
            TypedValue::Json(v) => match ty.name() {
                "json" | "jsonb" => v.to_sql(ty, out),
                "text" | "varchar" => v.to_string().to_sql(&Type::TEXT, out),
                _ => Err(encode_mismatch("json", ty)),
            },
            TypedValue::TextArray(items) => match ty.name() {
                "_text" | "_varchar" => items.to_sql(ty, out),
                _ => Err(encode_mismatch("text-array", ty)),
            },
            TypedValue::UuidArray(items) => match ty.name() {
                "_uuid" => items.to_sql(ty, out),
                "_text" | "_varchar" => items
                    .iter()
                    .map(|u| u.to_string())
                    .collect::<Vec<_>>()
                    .to_sql(ty, out),
                _ => Err(encode_mismatch("uuid-array", ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
