//! Execution bounds: statement timeout, row cap, pagination window.
//!
//! Precedence for both knobs is operator global, then request, then built-in
//! default. The hard row ceiling applies to every source, including the
//! operator's. Limits are resolved once per request and never change
//! mid-flight.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_ROWS: u32 = 10_000;
pub const HARD_MAX_ROWS: u32 = 100_000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub timeout_ms: u64,
    pub max_rows: u32,
}

/// Resolve the per-request bounds. A zero timeout would disable the server
/// timeout entirely, so it is clamped to 1ms instead.
pub fn resolve(
    request_timeout_ms: Option<u64>,
    global_timeout_ms: Option<u64>,
    request_max_rows: Option<u32>,
    global_max_rows: Option<u32>,
) -> EffectiveLimits {
    let timeout_ms = global_timeout_ms
        .or(request_timeout_ms)
        .unwrap_or(DEFAULT_TIMEOUT_MS)
        .max(1);
    let max_rows = global_max_rows
        .or(request_max_rows)
        .unwrap_or(DEFAULT_MAX_ROWS)
        .clamp(1, HARD_MAX_ROWS);
    EffectiveLimits { timeout_ms, max_rows }
}

/// A validated pagination window. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }
}

/// Raw pagination fields as they arrive in a request body. Kept as JSON
/// values so that non-integer input is reported as a pagination error
/// instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: Value,
    #[serde(default, rename = "pageSize")]
    pub page_size: Value,
}

impl PageRequest {
    /// Check bounds before any database work. Absent fields take defaults;
    /// present fields must be integral and in range.
    pub fn validate(&self) -> Result<Pagination, String> {
        let page = match &self.page {
            Value::Null => 1,
            v => v
                .as_i64()
                .ok_or_else(|| format!("page must be an integer, got {v}"))?,
        };
        let page_size = match &self.page_size {
            Value::Null => DEFAULT_PAGE_SIZE as i64,
            v => v
                .as_i64()
                .ok_or_else(|| format!("pageSize must be an integer, got {v}"))?,
        };
        if page < 1 {
            return Err(format!("page must be at least 1, got {page}"));
        }
        if page > u32::MAX as i64 {
            return Err(format!("page {page} is out of range"));
        }
        if page_size < 1 {
            return Err(format!("pageSize must be at least 1, got {page_size}"));
        }
        if page_size > MAX_PAGE_SIZE as i64 {
            return Err(format!(
                "pageSize must be at most {MAX_PAGE_SIZE}, got {page_size}"
            ));
        }
        Ok(Pagination { page: page as u32, page_size: page_size as u32 })
    }
}
