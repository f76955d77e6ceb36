//! Named-parameter model: `:name` placeholder scanning and typed binding.
//!
//! Dashboard SQL references parameters as `:name`. The scanner rewrites each
//! reference to a positional `$n` placeholder (repeated names share one
//! position) while leaving string literals, quoted identifiers, comments,
//! dollar-quoted bodies, and `::type` casts untouched. Binding then resolves
//! one typed value per referenced name from request values, global variables,
//! and spec defaults, in that order. Values never enter the SQL text.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::gate::{dollar_delimiter, ScanState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    Uuid,
    Int,
    Numeric,
    Text,
    Timestamp,
    Bool,
    Json,
    TextArray,
    UuidArray,
}

/// Declared shape of one statement parameter, normally taken from the stored
/// panel definition that shipped the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "expectedType")]
    pub expected: ParamType,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A parameter value after coercion. `Numeric` keeps the decimal text so the
/// driver can encode it exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Uuid(Uuid),
    Int(i64),
    Numeric(String),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Json(Value),
    TextArray(Vec<String>),
    UuidArray(Vec<Uuid>),
    Null,
}

impl TypedValue {
    /// Unambiguous token for cache fingerprints: type-tagged, with
    /// string-ish payloads escaped so crafted values cannot collide.
    pub fn canonical(&self) -> String {
        match self {
            TypedValue::Uuid(u) => format!("uuid:{u}"),
            TypedValue::Int(i) => format!("int:{i}"),
            TypedValue::Numeric(s) => format!("numeric:{s}"),
            TypedValue::Text(s) => format!("text:{s:?}"),
            TypedValue::Timestamp(ts) => format!("timestamp:{}", ts.to_rfc3339()),
            TypedValue::Bool(b) => format!("bool:{b}"),
            TypedValue::Json(v) => format!("json:{v}"),
            TypedValue::TextArray(v) => format!("text-array:{v:?}"),
            TypedValue::UuidArray(v) => format!("uuid-array:{v:?}"),
            TypedValue::Null => "null".to_string(),
        }
    }
}

/// One bound parameter, in placeholder order: `bound[i]` feeds `$i+1`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: TypedValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("no value supplied for parameter :{0}")]
    Missing(String),
    #[error("parameter :{name}: {message}")]
    Invalid { name: String, message: String },
}

fn invalid<S: Into<String>>(name: &str, message: S) -> BindError {
    BindError::Invalid { name: name.to_string(), message: message.into() }
}

/// Result of one placeholder scan. `names[i]` is the parameter that feeds
/// positional placeholder `$i+1` in `rewritten`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderScan {
    pub rewritten: String,
    pub names: Vec<String>,
}

/// Rewrite `:name` references to positional `$n` placeholders and report the
/// referenced names in position order.
pub fn scan_placeholders(sql: &str) -> PlaceholderScan {
    let chars: Vec<char> = sql.chars().collect();
    let mut rewritten = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut state = ScanState::Normal;
    let mut dollar_tag: Vec<char> = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '-' && next == Some('-') {
                    rewritten.push_str("--");
                    state = ScanState::LineComment;
                    index += 2;
                    continue;
                }
                if current == '/' && next == Some('*') {
                    rewritten.push_str("/*");
                    state = ScanState::BlockComment;
                    index += 2;
                    continue;
                }
                if current == '$' {
                    if let Some(len) = dollar_delimiter(&chars, index) {
                        dollar_tag = chars[index..index + len].to_vec();
                        for ch in &dollar_tag {
                            rewritten.push(*ch);
                        }
                        state = ScanState::DollarQuote;
                        index += len;
                        continue;
                    }
                }
                if current == ':' {
                    // `::` is a cast, never a placeholder.
                    if next == Some(':') {
                        rewritten.push_str("::");
                        index += 2;
                        continue;
                    }
                    if next.map(is_name_start).unwrap_or(false) {
                        let mut end = index + 1;
                        while chars.get(end).map(|c| is_name_char(*c)).unwrap_or(false) {
                            end += 1;
                        }
                        let name: String = chars[index + 1..end].iter().collect();
                        let position = names
                            .iter()
                            .position(|n| n == &name)
                            .unwrap_or_else(|| {
                                names.push(name);
                                names.len() - 1
                            });
                        rewritten.push('$');
                        rewritten.push_str(&(position + 1).to_string());
                        index = end;
                        continue;
                    }
                }
                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                }
                rewritten.push(current);
                index += 1;
            }

            ScanState::LineComment => {
                if current == '\n' {
                    state = ScanState::Normal;
                }
                rewritten.push(current);
                index += 1;
            }

            ScanState::BlockComment => {
                if current == '*' && next == Some('/') {
                    rewritten.push_str("*/");
                    state = ScanState::Normal;
                    index += 2;
                } else {
                    rewritten.push(current);
                    index += 1;
                }
            }

            ScanState::SingleQuote => {
                rewritten.push(current);
                if current == '\'' {
                    if next == Some('\'') {
                        rewritten.push('\'');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }
                index += 1;
            }

            ScanState::DoubleQuote => {
                rewritten.push(current);
                if current == '"' {
                    if next == Some('"') {
                        rewritten.push('"');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }
                index += 1;
            }

            ScanState::DollarQuote => {
                if current == '$' && chars[index..].starts_with(&dollar_tag) {
                    for ch in &dollar_tag {
                        rewritten.push(*ch);
                    }
                    index += dollar_tag.len();
                    state = ScanState::Normal;
                    continue;
                }
                rewritten.push(current);
                index += 1;
            }
        }
    }

    PlaceholderScan { rewritten, names }
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Resolve one typed value per referenced parameter. Precedence per name:
/// request value, then global variable, then spec default; none → error.
/// Request entries for names the statement never references are ignored.
pub fn bind(
    specs: &HashMap<String, ParamSpec>,
    referenced: &[String],
    request: &HashMap<String, Value>,
    globals: &HashMap<String, String>,
) -> Result<Vec<BoundParam>, BindError> {
    let mut bound = Vec::with_capacity(referenced.len());
    for name in referenced {
        let expected = specs.get(name).map(|s| s.expected).unwrap_or(ParamType::Text);
        let value = if let Some(value) = request.get(name) {
            coerce_json(name, expected, value)?
        } else if let Some(raw) = globals.get(name) {
            coerce_str(name, expected, raw)?
        } else if let Some(default) = specs.get(name).and_then(|s| s.default.as_ref()) {
            coerce_json(name, expected, default)?
        } else {
            return Err(BindError::Missing(name.clone()));
        };
        bound.push(BoundParam { name: name.clone(), value });
    }
    Ok(bound)
}

/// Coerce a JSON request value to the declared type.
pub fn coerce_json(name: &str, expected: ParamType, value: &Value) -> Result<TypedValue, BindError> {
    if value.is_null() {
        return Ok(TypedValue::Null);
    }
    match expected {
        ParamType::Uuid => match value.as_str() {
            Some(s) => Uuid::parse_str(s.trim())
                .map(TypedValue::Uuid)
                .map_err(|_| invalid(name, format!("{s:?} is not a valid UUID"))),
            None => Err(invalid(name, "expected a UUID string")),
        },
        ParamType::Int => {
            if let Some(i) = value.as_i64() {
                Ok(TypedValue::Int(i))
            } else if let Some(s) = value.as_str() {
                s.trim()
                    .parse::<i64>()
                    .map(TypedValue::Int)
                    .map_err(|_| invalid(name, format!("{s:?} is not an integer")))
            } else {
                Err(invalid(name, "expected an integer"))
            }
        }
        ParamType::Numeric => match value {
            Value::Number(n) => {
                let text = n.to_string();
                if is_plain_decimal(&text) {
                    Ok(TypedValue::Numeric(text))
                } else {
                    Err(invalid(name, format!("{text:?} is not a plain decimal")))
                }
            }
            Value::String(s) => {
                let trimmed = s.trim();
                if is_plain_decimal(trimmed) {
                    Ok(TypedValue::Numeric(trimmed.to_string()))
                } else {
                    Err(invalid(name, format!("{s:?} is not a plain decimal")))
                }
            }
            _ => Err(invalid(name, "expected a decimal number")),
        },
        ParamType::Text => match value {
            Value::String(s) => Ok(TypedValue::Text(s.clone())),
            Value::Number(n) => Ok(TypedValue::Text(n.to_string())),
            Value::Bool(b) => Ok(TypedValue::Text(b.to_string())),
            _ => Err(invalid(name, "expected a text value")),
        },
        ParamType::Timestamp => {
            if let Some(ms) = value.as_i64() {
                DateTime::<Utc>::from_timestamp_millis(ms)
                    .map(TypedValue::Timestamp)
                    .ok_or_else(|| invalid(name, format!("{ms} is out of range for a timestamp")))
            } else if let Some(s) = value.as_str() {
                parse_timestamp(s)
                    .map(TypedValue::Timestamp)
                    .ok_or_else(|| invalid(name, format!("{s:?} is not a recognized timestamp")))
            } else {
                Err(invalid(name, "expected a timestamp string or epoch milliseconds"))
            }
        }
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(TypedValue::Bool(*b)),
            Value::String(s) => parse_bool(s)
                .map(TypedValue::Bool)
                .ok_or_else(|| invalid(name, format!("{s:?} is not a boolean"))),
            _ => Err(invalid(name, "expected a boolean")),
        },
        ParamType::Json => Ok(TypedValue::Json(value.clone())),
        ParamType::TextArray => match value.as_array() {
            Some(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    _ => Err(invalid(name, "array elements must be scalars")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TypedValue::TextArray),
            None => Err(invalid(name, "expected an array of text values")),
        },
        ParamType::UuidArray => match value.as_array() {
            Some(items) => items
                .iter()
                .map(|item| match item.as_str() {
                    Some(s) => Uuid::parse_str(s.trim())
                        .map_err(|_| invalid(name, format!("{s:?} is not a valid UUID"))),
                    None => Err(invalid(name, "array elements must be UUID strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TypedValue::UuidArray),
            None => Err(invalid(name, "expected an array of UUID strings")),
        },
    }
}

/// Coerce a global-variable string to the declared type. Array types split on
/// commas since globals are flat strings.
pub fn coerce_str(name: &str, expected: ParamType, raw: &str) -> Result<TypedValue, BindError> {
    match expected {
        ParamType::Text => Ok(TypedValue::Text(raw.to_string())),
        ParamType::Json => serde_json::from_str(raw)
            .map(TypedValue::Json)
            .map_err(|_| invalid(name, "global variable is not valid JSON")),
        ParamType::TextArray => Ok(TypedValue::TextArray(
            raw.split(',').map(|part| part.trim().to_string()).collect(),
        )),
        ParamType::UuidArray => raw
            .split(',')
            .map(|part| {
                Uuid::parse_str(part.trim())
                    .map_err(|_| invalid(name, format!("{part:?} is not a valid UUID")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(TypedValue::UuidArray),
        ParamType::Uuid | ParamType::Int | ParamType::Numeric | ParamType::Timestamp
        | ParamType::Bool => coerce_json(name, expected, &Value::String(raw.to_string())),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn is_plain_decimal(s: &str) -> bool {
    let rest = s.strip_prefix('-').or_else(|| s.strip_prefix('+')).unwrap_or(s);
    if rest.is_empty() {
        return false;
    }
    let mut parts = rest.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let int_ok = !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit());
    match parts.next() {
        None => int_ok,
        Some(frac) => {
            (int_ok || int_part.is_empty())
                && !frac.is_empty()
                && frac.chars().all(|c| c.is_ascii_digit())
        }
    }
}
