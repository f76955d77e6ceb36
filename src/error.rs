//! Unified pipeline error model and response-envelope mapping.
//! Every failure a caller can observe flows through [`PipelineError`]; the HTTP
//! layer serializes it with [`PipelineError::envelope`] and never invents codes
//! of its own.

use serde_json::{json, Value};
use thiserror::Error;

use crate::gate::ValidationIssue;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The safety gate refused the statement. Carries every issue found, not
    /// just the first one.
    #[error("statement rejected: {}", summarize_issues(.0))]
    Rejected(Vec<ValidationIssue>),

    /// The statement references a parameter with no request value, no global
    /// variable, and no spec default.
    #[error("no value supplied for parameter :{name}")]
    MissingParam { name: String },

    /// A supplied parameter value could not be coerced to its declared type.
    #[error("parameter :{name}: {message}")]
    InvalidParam { name: String, message: String },

    /// Page or page size outside the accepted range, or not integral.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// Request-level misconfiguration: unknown target database, unsupported
    /// dialect, read_only=false, unreachable target.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backing database reported an error or the statement timed out.
    #[error("execution failed: {message}")]
    Execution {
        message: String,
        sql_state: Option<String>,
        position: Option<u32>,
        timed_out: bool,
    },

    /// Unexpected fault (parser panic, poisoned state). The detail is logged
    /// server-side; callers only see a generic message.
    #[error("internal error: {0}")]
    Internal(String),
}

fn summarize_issues(issues: &[ValidationIssue]) -> String {
    match issues.first() {
        Some(first) if issues.len() == 1 => first.message.clone(),
        Some(first) => format!("{} (+{} more)", first.message, issues.len() - 1),
        None => "rejected".to_string(),
    }
}

impl PipelineError {
    pub fn invalid_param<S: Into<String>>(name: S, msg: S) -> Self {
        PipelineError::InvalidParam { name: name.into(), message: msg.into() }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        PipelineError::Config(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PipelineError::Internal(msg.into())
    }

    /// Stable machine-readable code for the response envelope. For gate
    /// rejections this is the code of the first recorded issue.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Rejected(issues) => {
                issues.first().map(|i| i.code.as_str()).unwrap_or("NOT_SELECT")
            }
            PipelineError::MissingParam { .. } => "MISSING_PARAM",
            PipelineError::InvalidParam { .. } => "INVALID_PARAM_TYPE",
            PipelineError::InvalidPagination(_) => "INVALID_PAGINATION",
            PipelineError::Config(_) => "CONFIG_ERROR",
            PipelineError::Execution { .. } => "EXECUTION_ERROR",
            PipelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to the caller. Internal faults are redacted to a
    /// fixed string; everything else is already caller-facing.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Serialize as the error body shared by every endpoint:
    /// `{"error": {"code", "message", "details"?}}`.
    pub fn envelope(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.public_message(),
        });
        match self {
            PipelineError::Rejected(issues) => {
                error["details"] = json!({ "issues": issues });
            }
            PipelineError::Execution { sql_state, position, timed_out, .. } => {
                let mut details = serde_json::Map::new();
                if let Some(state) = sql_state {
                    details.insert("sqlCode".into(), json!(state));
                }
                if let Some(pos) = position {
                    details.insert("position".into(), json!(pos));
                }
                if *timed_out {
                    details.insert("timedOut".into(), json!(true));
                }
                if !details.is_empty() {
                    error["details"] = Value::Object(details);
                }
            }
            _ => {}
        }
        json!({ "error": error })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
