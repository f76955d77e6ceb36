//! Global variable store: operator-set values that feed parameter binding
//! and the limit resolver (`query_timeout_ms`, `query_max_rows`).
//!
//! Lookups are best-effort. A store failure must never fail the request;
//! callers degrade to request values and defaults, so the helpers here log a
//! warning and report the variable as absent.

use std::collections::HashMap;
use std::str::FromStr;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("variable store unavailable: {0}")]
pub struct VarStoreError(pub String);

pub trait VarStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, VarStoreError>;
}

/// Environment-backed store. `SQLGATE_VAR_QUERY_TIMEOUT_MS=5000` defines the
/// global `query_timeout_ms`. Values snapshot at construction; `set`
/// overrides at runtime.
pub struct EnvVars {
    values: RwLock<HashMap<String, String>>,
}

const VAR_PREFIX: &str = "SQLGATE_VAR_";

impl EnvVars {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(VAR_PREFIX)
                    .map(|name| (name.to_lowercase(), value))
            })
            .collect();
        EnvVars { values: RwLock::new(values) }
    }

    pub fn set<S: Into<String>>(&self, name: S, value: S) {
        self.values.write().insert(name.into().to_lowercase(), value.into());
    }
}

impl VarStore for EnvVars {
    fn get(&self, name: &str) -> Result<Option<String>, VarStoreError> {
        Ok(self.values.read().get(&name.to_lowercase()).cloned())
    }
}

/// Look up and parse a variable, treating failures as absence.
pub fn lookup<T: FromStr>(store: &dyn VarStore, name: &str) -> Option<T> {
    match store.get(name) {
        Ok(Some(raw)) => match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("global variable {} has unusable value {:?}; ignoring", name, raw);
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            warn!("global variable {} lookup failed: {}; continuing without it", name, err);
            None
        }
    }
}

/// Fetch the raw strings for a set of names, skipping absent or failing
/// entries. Used to hand the binder exactly the globals a statement
/// references.
pub fn collect(store: &dyn VarStore, names: &[String]) -> HashMap<String, String> {
    let mut found = HashMap::new();
    for name in names {
        match store.get(name) {
            Ok(Some(value)) => {
                found.insert(name.clone(), value);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("global variable {} lookup failed: {}; continuing without it", name, err);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(pairs: &[(&str, &str)]) -> EnvVars {
        EnvVars::from_pairs(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn env_prefix_maps_to_lowercase_names() {
        let vars = store_with(&[
            ("SQLGATE_VAR_QUERY_TIMEOUT_MS", "5000"),
            ("UNRELATED", "x"),
        ]);
        assert_eq!(vars.get("query_timeout_ms").unwrap(), Some("5000".to_string()));
        assert_eq!(vars.get("unrelated").unwrap(), None);
    }

    #[test]
    fn set_overrides_snapshot() {
        let vars = store_with(&[("SQLGATE_VAR_ORG", "one")]);
        vars.set("org", "two");
        assert_eq!(vars.get("org").unwrap(), Some("two".to_string()));
    }

    #[test]
    fn lookup_parses_and_degrades() {
        let vars = store_with(&[
            ("SQLGATE_VAR_QUERY_MAX_ROWS", "2500"),
            ("SQLGATE_VAR_QUERY_TIMEOUT_MS", "soon"),
        ]);
        assert_eq!(lookup::<u32>(&vars, "query_max_rows"), Some(2500));
        assert_eq!(lookup::<u64>(&vars, "query_timeout_ms"), None);
        assert_eq!(lookup::<u64>(&vars, "not_there"), None);
    }

    #[test]
    fn collect_skips_absent_names() {
        let vars = store_with(&[("SQLGATE_VAR_ORG_ID", "42")]);
        let found = collect(&vars, &["org_id".to_string(), "ghost".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("org_id"), Some(&"42".to_string()));
    }

    struct FailingStore;

    impl VarStore for FailingStore {
        fn get(&self, _name: &str) -> Result<Option<String>, VarStoreError> {
            Err(VarStoreError("backend offline".to_string()))
        }
    }

    #[test]
    fn store_failure_reads_as_absent() {
        assert_eq!(lookup::<u64>(&FailingStore, "query_timeout_ms"), None);
        assert!(collect(&FailingStore, &["a".to_string()]).is_empty());
    }
}
