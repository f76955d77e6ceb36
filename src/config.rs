//! Process configuration from `SQLGATE_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_TARGET: &str = "default";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    /// Connections per target database; doubles as the concurrent-query cap.
    pub pool_size: usize,
    /// Named target databases: `SQLGATE_DB_URL` is `default`,
    /// `SQLGATE_DB_URL_ANALYTICS` is `analytics`.
    pub targets: HashMap<String, String>,
    pub cache_disabled: bool,
    pub cache_capacity: u64,
    pub grid_ttl: Duration,
    pub tile_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_port: 7878,
            pool_size: 8,
            targets: HashMap::new(),
            cache_disabled: false,
            cache_capacity: 1024,
            grid_ttl: Duration::from_secs(300),
            tile_ttl: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cfg = Config::default();
        for (key, value) in pairs {
            match key.as_str() {
                "SQLGATE_HTTP_PORT" => {
                    cfg.http_port = value.parse().unwrap_or(cfg.http_port);
                }
                "SQLGATE_POOL_SIZE" => {
                    cfg.pool_size = value.parse().map(|n: usize| n.max(1)).unwrap_or(cfg.pool_size);
                }
                "SQLGATE_CACHE_DISABLED" => {
                    cfg.cache_disabled =
                        matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
                }
                "SQLGATE_CACHE_CAPACITY" => {
                    cfg.cache_capacity = value.parse().unwrap_or(cfg.cache_capacity);
                }
                "SQLGATE_CACHE_GRID_TTL_SECS" => {
                    if let Ok(secs) = value.parse() {
                        cfg.grid_ttl = Duration::from_secs(secs);
                    }
                }
                "SQLGATE_CACHE_TILE_TTL_SECS" => {
                    if let Ok(secs) = value.parse() {
                        cfg.tile_ttl = Duration::from_secs(secs);
                    }
                }
                _ => {
                    if let Some(rest) = key.strip_prefix("SQLGATE_DB_URL") {
                        let name = match rest.strip_prefix('_') {
                            Some(suffix) if !suffix.is_empty() => suffix.to_lowercase(),
                            Some(_) => continue,
                            None if rest.is_empty() => DEFAULT_TARGET.to_string(),
                            None => continue,
                        };
                        if !value.trim().is_empty() {
                            cfg.targets.insert(name, value);
                        }
                    }
                }
            }
        }
        cfg
    }
}
