use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

const DEFAULT_DB_PATH: &str = "approvals.db";
const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory of the sled database. Set via APPROVAL_DB_PATH.
    pub db_path: PathBuf,
    /// Flush to disk after every committed write. Set via APPROVAL_FLUSH_ON_WRITE.
    pub flush_on_write: bool,
    /// Page cache size in bytes. Set via APPROVAL_CACHE_CAPACITY.
    pub cache_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            flush_on_write: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Build a config from a variable lookup, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let db_path = lookup("APPROVAL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let flush_on_write = match lookup("APPROVAL_FLUSH_ON_WRITE") {
            Some(v) => parse_bool(&v)
                .with_context(|| format!("APPROVAL_FLUSH_ON_WRITE has invalid value {v:?}"))?,
            None => defaults.flush_on_write,
        };

        let cache_capacity = match lookup("APPROVAL_CACHE_CAPACITY") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("APPROVAL_CACHE_CAPACITY has invalid value {v:?}"))?,
            None => defaults.cache_capacity,
        };

        Ok(Self {
            db_path,
            flush_on_write,
            cache_capacity,
        })
    }

    pub fn open_db(&self) -> anyhow::Result<Arc<sled::Db>> {
        let db = sled::Config::new()
            .path(&self.db_path)
            .cache_capacity(self.cache_capacity)
            .open()
            .with_context(|| format!("failed to open database at {}", self.db_path.display()))?;
        Ok(Arc::new(db))
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

/// Load the config from the process environment, reading `.env` first if present.
pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|key| std::env::var(key).ok())
}
