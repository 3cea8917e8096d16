//! Layered runtime configuration (spec §10.3): built-in defaults, optionally
//! overridden by a config file, itself overridden by explicit CLI flags.
//! `cc-core` itself takes no config file -- this layer exists only in the
//! driver binary.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_derive::{Deserialize, Serialize};

use cc_core::persist::FlushStrategy;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Tpl,
    OccNuma,
    Romulus,
    Courier,
    CourierSave,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushStrategyConfig {
    Clwb,
    Clflush,
    ClflushOpt,
    None,
}

impl From<FlushStrategyConfig> for FlushStrategy {
    fn from(value: FlushStrategyConfig) -> Self {
        match value {
            FlushStrategyConfig::Clwb => FlushStrategy::Clwb,
            FlushStrategyConfig::Clflush => FlushStrategy::Clflush,
            FlushStrategyConfig::ClflushOpt => FlushStrategy::ClflushOpt,
            FlushStrategyConfig::None => FlushStrategy::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub protocol: Protocol,
    pub flush_strategy: FlushStrategyConfig,
    pub workers: u32,
    pub duration_secs: u64,
    pub key_space: u64,
    pub ring_size_bytes: u64,
    pub log_dir: String,
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            protocol: Protocol::Tpl,
            flush_strategy: FlushStrategyConfig::None,
            workers: 4,
            duration_secs: 10,
            key_space: 10_000,
            ring_size_bytes: 1 << 26,
            log_dir: format!("{}/.cc-bench", std::env::var("HOME").unwrap_or_else(|_| ".".to_string())),
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Loads defaults, then merges a config file if `path` is given and
    /// exists. Unknown fields in the file are ignored; missing fields keep
    /// the struct-level default thanks to `#[serde(default)]`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = RunConfig::default();
        if let Some(path) = path {
            if path.exists() {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                cfg = serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_sane_worker_count() {
        let cfg = RunConfig::default();
        assert!(cfg.workers > 0);
        assert_eq!(cfg.protocol, Protocol::Tpl);
    }

    #[test]
    fn load_with_no_path_returns_defaults() {
        let cfg = RunConfig::load(None).unwrap();
        assert_eq!(cfg.workers, RunConfig::default().workers);
    }

    #[test]
    fn load_merges_a_config_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc-bench.json");
        fs::write(&path, r#"{"workers": 16, "duration_secs": 30}"#).unwrap();
        let cfg = RunConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.workers, 16);
        assert_eq!(cfg.duration_secs, 30);
        // Untouched fields keep their default.
        assert_eq!(cfg.key_space, RunConfig::default().key_space);
    }
}
