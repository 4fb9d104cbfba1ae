// src/config/pipeline.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::DEFAULT_CHUNK_SIZE;
use crate::reconcile::CancellationMatching;

pub const ENV_CONFIG_PATH: &str = "ANALYZER_CONFIG_PATH";
pub const ENV_CHUNK_SIZE: &str = "ANALYZER_CHUNK_SIZE";
pub const ENV_CALL_TIMEOUT_SECS: &str = "ANALYZER_CALL_TIMEOUT_SECS";
pub const ENV_LEDGER_PATH: &str = "ANALYZER_LEDGER_PATH";

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LEDGER_PATH: &str = "state/ledger.json";

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}
fn default_noise_markers() -> Vec<String> {
    vec!["prefunding".to_string()]
}
fn default_ledger_path() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_LEDGER_PATH))
}

/// Tunables of the ingest → dispatch → reconcile → aggregate pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per categorizer call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-call timeout; a timed-out chunk counts as failed.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Case-insensitive description markers of internal-transfer noise.
    #[serde(default = "default_noise_markers")]
    pub noise_markers: Vec<String>,
    #[serde(default)]
    pub cancellation_matching: CancellationMatching,
    /// Where the cumulative ledger is persisted. `None` keeps it in memory only.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            call_timeout_secs: default_call_timeout_secs(),
            noise_markers: default_noise_markers(),
            cancellation_matching: CancellationMatching::default(),
            ledger_path: default_ledger_path(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $ANALYZER_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/pipeline.toml");
            let json_p = PathBuf::from("config/pipeline.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        Ok(base.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<usize>(ENV_CHUNK_SIZE) {
            self.chunk_size = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_CALL_TIMEOUT_SECS) {
            self.call_timeout_secs = v;
        }
        if let Ok(p) = std::env::var(ENV_LEDGER_PATH) {
            let p = p.trim();
            self.ledger_path = if p.is_empty() || p.eq_ignore_ascii_case("memory") {
                None
            } else {
                Some(PathBuf::from(p))
            };
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = default_chunk_size();
        }
        if self.call_timeout_secs == 0 {
            self.call_timeout_secs = default_call_timeout_secs();
        }
        self.noise_markers = clean_list(self.noise_markers);
        self
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing pipeline config as JSON");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("parsing pipeline config as TOML");
    }
    // Unknown extension: JSON first, then TOML.
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported pipeline config format: {e}"))
}

/// Trim, lowercase, drop empties, dedup.
fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_lowercase());
        }
    }
    set.into_iter().collect()
}
