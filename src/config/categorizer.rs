// src/config/categorizer.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_CATEGORIZER_CONFIG_PATH: &str = "config/categorizer.json";

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizerConfig {
    pub enabled: bool,
    /// "openai" | "gemini" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY / GOOGLE_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Optional model override; provider default otherwise.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: default_api_key(),
            model: None,
        }
    }
}

impl CategorizerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: CategorizerConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// Reads `config/categorizer.json`; a missing file yields a disabled config.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Path::new(DEFAULT_CATEGORIZER_CONFIG_PATH);
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn resolved(mut self) -> anyhow::Result<Self> {
        // Normalize provider
        self.provider = self.provider.trim().to_lowercase();

        if !self.enabled {
            return Ok(self);
        }

        // Resolve api key if "ENV"
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "gemini" => env::var("GOOGLE_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing GOOGLE_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            self.model = None;
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_per_provider() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("categorizer.json");
        fs::write(
            &p,
            r#"{"enabled": true, "provider": " OpenAI ", "api_key": "env", "model": ""}"#,
        )
        .unwrap();

        env::set_var("OPENAI_API_KEY", "sk-test");
        let cfg = CategorizerConfig::load_from_file(&p).unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert!(cfg.model.is_none());

        env::remove_var("OPENAI_API_KEY");
        assert!(CategorizerConfig::load_from_file(&p).is_err());
    }

    #[test]
    fn disabled_config_skips_key_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("categorizer.json");
        fs::write(&p, r#"{"enabled": false, "provider": "nobody"}"#).unwrap();
        let cfg = CategorizerConfig::load_from_file(&p).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.api_key, "ENV");
    }
}
