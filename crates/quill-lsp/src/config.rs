// ABOUTME: Configuration for the Quill language server, loaded from TOML with code defaults
// ABOUTME: Covers lifecycle timings, backend selection and endpoints, progress and logging

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub progress: ProgressConfig,
    pub log: LogConfig,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Which registered backend serves completions and chat.
    pub provider: String,
    pub debounce_ms: u64,
    pub completion_timeout_ms: u64,
    pub chat_timeout_ms: u64,
    pub num_candidates: usize,
    /// Window in which a trigger with an identical before-cursor key is
    /// treated as a duplicate and answered empty.
    pub duplicate_window_ms: u64,
    /// Trigger lines shorter than this (trimmed) are skipped. Tunable:
    /// lowering it lets single-character contexts like `{` through.
    pub min_trigger_len: usize,
    pub trigger_characters: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            debounce_ms: 200,
            completion_timeout_ms: 15_000,
            chat_timeout_ms: 60_000,
            num_candidates: 3,
            duplicate_window_ms: 500,
            min_trigger_len: 2,
            trigger_characters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Log file path; logs go to stderr when unset (stdout carries LSP).
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    /// Model for chat-based code actions; falls back to `model`.
    pub chat_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:1.5b".to_string(),
            chat_model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub model: String,
    pub chat_model: String,
    /// Never read from the config file; populated from OPENAI_API_KEY.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            chat_model: String::new(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration: explicit path, then QUILL_CONFIG, then defaults.
    /// Secrets come from the environment regardless of the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("QUILL_CONFIG").map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.openai.api_key = key;
        }
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {path:?}"))
    }

    pub fn validate(&self) -> Result<()> {
        match self.server.provider.as_str() {
            "ollama" => {}
            "openai" => {
                if self.openai.api_key.is_empty() {
                    bail!("provider is openai but OPENAI_API_KEY is not set");
                }
            }
            other => bail!("unknown provider: {other}"),
        }
        if self.server.num_candidates == 0 {
            bail!("server.num_candidates must be at least 1");
        }
        if self.ollama.endpoint.trim().is_empty() {
            bail!("ollama.endpoint must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.debounce_ms, 200);
        assert_eq!(config.server.completion_timeout_ms, 15_000);
        assert_eq!(config.server.num_candidates, 3);
        assert_eq!(config.server.duplicate_window_ms, 500);
        assert_eq!(config.progress.interval_ms, 1_000);
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[server]\ndebounce_ms = 50\n\n[ollama]\nmodel = \"codellama\"\n"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.debounce_ms, 50);
        assert_eq!(config.ollama.model, "codellama");
        // Untouched sections keep their defaults.
        assert_eq!(config.server.num_candidates, 3);
        assert_eq!(config.ollama.endpoint, "http://localhost:11434");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.provider = "mystery".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.provider = "openai".to_string();
        config.openai.api_key.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.num_candidates = 0;
        assert!(config.validate().is_err());
    }
}
