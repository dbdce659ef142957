use anyhow::{Context, Result};
use export::{FormatConfig, OutputNames};
use extract::{PatientIdentity, RefinementRules, RetryPolicy};
use ingest::SourceConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub source: SourceConfig,
    pub parser: ParserConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // Aggressive caching, short timeouts
    Accurate, // Always fresh, patient timeouts
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_branches: usize,
    pub max_concurrent_llm_calls: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Document parsing service; without it only plain-text files are readable
    pub service_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub names: OutputNames,
    pub tabular: bool,
    pub narrative_threshold: usize,
    pub default_identity: PatientIdentity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NormalizerKind {
    /// Deterministic regex and synonym rules
    Rules,
    /// Model-backed normalization
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub synthesize: bool,
    pub normalizer: NormalizerKind,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_branches: 4,
            max_concurrent_llm_calls: 3,
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        let format = FormatConfig::default();
        Self {
            dir: PathBuf::from("output"),
            names: OutputNames::default(),
            tabular: format.tabular,
            narrative_threshold: format.narrative_threshold,
            default_identity: format.default_identity,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            synthesize: true,
            normalizer: NormalizerKind::Llm,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            llm: LlmConfig::default(),
            source: SourceConfig::default(),
            parser: ParserConfig::default(),
            output: OutputConfig::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl AppConfig {
    /// Replace the concurrency, retry and cache sections with the preset for `mode`.
    pub fn apply_mode(&mut self, mode: OperationMode) {
        self.mode = mode;
        match mode {
            OperationMode::Fast => {
                self.concurrency = ConcurrencyConfig {
                    max_concurrent_branches: 8,
                    max_concurrent_llm_calls: 10,
                    request_timeout_secs: 60,
                };
                self.retry = RetryConfig {
                    max_retries: 2,
                    initial_backoff_ms: 500,
                    max_backoff_ms: 5000,
                };
                self.cache = CacheConfig {
                    enabled: true,
                    max_entries: 50000,
                };
            }
            OperationMode::Accurate => {
                self.concurrency = ConcurrencyConfig {
                    max_concurrent_branches: 2,
                    max_concurrent_llm_calls: 2,
                    request_timeout_secs: 300,
                };
                self.retry = RetryConfig {
                    max_retries: 5,
                    initial_backoff_ms: 2000,
                    max_backoff_ms: 20000,
                };
                self.cache = CacheConfig {
                    enabled: false,
                    max_entries: 0,
                };
            }
            OperationMode::Balanced => {
                self.concurrency = ConcurrencyConfig::default();
                self.retry = RetryConfig::default();
                self.cache = CacheConfig::default();
            }
        }
    }

    /// Defaults, or the JSON file at `path`. A `mode` in the file selects the
    /// preset first; keys the file sets explicitly win over it, missing keys
    /// keep the preset or default value.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let file: Value = serde_json::from_str(&raw).context(format!("Invalid config file: {:?}", path))?;

        let mut base = Self::default();
        if let Some(mode) = file.get("mode") {
            let mode: OperationMode = serde_json::from_value(mode.clone())
                .context(format!("Invalid mode in config file: {:?}", path))?;
            base.apply_mode(mode);
        }

        let mut merged = serde_json::to_value(&base)?;
        overlay(&mut merged, file);
        serde_json::from_value(merged).context(format!("Invalid config file: {:?}", path))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// `OLLAMA_BASE_URL` and `OLLAMA_MODEL` win over file and flags.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            self.llm.model = model;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    pub fn format_config(&self) -> FormatConfig {
        FormatConfig {
            default_identity: self.output.default_identity.clone(),
            tabular: self.output.tabular,
            narrative_threshold: self.output.narrative_threshold,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            call_timeout_secs: self.concurrency.request_timeout_secs,
            max_concurrent_branches: self.concurrency.max_concurrent_branches,
            synthesize: self.pipeline.synthesize,
            format: self.format_config(),
            rules: RefinementRules::default(),
        }
    }
}

/// Recursively replace values in `base` with those set in `file`.
fn overlay(base: &mut Value, file: Value) {
    match (base, file) {
        (Value::Object(base), Value::Object(file)) => {
            for (key, value) in file {
                match base.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, file) => *base = file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn preset(mode: OperationMode) -> AppConfig {
        let mut config = AppConfig::default();
        config.apply_mode(mode);
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, OperationMode::Balanced);
        assert_eq!(config.concurrency.request_timeout_secs, 120);
        assert_eq!(config.output.narrative_threshold, 150);
        assert!(config.pipeline.synthesize);
    }

    #[test]
    fn test_presets() {
        let fast = preset(OperationMode::Fast);
        assert_eq!(fast.mode, OperationMode::Fast);
        assert!(fast.cache.enabled);

        let accurate = preset(OperationMode::Accurate);
        assert!(!accurate.cache.enabled);
        assert!(accurate.concurrency.request_timeout_secs > fast.concurrency.request_timeout_secs);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"llm": {{"model": "mistral"}}, "output": {{"dir": "out", "tabular": false}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.output.dir, PathBuf::from("out"));
        assert!(!config.format_config().tabular);
        assert_eq!(config.output.names.record, "master_record.json");
    }

    #[test]
    fn test_mode_in_file_applies_preset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mode": "fast"}}"#).unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        let fast = preset(OperationMode::Fast);

        assert_eq!(config.mode, OperationMode::Fast);
        assert_eq!(config.concurrency.max_concurrent_branches, fast.concurrency.max_concurrent_branches);
        assert_eq!(config.concurrency.request_timeout_secs, 60);
        assert_eq!(config.retry.max_retries, fast.retry.max_retries);
        assert_eq!(config.cache.max_entries, fast.cache.max_entries);
    }

    #[test]
    fn test_explicit_section_wins_over_file_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mode": "accurate", "concurrency": {{"request_timeout_secs": 45}}, "cache": {{"enabled": true}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.mode, OperationMode::Accurate);
        assert_eq!(config.concurrency.request_timeout_secs, 45);
        // The rest of the section still comes from the preset
        assert_eq!(config.concurrency.max_concurrent_branches, 2);
        assert!(config.cache.enabled);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_unknown_mode_in_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mode": "turbo"}}"#).unwrap();

        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/recordfuse.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("OLLAMA_MODEL", "qwen2"), ("OLLAMA_BASE_URL", "")].into();
        let mut config = AppConfig::default();

        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.model, "qwen2");
        // Blank values are ignored
        assert_eq!(config.llm.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_pipeline_config_mapping() {
        let mut config = preset(OperationMode::Fast);
        config.pipeline.synthesize = false;

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.call_timeout_secs, 60);
        assert_eq!(pipeline.max_concurrent_branches, 8);
        assert!(!pipeline.synthesize);
    }
}
