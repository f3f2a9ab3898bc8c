use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::analyzer::{AnalyzerSettings, ConcurrentAnalyzer};
use crate::chunking::Chunker;
use crate::pagination::{ContextManager, CursorCipher, Paginator};
use crate::tokens::{ModelProfile, TokenEstimator};
use task_daemon::ProcessorConfig;

const CONFIG_DIR: &str = ".codewindow";
const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Engine configuration as read from settings files.
/// All fields are optional to support partial configurations and merging
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokensConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<AnalyzerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokensConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_margin: Option<usize>,
    /// Default chunk budget; a quarter of the safe limit when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpe_calibration: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaginationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_retention_secs: Option<u64>,
    /// Name of the environment variable holding the cursor secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalyzerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_pause_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TasksConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
}

/// Configuration with every default filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub log_level: String,
    pub tokens: ResolvedTokensConfig,
    pub pagination: ResolvedPaginationConfig,
    pub analyzer: ResolvedAnalyzerConfig,
    pub tasks: ResolvedTasksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTokensConfig {
    pub model: String,
    pub safety_margin: usize,
    pub chunk_tokens: usize,
    pub bpe_calibration: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPaginationConfig {
    pub context_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub session_retention_secs: u64,
    pub cursor_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnalyzerConfig {
    pub max_concurrent_files: usize,
    pub max_file_size_bytes: u64,
    pub file_timeout_secs: u64,
    pub batch_pause_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTasksConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub default_timeout_secs: u64,
    pub max_retries: u32,
    pub cleanup_interval_secs: u64,
    pub retention_secs: u64,
}

/// Overwrite each listed field of `$base` that is set in `$other`
macro_rules! merge_fields {
    ($base:expr, $other:expr, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $base.$field = $other.$field;
            }
        )+
    };
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
}

impl EngineConfig {
    /// Load configuration from every level, merge, apply env overrides and validate
    pub fn load() -> Result<ResolvedConfig> {
        let mut merged = EngineConfig::default();
        for config in Self::load_all_configs()? {
            merged = Self::merge_configs(merged, config);
        }
        merged.apply_env_overrides();
        merged.validate()?;
        Ok(merged.resolve_with_defaults())
    }

    /// Configuration file paths in priority order (later wins)
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Global config: ~/.codewindow/settings.json
        if let Ok(home) = env::var("HOME") {
            paths.push(PathBuf::from(home).join(CONFIG_DIR).join("settings.json"));
        } else if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(CONFIG_DIR).join("settings.json"));
        }

        // 2. Project config, then its local override
        paths.push(PathBuf::from(CONFIG_DIR).join("settings.json"));
        paths.push(PathBuf::from(CONFIG_DIR).join("settings.local.json"));

        // 3. Explicit path; a trailing separator means a directory
        if let Ok(custom_path) = env::var("CODEWINDOW_CONFIG_PATH") {
            let looks_like_dir = custom_path.ends_with('/') || custom_path.ends_with('\\');
            if looks_like_dir {
                paths.push(PathBuf::from(&custom_path).join("settings.json"));
            } else {
                paths.push(PathBuf::from(&custom_path));
            }
        }

        paths
    }

    fn load_all_configs() -> Result<Vec<EngineConfig>> {
        let mut configs = Vec::new();
        for path in Self::get_config_paths() {
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => configs.push(Self::load_from_file(&path)?),
                _ => continue,
            }
        }
        Ok(configs)
    }

    /// Load a single configuration file, tolerating a UTF-8 BOM
    pub fn load_from_file(path: &Path) -> Result<EngineConfig> {
        let bytes = fs::read(path).context(format!("Failed to read config file: {path:?}"))?;
        let content = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes[..]);
        serde_json::from_slice(content).context(format!("Failed to parse config file: {path:?}"))
    }

    /// Deep merge two configurations, with `other` taking precedence
    pub fn merge_configs(mut base: EngineConfig, other: EngineConfig) -> EngineConfig {
        if other.log_level.is_some() {
            base.log_level = other.log_level;
        }
        if let Some(other) = other.tokens {
            let tokens = base.tokens.get_or_insert_with(TokensConfig::default);
            merge_fields!(tokens, other, model, safety_margin, chunk_tokens, bpe_calibration);
        }
        if let Some(other) = other.pagination {
            let pagination = base.pagination.get_or_insert_with(PaginationConfig::default);
            merge_fields!(
                pagination,
                other,
                context_ttl_secs,
                cleanup_interval_secs,
                session_retention_secs,
                cursor_key_env,
            );
        }
        if let Some(other) = other.analyzer {
            let analyzer = base.analyzer.get_or_insert_with(AnalyzerConfig::default);
            merge_fields!(
                analyzer,
                other,
                max_concurrent_files,
                max_file_size_bytes,
                file_timeout_secs,
                batch_pause_ms,
            );
        }
        if let Some(other) = other.tasks {
            let tasks = base.tasks.get_or_insert_with(TasksConfig::default);
            merge_fields!(
                tasks,
                other,
                queue_capacity,
                workers,
                default_timeout_secs,
                max_retries,
                cleanup_interval_secs,
                retention_secs,
            );
        }
        base
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CODEWINDOW_LOG_LEVEL") {
            self.log_level = Some(val);
        }

        let tokens = self.tokens.get_or_insert_with(TokensConfig::default);
        if let Ok(val) = env::var("CODEWINDOW_MODEL") {
            tokens.model = Some(val);
        }
        if let Some(margin) = env_parse("CODEWINDOW_SAFETY_MARGIN") {
            tokens.safety_margin = Some(margin);
        }
        if let Some(max) = env_parse("CODEWINDOW_CHUNK_TOKENS") {
            tokens.chunk_tokens = Some(max);
        }
        if let Some(enabled) = env_flag("CODEWINDOW_BPE_CALIBRATION") {
            tokens.bpe_calibration = Some(enabled);
        }

        let pagination = self.pagination.get_or_insert_with(PaginationConfig::default);
        if let Some(ttl) = env_parse("CODEWINDOW_CONTEXT_TTL") {
            pagination.context_ttl_secs = Some(ttl);
        }
        if let Some(interval) = env_parse("CODEWINDOW_CLEANUP_INTERVAL") {
            pagination.cleanup_interval_secs = Some(interval);
        }
        if let Ok(val) = env::var("CODEWINDOW_CURSOR_KEY_ENV") {
            pagination.cursor_key_env = Some(val);
        }

        let analyzer = self.analyzer.get_or_insert_with(AnalyzerConfig::default);
        if let Some(max) = env_parse("CODEWINDOW_MAX_CONCURRENT_FILES") {
            analyzer.max_concurrent_files = Some(max);
        }
        if let Some(bytes) = env_parse("CODEWINDOW_MAX_FILE_SIZE") {
            analyzer.max_file_size_bytes = Some(bytes);
        }
        if let Some(secs) = env_parse("CODEWINDOW_FILE_TIMEOUT") {
            analyzer.file_timeout_secs = Some(secs);
        }

        let tasks = self.tasks.get_or_insert_with(TasksConfig::default);
        if let Some(capacity) = env_parse("CODEWINDOW_QUEUE_CAPACITY") {
            tasks.queue_capacity = Some(capacity);
        }
        if let Some(workers) = env_parse("CODEWINDOW_WORKERS") {
            tasks.workers = Some(workers);
        }
        if let Some(secs) = env_parse("CODEWINDOW_TASK_TIMEOUT") {
            tasks.default_timeout_secs = Some(secs);
        }
        if let Some(retries) = env_parse("CODEWINDOW_MAX_RETRIES") {
            tasks.max_retries = Some(retries);
        }
    }

    pub fn resolve_with_defaults(self) -> ResolvedConfig {
        let tokens = self.tokens.unwrap_or_default();
        let pagination = self.pagination.unwrap_or_default();
        let analyzer = self.analyzer.unwrap_or_default();
        let tasks = self.tasks.unwrap_or_default();

        let model = tokens
            .model
            .and_then(|m| ModelProfile::from_str(&m))
            .unwrap_or_default();
        let mut estimator = TokenEstimator::new(model);
        if let Some(margin) = tokens.safety_margin {
            estimator = estimator.with_safety_margin(margin);
        }
        let processor = ProcessorConfig::default();

        ResolvedConfig {
            log_level: self
                .log_level
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            tokens: ResolvedTokensConfig {
                model: model.as_str().to_string(),
                safety_margin: estimator.limits().safety_margin,
                chunk_tokens: tokens
                    .chunk_tokens
                    .unwrap_or_else(|| (estimator.safe_limit() / 4).max(1)),
                bpe_calibration: tokens.bpe_calibration.unwrap_or(false),
            },
            pagination: ResolvedPaginationConfig {
                context_ttl_secs: pagination.context_ttl_secs.unwrap_or(1800),
                cleanup_interval_secs: pagination.cleanup_interval_secs.unwrap_or(300),
                session_retention_secs: pagination.session_retention_secs.unwrap_or(3600),
                cursor_key_env: pagination
                    .cursor_key_env
                    .unwrap_or_else(|| "CODEWINDOW_CURSOR_KEY".to_string()),
            },
            analyzer: ResolvedAnalyzerConfig {
                max_concurrent_files: analyzer.max_concurrent_files.unwrap_or(8),
                max_file_size_bytes: analyzer.max_file_size_bytes.unwrap_or(10 * 1024 * 1024),
                file_timeout_secs: analyzer.file_timeout_secs.unwrap_or(30),
                batch_pause_ms: analyzer.batch_pause_ms.unwrap_or(100),
            },
            tasks: ResolvedTasksConfig {
                queue_capacity: tasks.queue_capacity.unwrap_or(processor.max_queue_size),
                workers: tasks.workers.unwrap_or(processor.max_workers),
                default_timeout_secs: tasks
                    .default_timeout_secs
                    .unwrap_or(processor.default_timeout_ms / 1000),
                max_retries: tasks.max_retries.unwrap_or(processor.default_max_retries),
                cleanup_interval_secs: tasks
                    .cleanup_interval_secs
                    .unwrap_or(processor.cleanup_interval_secs),
                retention_secs: tasks.retention_secs.unwrap_or(processor.retention_secs),
            },
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(ref log_level) = self.log_level {
            if !VALID_LOG_LEVELS.contains(&log_level.to_lowercase().as_str()) {
                anyhow::bail!("Invalid log level: {}", log_level);
            }
        }
        if let Some(ref tokens) = self.tokens {
            if let Some(ref model) = tokens.model {
                if ModelProfile::from_str(model).is_none() {
                    anyhow::bail!("Invalid model profile: {}", model);
                }
            }
            if tokens.chunk_tokens == Some(0) {
                anyhow::bail!("chunk_tokens must be greater than 0");
            }
        }
        if let Some(ref analyzer) = self.analyzer {
            if analyzer.max_concurrent_files == Some(0) {
                anyhow::bail!("max_concurrent_files must be greater than 0");
            }
        }
        if let Some(ref tasks) = self.tasks {
            if tasks.workers == Some(0) {
                anyhow::bail!("workers must be greater than 0");
            }
            if tasks.queue_capacity == Some(0) {
                anyhow::bail!("queue_capacity must be greater than 0");
            }
            if tasks.default_timeout_secs == Some(0) {
                anyhow::bail!("default_timeout_secs must be greater than 0");
            }
        }
        Ok(())
    }
}

impl ResolvedConfig {
    pub fn estimator(&self) -> TokenEstimator {
        let profile = ModelProfile::from_str(&self.tokens.model).unwrap_or_default();
        TokenEstimator::new(profile)
            .with_safety_margin(self.tokens.safety_margin)
            .with_bpe_calibration(self.tokens.bpe_calibration)
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.estimator()).with_chunk_tokens(self.tokens.chunk_tokens)
    }

    /// Context manager keyed from the configured environment variable
    pub fn context_manager(&self) -> ContextManager {
        let pagination = &self.pagination;
        ContextManager::new(CursorCipher::from_env(&pagination.cursor_key_env))
            .with_default_ttl(Duration::from_secs(pagination.context_ttl_secs))
            .with_cleanup_interval(Duration::from_secs(pagination.cleanup_interval_secs))
            .with_session_retention(Duration::from_secs(pagination.session_retention_secs))
    }

    pub fn paginator(&self) -> Paginator {
        Paginator::new(self.chunker(), Arc::new(self.context_manager()))
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings::default()
            .with_max_concurrent_files(self.analyzer.max_concurrent_files)
            .with_max_file_size(self.analyzer.max_file_size_bytes)
            .with_timeout_per_file(Duration::from_secs(self.analyzer.file_timeout_secs))
            .with_batch_pause(Duration::from_millis(self.analyzer.batch_pause_ms))
    }

    pub fn analyzer(&self) -> ConcurrentAnalyzer {
        ConcurrentAnalyzer::new(self.analyzer_settings(), self.estimator())
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::default()
            .with_workers(self.tasks.workers)
            .with_queue_size(self.tasks.queue_capacity)
            .with_default_timeout(Duration::from_secs(self.tasks.default_timeout_secs))
            .with_default_max_retries(self.tasks.max_retries)
            .with_cleanup_interval(Duration::from_secs(self.tasks.cleanup_interval_secs))
            .with_retention(Duration::from_secs(self.tasks.retention_secs))
    }

    /// Get a pretty-printed JSON representation
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration to JSON")
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        EngineConfig::default().resolve_with_defaults()
    }
}
