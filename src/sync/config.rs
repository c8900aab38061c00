use crate::error::SyncError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

include!(concat!(env!("OUT_DIR"), "/fanout_env_allowlist.rs"));

/// Hard ceiling of the ledger's batch-write call.
pub const MAX_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.chess.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl BackoffKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "exponential" | "exp" => Some(Self::Exponential),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay growth between attempts to drain unprocessed items.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    /// Initial delay between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Batch-write calls allowed per batch, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Wall-clock budget per batch in milliseconds.
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> usize {
    20
}

fn default_max_elapsed_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: default_backoff(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_attempts: default_max_attempts(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub download_queue: String,
    pub search_queue: String,
    pub dedup_window_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            download_queue: "download-games".to_string(),
            search_queue: "search-board".to_string(),
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidatorConfig {
    pub board_validator_bin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub catalog: CatalogConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    catalog: Option<CatalogConfig>,
    store: Option<StoreConfig>,
    retry: Option<RetryConfig>,
    queue: Option<QueueConfig>,
    logging: Option<LoggingConfig>,
    validator: Option<ValidatorConfig>,
}

/// Value of a set, non-blank variable. `lookup` stands in for `env::var`.
fn lookup_non_empty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    slot: &mut T,
) -> std::result::Result<(), SyncError> {
    if let Some(raw) = lookup_non_empty(lookup, var) {
        *slot = raw.parse::<T>().map_err(|_| {
            SyncError::InvalidConfig(format!("{var} must be a non-negative integer, got `{raw}`"))
        })?;
    }
    Ok(())
}

fn override_string(lookup: &impl Fn(&str) -> Option<String>, var: &str, slot: &mut String) {
    if let Some(raw) = lookup_non_empty(lookup, var) {
        *slot = raw;
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    lookup_non_empty(&|key: &str| env::var(key).ok(), var)
}

pub fn validate(cfg: &SyncConfig) -> std::result::Result<(), SyncError> {
    let invalid = |msg: &str| Err(SyncError::InvalidConfig(msg.to_string()));

    let url = cfg.catalog.base_url.trim();
    if url.is_empty() {
        return invalid("catalog base url cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return invalid("catalog base url must start with http:// or https://");
    }
    if cfg.catalog.request_timeout_secs == 0 {
        return invalid("catalog request timeout must be >= 1 second");
    }
    if cfg.store.batch_size == 0 || cfg.store.batch_size > MAX_BATCH_SIZE {
        return Err(SyncError::InvalidConfig(format!(
            "store batch size must be between 1 and {MAX_BATCH_SIZE}"
        )));
    }
    if cfg.retry.max_attempts == 0 {
        return invalid("retry max attempts must be >= 1");
    }
    if cfg.retry.retry_max_delay_ms < cfg.retry.retry_delay_ms {
        return invalid("retry max delay must be >= retry delay");
    }
    if cfg.queue.download_queue.trim().is_empty() || cfg.queue.search_queue.trim().is_empty() {
        return invalid("queue names cannot be empty");
    }
    if cfg.logging.format != "text" && cfg.logging.format != "json" {
        return invalid("log format must be `text` or `json`");
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("FANOUT_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }

    let home = dirs::home_dir()?;
    Some(home.join(".archive-fanout").join("config.toml"))
}

fn merge_file_config(base: &mut SyncConfig) -> std::result::Result<(), SyncError> {
    match resolve_config_path() {
        Some(path) if path.exists() => merge_file_config_from(base, &path),
        _ => Ok(()),
    }
}

fn merge_file_config_from(base: &mut SyncConfig, path: &Path) -> std::result::Result<(), SyncError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        SyncError::InvalidConfig(format!("failed to read config {}: {err}", path.display()))
    })?;
    let parsed: PartialSyncConfig = toml::from_str(&raw).map_err(|err| {
        SyncError::InvalidConfig(format!("failed to parse config {}: {err}", path.display()))
    })?;
    if let Some(catalog) = parsed.catalog {
        base.catalog = catalog;
    }
    if let Some(store) = parsed.store {
        base.store = store;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(queue) = parsed.queue {
        base.queue = queue;
    }
    if let Some(logging) = parsed.logging {
        base.logging = logging;
    }
    if let Some(validator) = parsed.validator {
        base.validator = validator;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut SyncConfig) -> std::result::Result<(), SyncError> {
    apply_overrides_from(cfg, |key| env::var(key).ok())
}

/// Overlay `FANOUT_*` settings. A set variable that does not parse is an
/// error naming the variable.
fn apply_overrides_from(
    cfg: &mut SyncConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> std::result::Result<(), SyncError> {
    override_string(&lookup, "FANOUT_CATALOG_URL", &mut cfg.catalog.base_url);
    override_parsed(
        &lookup,
        "FANOUT_CATALOG_TIMEOUT_SECS",
        &mut cfg.catalog.request_timeout_secs,
    )?;
    override_parsed(&lookup, "FANOUT_BATCH_SIZE", &mut cfg.store.batch_size)?;
    if let Some(raw) = lookup_non_empty(&lookup, "FANOUT_RETRY_BACKOFF") {
        cfg.retry.backoff = BackoffKind::parse(&raw).ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "FANOUT_RETRY_BACKOFF must be `fixed` or `exponential`, got `{raw}`"
            ))
        })?;
    }
    override_parsed(&lookup, "FANOUT_RETRY_DELAY_MS", &mut cfg.retry.retry_delay_ms)?;
    override_parsed(
        &lookup,
        "FANOUT_RETRY_MAX_DELAY_MS",
        &mut cfg.retry.retry_max_delay_ms,
    )?;
    override_parsed(&lookup, "FANOUT_RETRY_MAX_ATTEMPTS", &mut cfg.retry.max_attempts)?;
    override_parsed(&lookup, "FANOUT_RETRY_MAX_ELAPSED_MS", &mut cfg.retry.max_elapsed_ms)?;
    override_string(&lookup, "FANOUT_DOWNLOAD_QUEUE", &mut cfg.queue.download_queue);
    override_string(&lookup, "FANOUT_SEARCH_QUEUE", &mut cfg.queue.search_queue);
    override_parsed(
        &lookup,
        "FANOUT_DEDUP_WINDOW_SECS",
        &mut cfg.queue.dedup_window_secs,
    )?;
    override_string(&lookup, "FANOUT_LOG_FORMAT", &mut cfg.logging.format);
    override_string(&lookup, "FANOUT_LOG_FILTER", &mut cfg.logging.filter);
    if let Some(bin) = lookup_non_empty(&lookup, "FANOUT_BOARD_VALIDATOR_BIN") {
        cfg.validator.board_validator_bin = Some(bin);
    }
    Ok(())
}

/// Load defaults, then the optional TOML file, then environment overrides.
/// Invalid settings come back as `SyncError::InvalidConfig`.
pub fn load_config() -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// `FANOUT_*` variables set in the environment that nothing in this binary reads.
pub fn unknown_env_keys() -> Vec<String> {
    let mut out = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("FANOUT_"))
        .filter(|key| !GENERATED_FANOUT_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&SyncConfig::default()).expect("defaults should validate");
    }

    #[test]
    fn batch_size_above_store_limit_is_rejected() {
        let mut cfg = SyncConfig::default();
        cfg.store.batch_size = 26;
        let err = validate(&cfg).expect_err("batch size 26 should fail");
        assert_eq!(err.kind().as_str(), "INVALID_CONFIG");
        assert!(err.to_string().contains("between 1 and 25"));
    }

    #[test]
    fn catalog_url_requires_http_scheme() {
        let mut cfg = SyncConfig::default();
        cfg.catalog.base_url = "ftp://api.chess.com".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn retry_delays_must_be_ordered() {
        let mut cfg = SyncConfig::default();
        cfg.retry.retry_delay_ms = 500;
        cfg.retry.retry_max_delay_ms = 100;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn partial_file_config_keeps_missing_fields_at_default() {
        let raw = "[retry]\nbackoff = \"fixed\"\nmax_attempts = 3\n";
        let parsed: PartialSyncConfig = toml::from_str(raw).expect("parse");
        let retry = parsed.retry.expect("retry section");
        assert_eq!(retry.backoff, BackoffKind::Fixed);
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.retry_delay_ms, 100);
        assert!(parsed.catalog.is_none());
    }

    #[test]
    fn partial_catalog_section_keeps_default_timeout() {
        let raw = "[catalog]\nbase_url = \"http://127.0.0.1:8080\"\n\n[queue]\ndedup_window_secs = 60\n";
        let parsed: PartialSyncConfig = toml::from_str(raw).expect("parse");
        let catalog = parsed.catalog.expect("catalog section");
        assert_eq!(catalog.base_url, "http://127.0.0.1:8080");
        assert_eq!(catalog.request_timeout_secs, 30);
        let queue = parsed.queue.expect("queue section");
        assert_eq!(queue.dedup_window_secs, 60);
        assert_eq!(queue.download_queue, "download-games");
    }

    #[test]
    fn unparsable_config_file_is_invalid_config() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[store\nbatch_size = ").expect("write config");

        let mut cfg = SyncConfig::default();
        let err = merge_file_config_from(&mut cfg, &path).expect_err("broken toml");
        assert_eq!(err.kind().as_str(), "INVALID_CONFIG");
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn unreadable_config_file_is_invalid_config() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cfg = SyncConfig::default();
        // A directory exists but cannot be read as a file.
        let err = merge_file_config_from(&mut cfg, tmp.path()).expect_err("directory");
        assert_eq!(err.kind().as_str(), "INVALID_CONFIG");
    }

    fn overrides(pairs: &[(&str, &str)]) -> std::result::Result<SyncConfig, SyncError> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<std::collections::HashMap<_, _>>();
        let mut cfg = SyncConfig::default();
        apply_overrides_from(&mut cfg, |key| vars.get(key).cloned())?;
        Ok(cfg)
    }

    #[test]
    fn env_overrides_apply_parsed_values() {
        let cfg = overrides(&[
            ("FANOUT_BATCH_SIZE", " 10 "),
            ("FANOUT_RETRY_BACKOFF", "fixed"),
            ("FANOUT_SEARCH_QUEUE", "boards"),
            ("FANOUT_RETRY_DELAY_MS", ""),
        ])
        .expect("overrides");
        assert_eq!(cfg.store.batch_size, 10);
        assert_eq!(cfg.retry.backoff, BackoffKind::Fixed);
        assert_eq!(cfg.queue.search_queue, "boards");
        assert_eq!(cfg.retry.retry_delay_ms, 100);
    }

    #[test]
    fn unparsable_numeric_override_names_the_variable() {
        let err = overrides(&[("FANOUT_BATCH_SIZE", "abc")]).expect_err("abc");
        assert_eq!(err.kind().as_str(), "INVALID_CONFIG");
        assert!(err.to_string().contains("FANOUT_BATCH_SIZE"));

        let err = overrides(&[("FANOUT_DEDUP_WINDOW_SECS", "-5")]).expect_err("negative");
        assert!(err.to_string().contains("FANOUT_DEDUP_WINDOW_SECS"));
    }

    #[test]
    fn unknown_backoff_override_is_rejected() {
        let err = overrides(&[("FANOUT_RETRY_BACKOFF", "bogus")]).expect_err("bogus");
        assert_eq!(err.kind().as_str(), "INVALID_CONFIG");
        assert!(err.to_string().contains("FANOUT_RETRY_BACKOFF"));
    }

    #[test]
    fn allowlist_contains_keys_read_by_config() {
        assert!(GENERATED_FANOUT_ENV_ALLOWLIST.contains(&"FANOUT_CATALOG_URL"));
        assert!(GENERATED_FANOUT_ENV_ALLOWLIST.contains(&"FANOUT_HOME"));
        assert!(GENERATED_FANOUT_ENV_ALLOWLIST.contains(&"FANOUT_RETRY_BACKOFF"));
    }

    #[test]
    fn allowlist_holds_only_whole_identifiers() {
        assert!(!GENERATED_FANOUT_ENV_ALLOWLIST.contains(&"FANOUT_"));
        assert!(
            !GENERATED_FANOUT_ENV_ALLOWLIST
                .iter()
                .any(|key| "GENERATED_FANOUT_ENV_ALLOWLIST".ends_with(key))
        );
        assert!(GENERATED_FANOUT_ENV_ALLOWLIST.windows(2).all(|w| w[0] < w[1]));
    }
}
