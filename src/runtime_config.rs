// =============================================================================
// Runtime Configuration — market data service settings
// =============================================================================
//
// Loaded once at startup from a JSON file. Every field carries a serde default
// so a partial (or empty) file is valid; environment overrides are applied on
// top by `apply_env_overrides`.
//
// Backfill depth, cache capacity, series window and backfill concurrency are
// fixed constants in `types` and deliberately not configurable.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::binance::{FUTURES_BASE_URL, FUTURES_STREAM_URL};
use crate::types::{normalize_symbol, SUBSCRIBER_BUFFER};

/// Comma-separated symbol list replacing `symbols`.
pub const ENV_SYMBOLS: &str = "PULSE_SYMBOLS";
/// `true`/`false` (also `1`/`0`, `on`/`off`) replacing `streaming_enabled`.
pub const ENV_STREAMING: &str = "PULSE_STREAMING";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_rest_base_url() -> String {
    FUTURES_BASE_URL.to_string()
}

fn default_stream_url() -> String {
    FUTURES_STREAM_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_subscribe_batch_size() -> usize {
    200
}

fn default_subscriber_buffer() -> usize {
    SUBSCRIBER_BUFFER
}

fn default_background_task_limit() -> usize {
    16
}

fn default_report_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbol universe. Empty means every actively trading USDT perpetual.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Attempt the push stream at startup.
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Overall timeout of one REST request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Stream names per SUBSCRIBE request.
    #[serde(default = "default_subscribe_batch_size")]
    pub subscribe_batch_size: usize,

    /// Capacity of each stream's delivery queue.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Concurrent background subscription tasks.
    #[serde(default = "default_background_task_limit")]
    pub background_task_limit: usize,

    /// Symbols whose snapshot the binary logs periodically.
    #[serde(default = "default_report_symbols")]
    pub report_symbols: Vec<String>,

    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            streaming_enabled: true,
            rest_base_url: default_rest_base_url(),
            stream_url: default_stream_url(),
            request_timeout_secs: default_request_timeout_secs(),
            subscribe_batch_size: default_subscribe_batch_size(),
            subscriber_buffer: default_subscriber_buffer(),
            background_task_limit: default_background_task_limit(),
            report_symbols: default_report_symbols(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Errors when the file is missing or malformed so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            streaming_enabled = config.streaming_enabled,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `PULSE_SYMBOLS` / `PULSE_STREAMING` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_SYMBOLS).ok().as_deref(),
            std::env::var(ENV_STREAMING).ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, symbols: Option<&str>, streaming: Option<&str>) {
        if let Some(raw) = symbols {
            self.symbols = parse_symbol_list(raw);
            info!(symbols = ?self.symbols, "symbols overridden from {ENV_SYMBOLS}");
        }
        if let Some(raw) = streaming {
            match parse_flag(raw) {
                Some(flag) => {
                    self.streaming_enabled = flag;
                    info!(streaming_enabled = flag, "streaming overridden from {ENV_STREAMING}");
                }
                None => warn!(value = raw, "ignoring unrecognised {ENV_STREAMING}"),
            }
        }
    }

    /// Configured symbols, normalized and de-duplicated in order.
    pub fn normalized_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.symbols.len());
        for symbol in self.symbols.iter().filter(|s| !s.trim().is_empty()) {
            let normalized = normalize_symbol(symbol);
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        out
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
