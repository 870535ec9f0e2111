// =============================================================================
// Shared types and fixed constants used across the market data core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Kline intervals tracked for every symbol, shortest first.
pub const TRACKED_INTERVALS: [&str; 4] = ["3m", "15m", "1h", "4h"];

/// Candles pulled per (symbol, interval) during backfill and fallback pulls.
pub const BACKFILL_DEPTH: u32 = 100;

/// Maximum candles retained per (symbol, interval) cache entry.
pub const CACHE_CAPACITY: usize = 100;

/// Trailing window used by the indicator series builder.
pub const SERIES_WINDOW: usize = 20;

/// Symbol tasks allowed to run concurrently during backfill.
pub const BACKFILL_CONCURRENCY: usize = 5;

/// Delivery queue depth for each stream subscriber.
pub const SUBSCRIBER_BUFFER: usize = 100;

/// Quote currency every tracked symbol is margined in.
pub const QUOTE_ASSET: &str = "USDT";

/// Whether live push data is feeding the cache or every miss falls back to a
/// REST pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    Disabled,
    Live,
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        Self::Disabled
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Normalise a user-supplied symbol to the exchange form: uppercase with the
/// quote asset suffix (`"btc"` => `"BTCUSDT"`).
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if upper.ends_with(QUOTE_ASSET) {
        upper
    } else {
        format!("{upper}{QUOTE_ASSET}")
    }
}

/// Combined-stream name for a kline subscription, e.g. `btcusdt@kline_3m`.
pub fn kline_stream_name(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}
