use thiserror::Error;

use crate::binance::BinanceError;

/// Failures on the synchronous acquisition paths: discovery, the fallback
/// pull, and snapshot assembly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketDataError {
    #[error("failed to fetch {interval} klines for {symbol}: {source}")]
    Fetch {
        symbol: String,
        interval: String,
        source: BinanceError,
    },

    #[error("symbol discovery failed: {0}")]
    Discovery(#[source] BinanceError),

    #[error("no {interval} candles available for {symbol}")]
    EmptySeries { symbol: String, interval: String },
}

impl MarketDataError {
    /// Interval named by the error, if any.
    pub fn interval(&self) -> Option<&str> {
        match self {
            Self::Fetch { interval, .. } | Self::EmptySeries { interval, .. } => Some(interval),
            Self::Discovery(_) => None,
        }
    }
}
