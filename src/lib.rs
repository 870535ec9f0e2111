// =============================================================================
// perp-pulse: dual-mode Binance futures candle cache and indicator snapshots
// =============================================================================

pub mod acquisition;
pub mod binance;
pub mod futures_intel;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
pub mod snapshot;
pub mod types;

#[cfg(test)]
mod testing;

pub use acquisition::{MarketDataController, MarketDataError};
pub use snapshot::{assemble_snapshot, MarketSnapshot};
pub use types::{normalize_symbol, AcquisitionMode};
