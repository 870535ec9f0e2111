// =============================================================================
// MACD line: EMA(12) minus EMA(26) over the same closes
// =============================================================================

use crate::market_data::Candle;

use super::closes;
use super::ema::ema_series;

pub const FAST_PERIOD: usize = 12;
pub const SLOW_PERIOD: usize = 26;

/// Aligned MACD series, `0.0` until the slow EMA is defined.
pub fn macd_series(closes: &[f64]) -> Vec<f64> {
    let fast = ema_series(closes, FAST_PERIOD);
    let slow = ema_series(closes, SLOW_PERIOD);
    fast.iter()
        .zip(&slow)
        .enumerate()
        .map(|(i, (f, s))| if i + 1 >= SLOW_PERIOD { f - s } else { 0.0 })
        .collect()
}

/// MACD of the candles' closes; `0.0` with fewer than 26 candles.
pub fn calculate_macd(candles: &[Candle]) -> f64 {
    macd_series(&closes(candles)).last().copied().unwrap_or(0.0)
}
