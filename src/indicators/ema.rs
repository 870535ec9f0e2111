// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = (close_t - EMA_{t-1}) * multiplier + EMA_{t-1}
//
// The first EMA value is seeded with the SMA of the first `period` closes.
// Fewer than `period` closes leaves the EMA undefined, reported as 0.
// =============================================================================

use crate::market_data::Candle;

use super::closes;

/// Aligned EMA series: one value per close, `0.0` where fewer than `period`
/// closes are available.
///
/// `ema_series(closes, p)[i]` is exactly the EMA of `closes[..=i]`: the seed
/// and recurrence run in the same order a fresh evaluation of that prefix
/// would use.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }

    let mut sum = 0.0;
    for &close in &closes[..period] {
        sum += close;
    }
    let mut ema = sum / period as f64;
    out[period - 1] = ema;

    let multiplier = 2.0 / (period + 1) as f64;
    for (i, &close) in closes.iter().enumerate().skip(period) {
        ema = (close - ema) * multiplier + ema;
        out[i] = ema;
    }

    out
}

/// EMA of the candles' closes; `0.0` when fewer than `period` candles.
pub fn calculate_ema(candles: &[Candle], period: usize) -> f64 {
    ema_series(&closes(candles), period)
        .last()
        .copied()
        .unwrap_or(0.0)
}
