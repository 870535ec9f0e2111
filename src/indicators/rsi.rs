// =============================================================================
// Relative Strength Index (RSI) with Wilder smoothing
// =============================================================================
//
// Seed (bars 1..=period):
//   avg_gain = sum(gains) / period
//   avg_loss = sum(losses) / period
//
// Every later bar:
//   change > 0 : avg_gain = (avg_gain * (period-1) + change) / period
//                avg_loss = (avg_loss * (period-1)) / period
//   otherwise  : avg_gain = (avg_gain * (period-1)) / period
//                avg_loss = (avg_loss * (period-1) - change) / period
//
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss),  100 when avg_loss == 0
//
// At least `period + 1` closes are needed; anything shorter reads as 0.
// =============================================================================

use crate::market_data::Candle;

use super::closes;

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Aligned RSI series. Index `i` holds the RSI of `closes[..=i]`, or `0.0`
/// while `i < period`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let p = period as f64;
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain = (avg_gain * (p - 1.0) + change) / p;
            avg_loss = (avg_loss * (p - 1.0)) / p;
        } else {
            avg_gain = (avg_gain * (p - 1.0)) / p;
            avg_loss = (avg_loss * (p - 1.0) + (-change)) / p;
        }
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

/// RSI of the candles' closes; `0.0` with `period` or fewer candles.
pub fn calculate_rsi(candles: &[Candle], period: usize) -> f64 {
    rsi_series(&closes(candles), period)
        .last()
        .copied()
        .unwrap_or(0.0)
}
