// =============================================================================
// Average True Range (ATR) with Wilder smoothing
// =============================================================================
//
// True Range (TR) for bar i (i >= 1):
//   TR_i = max(high_i - low_i, |high_i - close_{i-1}|, |low_i - close_{i-1}|)
//
// Seed: ATR = mean(TR_1 ..= TR_period)
// Then: ATR = (ATR * (period - 1) + TR_i) / period
//
// Needs more than `period` candles, otherwise 0.
// =============================================================================

use crate::market_data::Candle;

fn true_range(current: &Candle, prev_close: f64) -> f64 {
    let hl = current.high - current.low;
    let hc = (current.high - prev_close).abs();
    let lc = (current.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// ATR over `candles` for the given `period`.
pub fn calculate_atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() <= period {
        return 0.0;
    }

    let trs: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    // trs[k] is the TR of candle k + 1.
    let p = period as f64;
    let mut atr = trs[..period].iter().sum::<f64>() / p;
    for &tr in &trs[period..] {
        atr = (atr * (p - 1.0) + tr) / p;
    }
    atr
}
