// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math over candle slices. Insufficient
// history is reported as 0 rather than an error so downstream series stay
// index-aligned.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod series;

pub use atr::calculate_atr;
pub use ema::{calculate_ema, ema_series};
pub use macd::{calculate_macd, macd_series};
pub use rsi::{calculate_rsi, rsi_series};
pub use series::{build_series, buy_sell_ratio, IndicatorSeries};

use crate::market_data::Candle;

pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Candles with the given closes, one 3m bar apart.
#[cfg(test)]
pub(crate) fn test_candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            open_time: i as i64 * 180_000,
            close_time: i as i64 * 180_000 + 179_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            taker_buy_volume: 5.0,
            ..Default::default()
        })
        .collect()
}
