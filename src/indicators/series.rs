// =============================================================================
// Windowed indicator series
// =============================================================================
//
// Point-in-time reconstruction over the trailing window of a candle sequence:
// every index carries the indicator value as it stood when that candle was the
// newest one, with 0 where that prefix is too short for the period.
// =============================================================================

use serde::Serialize;

use crate::market_data::Candle;

use super::closes;
use super::ema::ema_series;
use super::macd::macd_series;
use super::rsi::rsi_series;

/// Parallel per-candle sequences over one trailing window. Every field has
/// the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSeries {
    pub mid_prices: Vec<f64>,
    pub ema20_values: Vec<f64>,
    pub macd_values: Vec<f64>,
    pub rsi7_values: Vec<f64>,
    pub rsi14_values: Vec<f64>,
    pub volumes: Vec<f64>,
    pub buy_sell_ratios: Vec<f64>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.mid_prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mid_prices.is_empty()
    }
}

/// Share of the bar's volume bought by takers; 0.5 for a zero-volume bar.
pub fn buy_sell_ratio(candle: &Candle) -> f64 {
    if candle.volume > 0.0 {
        candle.taker_buy_volume / candle.volume
    } else {
        0.5
    }
}

/// Build the series for the last `window` candles (all of them if fewer).
pub fn build_series(candles: &[Candle], window: usize) -> IndicatorSeries {
    let start = candles.len().saturating_sub(window);
    let closes = closes(candles);

    // Full-length passes keep every value tied to its own prefix; only the
    // tail is kept.
    let ema20 = ema_series(&closes, 20);
    let macd = macd_series(&closes);
    let rsi7 = rsi_series(&closes, 7);
    let rsi14 = rsi_series(&closes, 14);

    let tail = &candles[start..];
    IndicatorSeries {
        mid_prices: closes[start..].to_vec(),
        ema20_values: ema20[start..].to_vec(),
        macd_values: macd[start..].to_vec(),
        rsi7_values: rsi7[start..].to_vec(),
        rsi14_values: rsi14[start..].to_vec(),
        volumes: tail.iter().map(|c| c.volume).collect(),
        buy_sell_ratios: tail.iter().map(buy_sell_ratio).collect(),
    }
}
