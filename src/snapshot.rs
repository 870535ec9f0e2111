// =============================================================================
// Market snapshot — one immutable indicator view per symbol
// =============================================================================
//
// Composition:
//   3m   current price / EMA20 / MACD / RSI7, 1h price change, series
//   15m  series
//   1h   series
//   4h   4h price change, EMA20/EMA50, ATR3/ATR14, volume context, series
// plus best-effort open interest and funding rate.
//
// Any candle fetch failure aborts the snapshot with the failing interval
// named; enrichment failures only zero their own fields.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::acquisition::{MarketDataController, MarketDataError};
use crate::futures_intel::{fetch_funding_rate, fetch_open_interest_summary, OpenInterestSummary};
use crate::indicators::{build_series, calculate_atr, calculate_ema, calculate_macd, calculate_rsi, IndicatorSeries};
use crate::market_data::Candle;
use crate::types::{normalize_symbol, SERIES_WINDOW};

/// 3m bars between the current close and the "one hour ago" close.
const ONE_HOUR_OFFSET_3M: usize = 20;

/// Single-value summary of the 4h timeframe plus its series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongerTermContext {
    pub ema20: f64,
    pub ema50: f64,
    pub atr3: f64,
    pub atr14: f64,
    /// Volume of the newest candle.
    pub current_volume: f64,
    /// Mean volume over every cached candle.
    pub average_volume: f64,
    pub series: IndicatorSeries,
}

impl LongerTermContext {
    pub fn from_candles(candles: &[Candle]) -> Self {
        let (current_volume, average_volume) = match candles.last() {
            Some(last) => (
                last.volume,
                candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64,
            ),
            None => (0.0, 0.0),
        };

        Self {
            ema20: calculate_ema(candles, 20),
            ema50: calculate_ema(candles, 50),
            atr3: calculate_atr(candles, 3),
            atr14: calculate_atr(candles, 14),
            current_volume,
            average_volume,
            series: build_series(candles, SERIES_WINDOW),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub current_price: f64,
    pub current_ema20: f64,
    pub current_macd: f64,
    pub current_rsi7: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,
    pub open_interest: OpenInterestSummary,
    pub funding_rate: f64,
    pub intraday_series: IndicatorSeries,
    pub series_15m: IndicatorSeries,
    pub series_1h: IndicatorSeries,
    pub longer_term: LongerTermContext,
}

/// Candle sequences for every tracked interval of one symbol.
#[derive(Debug, Clone, Default)]
pub struct TimeframeCandles {
    pub m3: Vec<Candle>,
    pub m15: Vec<Candle>,
    pub h1: Vec<Candle>,
    pub h4: Vec<Candle>,
}

/// `(current - reference) / reference * 100`, or 0 for a non-positive reference.
pub fn percent_change(current: f64, reference: f64) -> f64 {
    if reference > 0.0 {
        (current - reference) / reference * 100.0
    } else {
        0.0
    }
}

/// Change against the close 20 bars back on the 3m series; needs 21 bars.
///
/// Twenty 3m bars is one hour only when the series has no gaps.
pub fn price_change_1h(candles_3m: &[Candle]) -> f64 {
    let n = candles_3m.len();
    if n <= ONE_HOUR_OFFSET_3M {
        return 0.0;
    }
    percent_change(candles_3m[n - 1].close, candles_3m[n - 1 - ONE_HOUR_OFFSET_3M].close)
}

/// Change of `current_price` against the previous 4h bar's close; needs 2 bars.
pub fn price_change_4h(current_price: f64, candles_4h: &[Candle]) -> f64 {
    let n = candles_4h.len();
    if n < 2 {
        return 0.0;
    }
    percent_change(current_price, candles_4h[n - 2].close)
}

impl MarketSnapshot {
    /// Pure composition from already fetched inputs.
    pub fn compose(
        symbol: &str,
        candles: &TimeframeCandles,
        open_interest: OpenInterestSummary,
        funding_rate: f64,
    ) -> Result<Self, MarketDataError> {
        let Some(latest) = candles.m3.last() else {
            return Err(MarketDataError::EmptySeries {
                symbol: symbol.to_string(),
                interval: "3m".to_string(),
            });
        };
        let current_price = latest.close;

        Ok(Self {
            symbol: symbol.to_string(),
            generated_at: Utc::now(),
            current_price,
            current_ema20: calculate_ema(&candles.m3, 20),
            current_macd: calculate_macd(&candles.m3),
            current_rsi7: calculate_rsi(&candles.m3, 7),
            price_change_1h: price_change_1h(&candles.m3),
            price_change_4h: price_change_4h(current_price, &candles.h4),
            open_interest,
            funding_rate,
            intraday_series: build_series(&candles.m3, SERIES_WINDOW),
            series_15m: build_series(&candles.m15, SERIES_WINDOW),
            series_1h: build_series(&candles.h1, SERIES_WINDOW),
            longer_term: LongerTermContext::from_candles(&candles.h4),
        })
    }
}

/// Fetch everything for `symbol` and compose its snapshot.
#[instrument(skip(controller), name = "snapshot::assemble")]
pub async fn assemble_snapshot(
    controller: &MarketDataController,
    symbol: &str,
) -> Result<MarketSnapshot, MarketDataError> {
    let symbol = normalize_symbol(symbol);

    let candles = TimeframeCandles {
        m3: controller.get_current_candles(&symbol, "3m").await?,
        m15: controller.get_current_candles(&symbol, "15m").await?,
        h1: controller.get_current_candles(&symbol, "1h").await?,
        h4: controller.get_current_candles(&symbol, "4h").await?,
    };

    let client = controller.client();
    let open_interest = fetch_open_interest_summary(client, &symbol).await;
    let funding_rate = fetch_funding_rate(client, &symbol).await;

    let snapshot = MarketSnapshot::compose(&symbol, &candles, open_interest, funding_rate)?;
    debug!(
        symbol = %snapshot.symbol,
        price = snapshot.current_price,
        rsi7 = snapshot.current_rsi7,
        "snapshot assembled"
    );
    Ok(snapshot)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::BinanceClient;
    use crate::indicators::test_candles;
    use crate::runtime_config::RuntimeConfig;
    use crate::testing::{klines_body, FakeStreamClient, FakeTransport};
    use std::sync::Arc;

    fn controller(transport: &Arc<FakeTransport>) -> MarketDataController {
        let client = Arc::new(BinanceClient::new("https://fapi.test", transport.clone()));
        MarketDataController::new(
            RuntimeConfig::default(),
            client,
            Arc::new(FakeStreamClient::new()),
        )
    }

    fn ramp(n: usize, start: f64) -> Vec<f64> {
        (0..n).map(|i| start + i as f64).collect()
    }

    #[test]
    fn one_hour_change_needs_21_bars() {
        let candles = test_candles(&ramp(20, 100.0));
        assert_eq!(price_change_1h(&candles), 0.0);

        let candles = test_candles(&ramp(21, 100.0));
        // 120 vs 100
        assert!((price_change_1h(&candles) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn four_hour_change_uses_previous_bar() {
        assert_eq!(price_change_4h(110.0, &test_candles(&[100.0])), 0.0);
        let h4 = test_candles(&[80.0, 100.0, 105.0]);
        assert!((price_change_4h(110.0, &h4) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn non_positive_reference_gives_zero() {
        assert_eq!(percent_change(10.0, 0.0), 0.0);
        assert_eq!(percent_change(10.0, -5.0), 0.0);
        assert_eq!(price_change_4h(60.0, &test_candles(&[0.0, 50.0])), 0.0);
    }

    #[test]
    fn longer_term_context_volumes() {
        let mut candles = test_candles(&ramp(60, 10.0));
        for (i, c) in candles.iter_mut().enumerate() {
            c.volume = (i + 1) as f64;
        }

        let ctx = LongerTermContext::from_candles(&candles);

        assert_eq!(ctx.current_volume, 60.0);
        assert!((ctx.average_volume - 30.5).abs() < 1e-9);
        assert!(ctx.ema50 > 0.0);
        assert!((ctx.atr3 - 2.0).abs() < 1e-9);
        assert_eq!(ctx.series.len(), 20);
    }

    #[test]
    fn longer_term_context_empty() {
        let ctx = LongerTermContext::from_candles(&[]);
        assert_eq!(ctx, LongerTermContext::default());
    }

    #[test]
    fn empty_intraday_series_is_an_error() {
        let candles = TimeframeCandles::default();
        let err = MarketSnapshot::compose("BTCUSDT", &candles, OpenInterestSummary::default(), 0.0)
            .unwrap_err();
        assert_eq!(err.interval(), Some("3m"));
    }

    #[test]
    fn compose_uses_3m_for_current_values() {
        let candles = TimeframeCandles {
            m3: test_candles(&ramp(40, 100.0)),
            m15: test_candles(&ramp(10, 50.0)),
            h1: test_candles(&ramp(30, 20.0)),
            h4: test_candles(&[130.0, 135.0]),
        };

        let snap = MarketSnapshot::compose("BTCUSDT", &candles, OpenInterestSummary::default(), 1e-4)
            .unwrap();

        assert_eq!(snap.current_price, 139.0);
        assert_eq!(snap.current_ema20, calculate_ema(&candles.m3, 20));
        assert_eq!(snap.current_rsi7, 100.0);
        assert!((snap.price_change_4h - 6.923076923076923).abs() < 1e-9);
        assert_eq!(snap.intraday_series.len(), 20);
        assert_eq!(snap.series_15m.len(), 10);
        assert_eq!(snap.series_1h.len(), 20);
        assert_eq!(snap.longer_term.series.len(), 2);
        assert_eq!(snap.funding_rate, 1e-4);
    }

    #[tokio::test]
    async fn assemble_with_enrichment() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/fapi/v1/klines", 200, klines_body(0, &ramp(30, 100.0)));
        transport.route("/fapi/v1/openInterest", 200, r#"{"openInterest":"200"}"#);
        transport.route(
            "/futures/data/openInterestHist",
            200,
            r#"[{"sumOpenInterest":"150"},{"sumOpenInterest":"100"}]"#,
        );
        transport.route("/fapi/v1/premiumIndex", 200, r#"{"lastFundingRate":"0.0003"}"#);
        let controller = controller(&transport);

        let snap = assemble_snapshot(&controller, "btc").await.unwrap();

        assert_eq!(snap.symbol, "BTCUSDT");
        assert_eq!(snap.current_price, 129.0);
        assert!((snap.price_change_1h - (129.0 - 109.0) / 109.0 * 100.0).abs() < 1e-9);
        assert_eq!(snap.open_interest.latest, 200.0);
        assert_eq!(snap.open_interest.average, 125.0);
        assert!((snap.open_interest.delta_percent - 100.0).abs() < 1e-9);
        assert!((snap.funding_rate - 0.0003).abs() < 1e-12);
        assert_eq!(transport.call_count("/fapi/v1/klines"), 4);

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["generated_at"].is_string());
        assert_eq!(json["intraday_series"]["mid_prices"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn enrichment_failures_do_not_abort() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/fapi/v1/klines", 200, klines_body(0, &ramp(5, 10.0)));
        let controller = controller(&transport);

        let snap = assemble_snapshot(&controller, "ETHUSDT").await.unwrap();

        assert_eq!(snap.open_interest, OpenInterestSummary::default());
        assert_eq!(snap.funding_rate, 0.0);
        assert_eq!(snap.price_change_1h, 0.0);
    }

    #[tokio::test]
    async fn failing_timeframe_aborts_with_its_name() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/fapi/v1/klines", 200, klines_body(0, &ramp(5, 10.0)));
        transport.route("interval=1h", 500, "down");
        let controller = controller(&transport);

        let err = assemble_snapshot(&controller, "ETH").await.unwrap_err();

        assert_eq!(err.interval(), Some("1h"));
        assert!(err.to_string().contains("1h"));
    }
}
