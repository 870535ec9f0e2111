// =============================================================================
// Kline stream router — decodes pushed kline events into the candle cache
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::candle_buffer::{Candle, CandleBuffer, CandleKey};

/// Kline event payload as pushed by the futures stream.
///
/// Only the bar start time is mandatory; every numeric field is kept as a raw
/// JSON value and parsed best-effort so that one malformed number does not
/// discard the whole update.
#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "s", default)]
    symbol: Option<String>,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "T", default)]
    close_time: Option<i64>,
    #[serde(rename = "s", default)]
    symbol: Option<String>,
    #[serde(rename = "i", default)]
    interval: Option<String>,
    #[serde(rename = "o", default)]
    open: Value,
    #[serde(rename = "h", default)]
    high: Value,
    #[serde(rename = "l", default)]
    low: Value,
    #[serde(rename = "c", default)]
    close: Value,
    #[serde(rename = "v", default)]
    volume: Value,
    #[serde(rename = "q", default)]
    quote_volume: Value,
    #[serde(rename = "n", default)]
    trades: Value,
    #[serde(rename = "V", default)]
    taker_buy_volume: Value,
    #[serde(rename = "Q", default)]
    taker_buy_quote_volume: Value,
}

/// A decoded kline update ready to be upserted.
#[derive(Debug, Clone)]
pub struct KlineUpdate {
    pub key: CandleKey,
    pub candle: Candle,
}

/// Parse a JSON value that may be a decimal string or a number. Anything else
/// (missing, null, garbage) yields `0.0`.
pub fn lossy_f64(val: &Value) -> f64 {
    match val {
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn lossy_u64(val: &Value) -> u64 {
    match val {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

/// Decode one kline message for the stream of `fallback` (symbol, interval).
///
/// Both the combined-stream envelope `{ "stream": .., "data": { .. } }` and
/// the bare event are accepted. The key is taken from the symbol and
/// interval the event declares, falling back to the subscription's own.
pub fn decode_kline_message(text: &str, fallback: &CandleKey) -> Result<KlineUpdate> {
    let mut root: Value = serde_json::from_str(text).context("failed to parse kline JSON")?;
    let data = if root.get("data").is_some() {
        root["data"].take()
    } else {
        root
    };
    let event: KlineEvent =
        serde_json::from_value(data).context("message is not a kline event")?;
    let k = event.kline;

    let symbol = event
        .symbol
        .or(k.symbol)
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| fallback.symbol.clone());
    let interval = k.interval.unwrap_or_else(|| fallback.interval.clone());

    let candle = Candle {
        open_time: k.start_time,
        close_time: k.close_time.unwrap_or(0),
        open: lossy_f64(&k.open),
        high: lossy_f64(&k.high),
        low: lossy_f64(&k.low),
        close: lossy_f64(&k.close),
        volume: lossy_f64(&k.volume),
        quote_volume: lossy_f64(&k.quote_volume),
        trades_count: lossy_u64(&k.trades),
        taker_buy_volume: lossy_f64(&k.taker_buy_volume),
        taker_buy_quote_volume: lossy_f64(&k.taker_buy_quote_volume),
    };

    Ok(KlineUpdate {
        key: CandleKey { symbol, interval },
        candle,
    })
}

/// Consume one subscription's delivery queue until it is closed, upserting
/// every decodable update into `buffer`.
///
/// Returns the number of updates applied.
pub async fn run_stream_reader(
    key: CandleKey,
    mut rx: mpsc::Receiver<String>,
    buffer: Arc<CandleBuffer>,
) -> u64 {
    debug!(key = %key, "kline reader started");
    let mut applied = 0_u64;

    while let Some(text) = rx.recv().await {
        match decode_kline_message(&text, &key) {
            Ok(update) => {
                buffer.upsert(&update.key, update.candle);
                applied += 1;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable kline message");
            }
        }
    }

    info!(key = %key, applied, "kline delivery queue closed, reader exiting");
    applied
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
