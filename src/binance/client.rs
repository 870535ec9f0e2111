// =============================================================================
// Binance USDⓈ-M Futures REST Client — public market data endpoints
// =============================================================================
//
// Every call goes through the injected `HttpTransport`. Responses are checked
// in a fixed order:
//   1. non-success status => structured `{code, msg}` or raw status + body
//   2. success status     => JSON shape must match the endpoint (array/object)
//   3. individual records that fail to parse are skipped, never the batch
// =============================================================================

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::error::{ApiErrorBody, BinanceError};
use super::rate_limit::WeightTracker;
use super::transport::{HttpResponse, HttpTransport};
use crate::market_data::kline_stream::lossy_f64;
use crate::market_data::Candle;

/// Production futures REST endpoint.
pub const FUTURES_BASE_URL: &str = "https://fapi.binance.com";

/// Minimum positional fields in a kline record.
const KLINE_FIELDS: usize = 11;

/// Contract metadata used for symbol discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub contract_type: String,
}

impl SymbolInfo {
    /// Actively trading USDT-margined perpetual.
    pub fn is_active_usdt_perpetual(&self) -> bool {
        self.status == "TRADING"
            && self.contract_type == "PERPETUAL"
            && self.symbol.to_uppercase().ends_with("USDT")
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

/// One hourly open-interest history sample. Values arrive as decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestHistEntry {
    #[serde(default)]
    pub sum_open_interest: Value,
    #[serde(default)]
    pub sum_open_interest_value: Value,
    #[serde(default)]
    pub timestamp: i64,
}

impl OpenInterestHistEntry {
    /// Parsed open interest, `None` when absent or not a number.
    pub fn open_interest(&self) -> Option<f64> {
        match &self.sum_open_interest {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// Mark price and funding details from `premiumIndex`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PremiumIndex {
    pub symbol: String,
    pub mark_price: f64,
    pub index_price: f64,
    pub last_funding_rate: f64,
    pub next_funding_time: i64,
}

/// Public futures market data client.
pub struct BinanceClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    weights: WeightTracker,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(base_url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "BinanceClient initialised");
        Self {
            base_url,
            transport,
            weights: WeightTracker::new(),
        }
    }

    pub fn weights(&self) -> &WeightTracker {
        &self.weights
    }

    // -------------------------------------------------------------------------
    // Endpoints
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/exchangeInfo — contract metadata for every symbol.
    #[instrument(skip(self), name = "binance::get_exchange_info")]
    pub async fn get_exchange_info(&self) -> Result<Vec<SymbolInfo>, BinanceError> {
        let (value, _) = self.get_object("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo =
            serde_json::from_value(value).map_err(|e| BinanceError::Decode {
                what: "exchange info",
                reason: e.to_string(),
            })?;
        debug!(count = info.symbols.len(), "exchange info retrieved");
        Ok(info.symbols)
    }

    /// GET /fapi/v1/klines — up to `limit` most recent candles, oldest first.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
    ///   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, BinanceError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let (records, _) = self.get_array("/fapi/v1/klines", &query).await?;

        let mut candles = Vec::with_capacity(records.len());
        for record in &records {
            match parse_kline_record(record) {
                Ok(candle) => candles.push(candle),
                Err(reason) => warn!(symbol, interval, reason = %reason, "skipping malformed kline record"),
            }
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// GET /fapi/v1/ticker/price — last traded price.
    #[instrument(skip(self), name = "binance::get_current_price")]
    pub async fn get_current_price(&self, symbol: &str) -> Result<f64, BinanceError> {
        let (value, _) = self
            .get_object("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        let raw = value.get("price").cloned().unwrap_or(Value::Null);
        match &raw {
            Value::String(s) => s.parse::<f64>().map_err(|e| BinanceError::Decode {
                what: "ticker price",
                reason: format!("'{s}': {e}"),
            }),
            Value::Number(n) => n.as_f64().ok_or(BinanceError::Decode {
                what: "ticker price",
                reason: n.to_string(),
            }),
            _ => Err(BinanceError::Decode {
                what: "ticker price",
                reason: "missing field price".to_string(),
            }),
        }
    }

    /// GET /fapi/v1/openInterest — current open interest in contracts.
    #[instrument(skip(self), name = "binance::get_open_interest")]
    pub async fn get_open_interest(&self, symbol: &str) -> Result<f64, BinanceError> {
        let (value, _) = self
            .get_object("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await?;
        Ok(value.get("openInterest").map(lossy_f64).unwrap_or(0.0))
    }

    /// GET /futures/data/openInterestHist — trailing open-interest samples.
    #[instrument(skip(self), name = "binance::get_open_interest_hist")]
    pub async fn get_open_interest_hist(
        &self,
        symbol: &str,
        period: &str,
        limit: u32,
    ) -> Result<Vec<OpenInterestHistEntry>, BinanceError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("period", period.to_string()),
            ("limit", limit.to_string()),
        ];
        let (records, _) = self.get_array("/futures/data/openInterestHist", &query).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect())
    }

    /// GET /fapi/v1/premiumIndex — mark price and last funding rate.
    #[instrument(skip(self), name = "binance::get_premium_index")]
    pub async fn get_premium_index(&self, symbol: &str) -> Result<PremiumIndex, BinanceError> {
        let (value, _) = self
            .get_object("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await?;
        let field = |name: &str| value.get(name).map(lossy_f64).unwrap_or(0.0);
        Ok(PremiumIndex {
            symbol: value
                .get("symbol")
                .and_then(Value::as_str)
                .unwrap_or(symbol)
                .to_string(),
            mark_price: field("markPrice"),
            index_price: field("indexPrice"),
            last_funding_rate: field("lastFundingRate"),
            next_funding_time: value
                .get("nextFundingTime")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        })
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Full request URL with form-encoded query values.
    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<String, BinanceError> {
        let raw = format!("{}{}", self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query.iter().map(|(k, v)| (*k, v.as_str())))
        };
        parsed
            .map(String::from)
            .map_err(|e| BinanceError::transport(format!("invalid request URL {raw}: {e}"), false))
    }

    /// Perform the request and return the JSON body of a success response.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(Value, HttpResponse), BinanceError> {
        let url = self.url(path, query)?;
        let resp = self.transport.execute(&url).await?;
        self.weights.update_from_headers(&resp.headers);

        if !resp.is_success() {
            return Err(match ApiErrorBody::parse(&resp.body) {
                Some(err) => err.into_error(),
                None => BinanceError::Status {
                    status: resp.status,
                    body: resp.body,
                },
            });
        }

        let value: Value = serde_json::from_str(&resp.body).map_err(|_| {
            BinanceError::UnexpectedShape {
                expected: "JSON",
                body: resp.body.clone(),
            }
        })?;
        Ok((value, resp))
    }

    async fn get_array(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<Value>, HttpResponse), BinanceError> {
        let (value, resp) = self.get_json(path, query).await?;
        match value {
            Value::Array(items) => Ok((items, resp)),
            other => Err(shape_error(&other, "array", resp.body)),
        }
    }

    async fn get_object(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(Value, HttpResponse), BinanceError> {
        let (value, resp) = self.get_json(path, query).await?;
        if !value.is_object() {
            return Err(shape_error(&value, "object", resp.body));
        }
        if let Some(err) = embedded_api_error(&value) {
            return Err(err);
        }
        Ok((value, resp))
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("weights", &self.weights)
            .finish()
    }
}

/// A `{code, msg}` object delivered with a success status.
fn embedded_api_error(value: &Value) -> Option<BinanceError> {
    let code = value.get("code")?.as_i64()?;
    let msg = value.get("msg")?.as_str()?;
    Some(BinanceError::Api {
        code,
        msg: msg.to_string(),
    })
}

fn shape_error(value: &Value, expected: &'static str, body: String) -> BinanceError {
    embedded_api_error(value).unwrap_or(BinanceError::UnexpectedShape { expected, body })
}

/// Decode one positional kline record.
fn parse_kline_record(record: &Value) -> Result<Candle, String> {
    let arr = record.as_array().ok_or("kline record is not an array")?;
    if arr.len() < KLINE_FIELDS {
        return Err(format!("kline record has {} fields, need {KLINE_FIELDS}", arr.len()));
    }

    let millis = |v: &Value| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64));
    let open_time = millis(&arr[0]).ok_or("kline open time is not a number")?;

    Ok(Candle {
        open_time,
        close_time: millis(&arr[6]).unwrap_or(0),
        open: lossy_f64(&arr[1]),
        high: lossy_f64(&arr[2]),
        low: lossy_f64(&arr[3]),
        close: lossy_f64(&arr[4]),
        volume: lossy_f64(&arr[5]),
        quote_volume: lossy_f64(&arr[7]),
        trades_count: arr[8].as_u64().unwrap_or(0),
        taker_buy_volume: lossy_f64(&arr[9]),
        taker_buy_quote_volume: lossy_f64(&arr[10]),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
