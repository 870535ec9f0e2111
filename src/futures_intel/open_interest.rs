// =============================================================================
// Open Interest summary: latest, 24h average, and change vs. 24h ago
// =============================================================================
//
// Open Interest (OI) is the number of outstanding contracts. The summary pairs
// the live value from `/fapi/v1/openInterest` with 24 hourly samples from
// `/futures/data/openInterestHist`:
//
//   average       = mean of samples that parse to a positive value
//   delta_percent = (latest - earliest) / earliest * 100
//
// The history is treated as newest-first, so the earliest sample is the last
// element; if that one is unusable the first element stands in. Without usable
// history the average is the latest value and the delta stays 0.

use serde::Serialize;
use tracing::{debug, warn};

use crate::binance::{BinanceClient, OpenInterestHistEntry};

/// Sampling period of the history request.
pub const HISTORY_PERIOD: &str = "1h";
/// Samples requested (24 hours at 1h).
pub const HISTORY_LIMIT: u32 = 24;

/// Open-interest figures attached to a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpenInterestSummary {
    /// Current open interest in contracts.
    pub latest: f64,
    /// Mean of the valid hourly samples, or `latest` without history.
    pub average: f64,
    /// Percent change from the earliest sample to `latest`.
    pub delta_percent: f64,
}

impl OpenInterestSummary {
    /// Combine the live value with whatever history is available.
    pub fn from_history(latest: f64, history: &[OpenInterestHistEntry]) -> Self {
        let valid: Vec<f64> = history
            .iter()
            .filter_map(OpenInterestHistEntry::open_interest)
            .filter(|oi| *oi > 0.0)
            .collect();

        if valid.is_empty() {
            return Self {
                latest,
                average: latest,
                delta_percent: 0.0,
            };
        }

        let average = valid.iter().sum::<f64>() / valid.len() as f64;
        let positive = |e: &OpenInterestHistEntry| e.open_interest().filter(|oi| *oi > 0.0);
        let earliest = history
            .last()
            .and_then(positive)
            .or_else(|| history.first().and_then(positive));

        let delta_percent = match earliest {
            Some(base) => (latest - base) / base * 100.0,
            None => 0.0,
        };

        Self {
            latest,
            average,
            delta_percent,
        }
    }
}

/// Best-effort summary for `symbol`. A failed live fetch yields all zeros; a
/// failed history fetch degrades to `average == latest`, `delta_percent == 0`.
pub async fn fetch_open_interest_summary(client: &BinanceClient, symbol: &str) -> OpenInterestSummary {
    let latest = match client.get_open_interest(symbol).await {
        Ok(oi) => oi,
        Err(e) => {
            warn!(symbol, error = %e, "open interest unavailable");
            return OpenInterestSummary::default();
        }
    };

    let history = match client
        .get_open_interest_hist(symbol, HISTORY_PERIOD, HISTORY_LIMIT)
        .await
    {
        Ok(history) => history,
        Err(e) => {
            debug!(symbol, error = %e, "open interest history unavailable");
            Vec::new()
        }
    };

    let summary = OpenInterestSummary::from_history(latest, &history);
    debug!(
        symbol,
        latest = summary.latest,
        average = summary.average,
        delta_percent = summary.delta_percent,
        samples = history.len(),
        "open interest summary"
    );
    summary
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use std::sync::Arc;

    fn client(transport: &Arc<FakeTransport>) -> BinanceClient {
        BinanceClient::new("https://fapi.test", transport.clone())
    }

    fn hist_body(values: &[&str]) -> String {
        let items: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                format!(r#"{{"symbol":"BTCUSDT","sumOpenInterest":"{v}","sumOpenInterestValue":"0","timestamp":{i}}}"#)
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[tokio::test]
    async fn history_failure_keeps_latest_as_average() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/fapi/v1/openInterest", 200, r#"{"openInterest":"1500.0","symbol":"BTCUSDT"}"#);
        transport.route("/futures/data/openInterestHist", 500, "boom");

        let summary = fetch_open_interest_summary(&client(&transport), "BTCUSDT").await;

        assert_eq!(summary.latest, 1500.0);
        assert_eq!(summary.average, 1500.0);
        assert_eq!(summary.delta_percent, 0.0);
    }

    #[tokio::test]
    async fn live_failure_zeroes_everything() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/futures/data/openInterestHist", 200, hist_body(&["10"]));

        let summary = fetch_open_interest_summary(&client(&transport), "BTCUSDT").await;

        assert_eq!(summary, OpenInterestSummary::default());
    }

    #[tokio::test]
    async fn average_and_delta_from_history() {
        let transport = Arc::new(FakeTransport::new());
        transport.route("/fapi/v1/openInterest", 200, r#"{"openInterest":"120"}"#);
        // Newest first: the earliest sample (100) is last.
        transport.route("/futures/data/openInterestHist", 200, hist_body(&["110", "90", "100"]));

        let summary = fetch_open_interest_summary(&client(&transport), "BTCUSDT").await;

        assert!((summary.average - 100.0).abs() < 1e-9);
        assert!((summary.delta_percent - 20.0).abs() < 1e-9);
        let calls = transport.calls();
        assert!(calls[1].ends_with("/futures/data/openInterestHist?symbol=BTCUSDT&period=1h&limit=24"));
    }

    #[test]
    fn invalid_samples_are_excluded() {
        let history: Vec<OpenInterestHistEntry> = serde_json::from_str(
            r#"[{"sumOpenInterest":"50"},{"sumOpenInterest":"junk"},{"sumOpenInterest":"0"},{"sumOpenInterest":"150"}]"#,
        )
        .unwrap();

        let summary = OpenInterestSummary::from_history(200.0, &history);

        assert!((summary.average - 100.0).abs() < 1e-9);
        assert!((summary.delta_percent - (200.0 - 150.0) / 150.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn unusable_earliest_falls_back_to_first() {
        let history: Vec<OpenInterestHistEntry> =
            serde_json::from_str(r#"[{"sumOpenInterest":"80"},{"sumOpenInterest":""}]"#).unwrap();

        let summary = OpenInterestSummary::from_history(100.0, &history);

        assert_eq!(summary.average, 80.0);
        assert!((summary.delta_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn no_valid_samples_degrades() {
        let history: Vec<OpenInterestHistEntry> =
            serde_json::from_str(r#"[{"sumOpenInterest":"x"},{"sumOpenInterest":"-1"}]"#).unwrap();

        let summary = OpenInterestSummary::from_history(42.0, &history);

        assert_eq!(summary.average, 42.0);
        assert_eq!(summary.delta_percent, 0.0);
    }
}
