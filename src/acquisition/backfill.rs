// =============================================================================
// Historical backfill — seed the candle cache over REST
// =============================================================================
//
// One task per symbol, at most `concurrency` running at once. Each task pulls
// every tracked interval in turn; a failed pull is logged and counted, never
// fatal. The caller waits for every task before the stream is opened.
// =============================================================================

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::binance::BinanceClient;
use crate::market_data::{CandleBuffer, CandleKey};
use crate::types::TRACKED_INTERVALS;

/// Outcome counts of one backfill run, per (symbol, interval) pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub loaded: usize,
    pub failed: usize,
}

impl BackfillReport {
    fn merge(&mut self, other: BackfillReport) {
        self.loaded += other.loaded;
        self.failed += other.failed;
    }
}

/// Pull up to `depth` candles for every symbol and tracked interval.
pub async fn backfill(
    client: Arc<BinanceClient>,
    buffer: Arc<CandleBuffer>,
    symbols: &[String],
    depth: u32,
    concurrency: usize,
) -> BackfillReport {
    info!(
        symbols = symbols.len(),
        intervals = TRACKED_INTERVALS.len(),
        depth,
        concurrency,
        "starting historical backfill"
    );

    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for symbol in symbols {
        let sem = sem.clone();
        let client = client.clone();
        let buffer = buffer.clone();
        let symbol = symbol.clone();
        tasks.spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return BackfillReport::default();
            };
            backfill_symbol(&client, &buffer, &symbol, depth).await
        });
    }

    let mut report = BackfillReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(r) => report.merge(r),
            Err(e) => {
                warn!(error = %e, "backfill task aborted");
                report.failed += TRACKED_INTERVALS.len();
            }
        }
    }

    info!(loaded = report.loaded, failed = report.failed, "historical backfill finished");
    report
}

async fn backfill_symbol(
    client: &BinanceClient,
    buffer: &CandleBuffer,
    symbol: &str,
    depth: u32,
) -> BackfillReport {
    let mut report = BackfillReport::default();
    for interval in TRACKED_INTERVALS {
        match client.get_klines(symbol, interval, depth).await {
            Ok(candles) => {
                let count = candles.len();
                buffer.upsert_many(&CandleKey::new(symbol, interval), candles);
                debug!(symbol, interval, count, "backfilled");
                report.loaded += 1;
            }
            Err(e) => {
                warn!(symbol, interval, error = %e, "backfill pull failed");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::error::BinanceError;
    use crate::binance::transport::{HttpResponse, HttpTransport};
    use crate::testing::{klines_body, FakeTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    /// Answers every klines request after a delay and records which symbols
    /// have work in flight: a symbol is active from its first request until
    /// its last tracked interval completes.
    #[derive(Default)]
    struct SlowTransport {
        active: Mutex<HashSet<String>>,
        completed: Mutex<HashMap<String, usize>>,
        peak: Mutex<usize>,
    }

    fn symbol_of(url: &str) -> String {
        url.split("symbol=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap_or_default()
            .to_string()
    }

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn execute(&self, url: &str) -> Result<HttpResponse, BinanceError> {
            let symbol = symbol_of(url);
            {
                let mut active = self.active.lock();
                active.insert(symbol.clone());
                let mut peak = self.peak.lock();
                *peak = (*peak).max(active.len());
            }

            tokio::time::sleep(Duration::from_millis(10)).await;

            let mut completed = self.completed.lock();
            let done = completed.entry(symbol.clone()).or_default();
            *done += 1;
            if *done == TRACKED_INTERVALS.len() {
                self.active.lock().remove(&symbol);
            }
            Ok(HttpResponse {
                status: 200,
                body: klines_body(0, &[1.0]),
                ..Default::default()
            })
        }
    }

    fn setup() -> (Arc<FakeTransport>, Arc<BinanceClient>, Arc<CandleBuffer>) {
        let transport = Arc::new(FakeTransport::new());
        let client = Arc::new(BinanceClient::new("https://fapi.test", transport.clone()));
        (transport, client, Arc::new(CandleBuffer::new(100)))
    }

    #[tokio::test]
    async fn loads_every_symbol_and_interval() {
        let (transport, client, buffer) = setup();
        transport.route("/fapi/v1/klines", 200, klines_body(0, &[1.0, 2.0, 3.0]));
        let symbols: Vec<String> = (0..12).map(|i| format!("S{i}USDT")).collect();

        let report = backfill(client, buffer.clone(), &symbols, 100, 5).await;

        assert_eq!(report, BackfillReport { loaded: 48, failed: 0 });
        for symbol in &symbols {
            for interval in TRACKED_INTERVALS {
                assert_eq!(buffer.count(&CandleKey::new(symbol, interval)), 3);
            }
        }
        assert_eq!(transport.call_count("limit=100"), 48);
    }

    #[tokio::test]
    async fn at_most_five_symbols_run_at_once() {
        let transport = Arc::new(SlowTransport::default());
        let client = Arc::new(BinanceClient::new("https://fapi.test", transport.clone()));
        let buffer = Arc::new(CandleBuffer::new(100));
        let symbols: Vec<String> = (0..12).map(|i| format!("S{i}USDT")).collect();

        let report = backfill(client, buffer, &symbols, 100, 5).await;

        let peak = *transport.peak.lock();
        assert!(peak <= 5, "peak concurrency {peak}");
        assert!(peak > 1, "symbols ran one at a time");
        assert_eq!(report, BackfillReport { loaded: 48, failed: 0 });
        // Returned only after every symbol finished all of its intervals.
        assert!(transport.active.lock().is_empty());
        let completed = transport.completed.lock();
        assert_eq!(completed.len(), 12);
        assert!(completed.values().all(|&n| n == TRACKED_INTERVALS.len()));
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let (transport, client, buffer) = setup();
        transport.route("/fapi/v1/klines", 200, klines_body(0, &[1.0]));
        transport.route("interval=1h", 500, "down");
        transport.route("symbol=BADUSDT", 400, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        let symbols = vec!["BTCUSDT".to_string(), "BADUSDT".to_string()];

        let report = backfill(client, buffer.clone(), &symbols, 100, 5).await;

        // BTC: 3 loaded + 1h failed. BAD: all 4 failed.
        assert_eq!(report, BackfillReport { loaded: 3, failed: 5 });
        assert_eq!(buffer.count(&CandleKey::new("BTCUSDT", "3m")), 1);
        assert!(buffer.get(&CandleKey::new("BTCUSDT", "1h")).is_none());
        assert!(buffer.get(&CandleKey::new("BADUSDT", "3m")).is_none());
    }

    #[tokio::test]
    async fn empty_universe_is_a_no_op() {
        let (transport, client, buffer) = setup();
        let report = backfill(client, buffer, &[], 100, 5).await;
        assert_eq!(report, BackfillReport::default());
        assert!(transport.calls().is_empty());
    }
}
