// =============================================================================
// Market data controller — dual-mode candle acquisition
// =============================================================================
//
// Owns the candle cache and decides where candles come from:
//
//   Live      push stream feeds the cache; a cache miss is pulled over REST
//             and the missing stream is subscribed in the background
//   Disabled  every cache miss is pulled over REST, nothing is subscribed
//
// `start` is a one-shot state machine:
//   resolve symbols -> backfill -> connect -> register readers ->
//   batch subscribe per interval -> Live
// Any failure after connect closes the stream and leaves the mode Disabled.
// When a Live connection later terminates the mode drops back to Disabled and
// every stream-fed series is invalidated, so the next read pulls over REST
// instead of serving bars that will never advance.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backfill::{backfill, BackfillReport};
use super::error::MarketDataError;
use super::task_pool::BackgroundTasks;
use crate::binance::{BinanceClient, StreamClient};
use crate::market_data::{run_stream_reader, Candle, CandleBuffer, CandleKey};
use crate::runtime_config::RuntimeConfig;
use crate::types::{
    kline_stream_name, AcquisitionMode, BACKFILL_CONCURRENCY, BACKFILL_DEPTH, CACHE_CAPACITY,
    TRACKED_INTERVALS,
};

/// A stream the controller has claimed, and the reader feeding its series.
/// `reader` stays `None` while a dynamic subscription is in flight.
struct StreamFeed {
    key: CandleKey,
    reader: Option<JoinHandle<u64>>,
}

type Feeds = Arc<Mutex<HashMap<String, StreamFeed>>>;

pub struct MarketDataController {
    config: RuntimeConfig,
    client: Arc<BinanceClient>,
    stream: Arc<dyn StreamClient>,
    buffer: Arc<CandleBuffer>,
    mode: Arc<RwLock<AcquisitionMode>>,
    symbols: RwLock<Vec<String>>,
    /// Claimed streams by name; guards against re-subscribing.
    feeds: Feeds,
    tasks: BackgroundTasks,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl MarketDataController {
    pub fn new(
        config: RuntimeConfig,
        client: Arc<BinanceClient>,
        stream: Arc<dyn StreamClient>,
    ) -> Self {
        let tasks = BackgroundTasks::new(config.background_task_limit);
        Self {
            config,
            client,
            stream,
            buffer: Arc::new(CandleBuffer::new(CACHE_CAPACITY)),
            mode: Arc::new(RwLock::new(AcquisitionMode::Disabled)),
            symbols: RwLock::new(Vec::new()),
            feeds: Arc::new(Mutex::new(HashMap::new())),
            tasks,
            watcher: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn mode(&self) -> AcquisitionMode {
        *self.mode.read()
    }

    pub fn client(&self) -> &Arc<BinanceClient> {
        &self.client
    }

    pub fn buffer(&self) -> &Arc<CandleBuffer> {
        &self.buffer
    }

    /// Symbol universe resolved by the last `initialize`.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    fn set_mode(&self, mode: AcquisitionMode) {
        let prev = std::mem::replace(&mut *self.mode.write(), mode);
        if prev != mode {
            info!(from = %prev, to = %mode, "acquisition mode changed");
        }
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Configured symbols, or every active USDT perpetual when none are set.
    pub async fn resolve_symbols(&self) -> Result<Vec<String>, MarketDataError> {
        let configured = self.config.normalized_symbols();
        if !configured.is_empty() {
            return Ok(configured);
        }

        let infos = self
            .client
            .get_exchange_info()
            .await
            .map_err(MarketDataError::Discovery)?;
        let symbols: Vec<String> = infos
            .into_iter()
            .filter(|s| s.is_active_usdt_perpetual())
            .map(|s| s.symbol)
            .collect();
        info!(count = symbols.len(), "discovered active USDT perpetuals");
        Ok(symbols)
    }

    /// Resolve the universe and backfill it. Only discovery can fail.
    pub async fn initialize(&self) -> Result<BackfillReport, MarketDataError> {
        let symbols = self.resolve_symbols().await?;
        *self.symbols.write() = symbols.clone();

        let report = backfill(
            self.client.clone(),
            self.buffer.clone(),
            &symbols,
            BACKFILL_DEPTH,
            BACKFILL_CONCURRENCY,
        )
        .await;
        Ok(report)
    }

    /// Run the startup sequence and return the resulting mode. Never fails:
    /// every problem is logged and leaves the controller in REST mode.
    pub async fn start(&self) -> AcquisitionMode {
        info!(streaming_enabled = self.config.streaming_enabled, "starting market data controller");

        if let Err(e) = self.initialize().await {
            warn!(error = %e, "initialisation failed, staying in REST mode");
            self.set_mode(AcquisitionMode::Disabled);
            return AcquisitionMode::Disabled;
        }

        if !self.config.streaming_enabled {
            info!("streaming disabled by configuration, using REST mode");
            self.set_mode(AcquisitionMode::Disabled);
            return AcquisitionMode::Disabled;
        }

        if let Err(e) = self.stream.connect().await {
            warn!(error = %format!("{e:#}"), "stream connect failed, using REST mode");
            self.set_mode(AcquisitionMode::Disabled);
            return AcquisitionMode::Disabled;
        }

        if let Err(e) = self.subscribe_all().await {
            warn!(error = %format!("{e:#}"), "stream subscription failed, using REST mode");
            self.set_mode(AcquisitionMode::Disabled);
            self.stream.close().await;
            self.feeds.lock().clear();
            return AcquisitionMode::Disabled;
        }

        self.set_mode(AcquisitionMode::Live);
        self.spawn_disconnect_watcher();
        info!(symbols = self.symbols.read().len(), "market data controller live");
        AcquisitionMode::Live
    }

    async fn subscribe_all(&self) -> anyhow::Result<()> {
        let symbols = self.symbols();
        for symbol in &symbols {
            for interval in TRACKED_INTERVALS {
                self.register_reader(CandleKey::new(symbol.as_str(), interval));
            }
        }
        for interval in TRACKED_INTERVALS {
            self.stream
                .batch_subscribe(&symbols, interval)
                .await
                .with_context(|| format!("batch subscribe {interval}"))?;
        }
        Ok(())
    }

    fn register_reader(&self, key: CandleKey) {
        let name = kline_stream_name(&key.symbol, &key.interval);
        let rx = self.stream.add_subscriber(&name, self.config.subscriber_buffer);
        let reader = tokio::spawn(run_stream_reader(key.clone(), rx, self.buffer.clone()));
        self.feeds.lock().insert(
            name,
            StreamFeed {
                key,
                reader: Some(reader),
            },
        );
    }

    fn spawn_disconnect_watcher(&self) {
        let stream = self.stream.clone();
        let mode = self.mode.clone();
        let feeds = self.feeds.clone();
        let buffer = self.buffer.clone();
        let handle = tokio::spawn(async move {
            stream.closed().await;
            let prev = std::mem::replace(&mut *mode.write(), AcquisitionMode::Disabled);
            if prev == AcquisitionMode::Live {
                warn!("stream connection lost, falling back to REST mode");
            }

            // Readers may still hold queued updates; stop them before
            // emptying their series so nothing repopulates it afterwards.
            let drained: Vec<StreamFeed> = feeds.lock().drain().map(|(_, feed)| feed).collect();
            let mut invalidated = 0usize;
            for feed in drained {
                if let Some(reader) = feed.reader {
                    reader.abort();
                    let _ = reader.await;
                }
                if buffer.invalidate(&feed.key) > 0 {
                    invalidated += 1;
                }
            }
            info!(series = invalidated, "stream-fed series invalidated");
        });
        if let Some(old) = self.watcher.lock().replace(handle) {
            old.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Candles for (symbol, interval), oldest first.
    ///
    /// Served from the cache when present; otherwise pulled over REST, stored,
    /// and (in Live mode) the stream is subscribed in the background.
    pub async fn get_current_candles(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let key = CandleKey::new(symbol.to_uppercase(), interval);
        if let Some(candles) = self.buffer.get(&key) {
            return Ok(candles);
        }

        debug!(key = %key, "cache miss, pulling over REST");
        let candles = self
            .client
            .get_klines(&key.symbol, &key.interval, BACKFILL_DEPTH)
            .await
            .map_err(|source| MarketDataError::Fetch {
                symbol: key.symbol.clone(),
                interval: key.interval.clone(),
                source,
            })?;
        self.buffer.upsert_many(&key, candles);

        if self.mode() == AcquisitionMode::Live {
            self.subscribe_in_background(key.clone());
        }

        Ok(self.buffer.get(&key).unwrap_or_default())
    }

    /// Claim the stream for `key` and subscribe it without delaying the
    /// caller. The reader is only registered once the subscription is
    /// accepted; the REST pull has already seeded the series.
    fn subscribe_in_background(&self, key: CandleKey) {
        let name = kline_stream_name(&key.symbol, &key.interval);
        {
            let mut feeds = self.feeds.lock();
            if feeds.contains_key(&name) {
                debug!(stream = %name, "stream already subscribed");
                return;
            }
            feeds.insert(
                name.clone(),
                StreamFeed {
                    key: key.clone(),
                    reader: None,
                },
            );
        }

        let stream = self.stream.clone();
        let buffer = self.buffer.clone();
        let feeds = self.feeds.clone();
        let queue_size = self.config.subscriber_buffer;
        self.tasks.submit("dynamic_subscribe", async move {
            if let Err(e) = stream.subscribe(std::slice::from_ref(&name)).await {
                feeds.lock().remove(&name);
                return Err(e.context(format!("dynamic subscribe {name}")));
            }

            let mut claimed = feeds.lock();
            let Some(feed) = claimed.get_mut(&name) else {
                debug!(stream = %name, "connection ended before the subscription completed");
                return Ok(());
            };
            let rx = stream.add_subscriber(&name, queue_size);
            feed.reader = Some(tokio::spawn(run_stream_reader(key, rx, buffer)));
            info!(stream = %name, "dynamic stream subscribed");
            Ok(())
        });
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Close the stream (ending every reader) and cancel background work.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.set_mode(AcquisitionMode::Disabled);
        self.stream.close().await;
        self.tasks.abort_all();
        self.feeds.lock().clear();
        info!("market data controller stopped");
    }

    #[cfg(test)]
    pub(crate) async fn drain_background(&self) {
        self.tasks.drain().await;
    }
}
