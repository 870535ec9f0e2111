use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle, either pulled over REST or pushed by the kline
/// stream. `open_time` is the identity of the bar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// What an upsert did to the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Same open time as the last bar: the in-progress bar was refreshed.
    Replaced,
    /// New bar appended (the oldest may have been evicted).
    Appended,
    /// Older than the last stored bar; ignored.
    Stale,
}

type Series = Arc<Mutex<VecDeque<Candle>>>;

// ---------------------------------------------------------------------------
// CandleBuffer -- per-key locked ring buffers
// ---------------------------------------------------------------------------

/// Bounded candle store keyed by `(symbol, interval)`.
///
/// Each series sits behind its own mutex. The outer map lock is only held
/// long enough to find or create a series, so writers on different keys
/// never contend on the series lock, and every upsert runs its
/// replace-vs-append decision while holding the lock of its key. Readers
/// take a copy under the same lock and therefore see either the state
/// before or after an upsert, never a partial one.
pub struct CandleBuffer {
    series: RwLock<HashMap<CandleKey, Series>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a buffer that retains at most `max_candles` per key.
    pub fn new(max_candles: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
        }
    }

    fn series_for(&self, key: &CandleKey) -> Series {
        if let Some(series) = self.series.read().get(key) {
            return series.clone();
        }
        let mut map = self.series.write();
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.max_candles + 1))))
            .clone()
    }

    /// Apply one update to the series of `key`.
    ///
    /// * Same `open_time` as the last bar => replace the last bar.
    /// * Newer `open_time` => append, evicting the oldest beyond capacity.
    /// * Older `open_time` => dropped, ordering is never broken.
    pub fn upsert(&self, key: &CandleKey, candle: Candle) -> UpsertOutcome {
        let series = self.series_for(key);
        let mut ring = series.lock();
        apply(&mut ring, candle, self.max_candles)
    }

    /// Apply a batch of oldest-first updates under a single lock acquisition,
    /// so readers never observe a half-loaded batch.
    pub fn upsert_many(&self, key: &CandleKey, candles: impl IntoIterator<Item = Candle>) -> usize {
        let series = self.series_for(key);
        let mut ring = series.lock();
        let mut stale = 0;
        for candle in candles {
            if apply(&mut ring, candle, self.max_candles) == UpsertOutcome::Stale {
                stale += 1;
            }
        }
        if stale > 0 {
            debug!(key = %key, stale, "dropped out-of-order candles");
        }
        ring.len()
    }

    /// Copy of the series for `key` (oldest first), or `None` when nothing has
    /// been stored for it yet.
    pub fn get(&self, key: &CandleKey) -> Option<Vec<Candle>> {
        let series = self.series.read().get(key)?.clone();
        let ring = series.lock();
        if ring.is_empty() {
            return None;
        }
        Some(ring.iter().cloned().collect())
    }

    /// Empty the series for `key` under its lock, so the next read misses.
    /// Returns how many candles were discarded.
    pub fn invalidate(&self, key: &CandleKey) -> usize {
        let Some(series) = self.series.read().get(key).cloned() else {
            return 0;
        };
        let mut ring = series.lock();
        let dropped = ring.len();
        ring.clear();
        dropped
    }

    /// Number of candles stored for `key`.
    pub fn count(&self, key: &CandleKey) -> usize {
        self.series
            .read()
            .get(key)
            .map_or(0, |series| series.lock().len())
    }

    /// Close price of the newest candle for `key`, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let series = self.series.read().get(key)?.clone();
        let ring = series.lock();
        ring.back().map(|c| c.close)
    }

    /// Number of distinct keys with a series.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply(ring: &mut VecDeque<Candle>, candle: Candle, max_candles: usize) -> UpsertOutcome {
    match ring.back() {
        Some(last) if last.open_time == candle.open_time => {
            if let Some(slot) = ring.back_mut() {
                *slot = candle;
            }
            UpsertOutcome::Replaced
        }
        Some(last) if candle.open_time < last.open_time => UpsertOutcome::Stale,
        _ => {
            ring.push_back(candle);
            while ring.len() > max_candles {
                ring.pop_front();
            }
            UpsertOutcome::Appended
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
