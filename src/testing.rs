// =============================================================================
// Test doubles: canned HTTP transport and a scripted stream client
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;

use crate::binance::error::BinanceError;
use crate::binance::stream::{CloseSignal, StreamClient};
use crate::binance::transport::{HttpResponse, HttpTransport};
use crate::types::kline_stream_name;

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

struct Route {
    pattern: String,
    status: u16,
    body: String,
    weight: Option<u32>,
}

/// Routes requests by substring match on the full URL. The most recently
/// added matching route wins; no match is a transport error.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, pattern: &str, status: u16, body: impl Into<String>) {
        self.routes.lock().push(Route {
            pattern: pattern.to_string(),
            status,
            body: body.into(),
            weight: None,
        });
    }

    pub fn route_with_weight(&self, pattern: &str, status: u16, body: impl Into<String>, weight: u32) {
        self.routes.lock().push(Route {
            pattern: pattern.to_string(),
            status,
            body: body.into(),
            weight: Some(weight),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of requests whose URL contains `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.contains(pattern)).count()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, url: &str) -> Result<HttpResponse, BinanceError> {
        self.calls.lock().push(url.to_string());

        let routes = self.routes.lock();
        let Some(route) = routes.iter().rev().find(|r| url.contains(&r.pattern)) else {
            return Err(BinanceError::transport(format!("no route for {url}"), false));
        };

        let mut headers = HeaderMap::new();
        if let Some(weight) = route.weight {
            if let Ok(value) = HeaderValue::from_str(&weight.to_string()) {
                headers.insert("X-MBX-USED-WEIGHT-1M", value);
            }
        }
        Ok(HttpResponse {
            status: route.status,
            headers,
            body: route.body.clone(),
        })
    }
}

/// One positional kline record, 3m wide, with taker buy volume 6 of 10.
pub fn kline_json(open_time: i64, close: f64) -> String {
    format!(
        r#"[{open_time},"{open}","{high}","{low}","{close}","10.0",{close_time},"{quote}",42,"6.0","{taker_quote}"]"#,
        open = close,
        high = close + 1.0,
        low = close - 1.0,
        close_time = open_time + 179_999,
        quote = close * 10.0,
        taker_quote = close * 6.0,
    )
}

/// A klines response body: one record per close, 3 minutes apart.
pub fn klines_body(start_open_time: i64, closes: &[f64]) -> String {
    let records: Vec<String> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| kline_json(start_open_time + i as i64 * 180_000, c))
        .collect();
    format!("[{}]", records.join(","))
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// In-memory [`StreamClient`] with switchable failures.
#[derive(Default)]
pub struct FakeStreamClient {
    pub fail_connect: AtomicBool,
    pub fail_batch_subscribe: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// `subscribe` records the call and then never completes.
    pub stall_subscribe: AtomicBool,
    connected: AtomicBool,
    close_calls: AtomicUsize,
    subscribers: Mutex<HashMap<String, mpsc::Sender<String>>>,
    batch_calls: Mutex<Vec<(String, Vec<String>)>>,
    subscribe_calls: Mutex<Vec<Vec<String>>>,
    subscribed: Mutex<HashSet<String>>,
    close_signal: CloseSignal,
}

impl FakeStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect() -> Self {
        let client = Self::default();
        client.fail_connect.store(true, Ordering::SeqCst);
        client
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// `(interval, symbols)` per batch subscription, in call order.
    pub fn batch_calls(&self) -> Vec<(String, Vec<String>)> {
        self.batch_calls.lock().clone()
    }

    /// Stream lists passed to `subscribe`, in call order.
    pub fn subscribe_calls(&self) -> Vec<Vec<String>> {
        self.subscribe_calls.lock().clone()
    }

    /// Every stream name subscribed through either subscribe call.
    pub fn subscribed(&self) -> HashSet<String> {
        self.subscribed.lock().clone()
    }

    pub fn has_subscriber(&self, stream: &str) -> bool {
        self.subscribers.lock().contains_key(stream)
    }

    /// Deliver a raw message to the stream's queue.
    pub async fn push(&self, stream: &str, text: &str) -> bool {
        let sender = self.subscribers.lock().get(stream).cloned();
        match sender {
            Some(tx) => tx.send(text.to_string()).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.lock().clear();
        self.close_signal.fire();
    }
}

#[async_trait]
impl StreamClient for FakeStreamClient {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.connected.store(true, Ordering::SeqCst);
        self.close_signal.reset();
        Ok(())
    }

    fn add_subscriber(&self, stream: &str, buffer: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscribers.lock().insert(stream.to_string(), tx);
        rx
    }

    async fn batch_subscribe(&self, symbols: &[String], interval: &str) -> Result<()> {
        self.batch_calls
            .lock()
            .push((interval.to_string(), symbols.to_vec()));
        if self.fail_batch_subscribe.load(Ordering::SeqCst) {
            bail!("batch subscribe rejected");
        }
        if !self.is_connected() {
            bail!("not connected");
        }
        let mut subscribed = self.subscribed.lock();
        for symbol in symbols {
            subscribed.insert(kline_stream_name(symbol, interval));
        }
        Ok(())
    }

    async fn subscribe(&self, streams: &[String]) -> Result<()> {
        self.subscribe_calls.lock().push(streams.to_vec());
        if self.stall_subscribe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            bail!("subscribe rejected");
        }
        if !self.is_connected() {
            bail!("not connected");
        }
        self.subscribed.lock().extend(streams.iter().cloned());
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.subscribers.lock().clear();
        self.close_signal.fire();
    }

    async fn closed(&self) {
        self.close_signal.wait().await;
    }
}
