// =============================================================================
// Combined kline stream client — one WebSocket, many subscriber queues
// =============================================================================
//
// The futures combined endpoint multiplexes every subscribed stream over one
// connection and wraps each event as `{ "stream": "<name>", "data": { .. } }`.
// Subscribers register a bounded queue per stream name; the dispatch task
// forwards the `data` payload with `try_send`, so a slow consumer loses
// updates instead of stalling the socket. Closing the client drops every
// sender, which closes the queues and lets their reader tasks finish.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::types::kline_stream_name;

/// Production futures combined-stream endpoint.
pub const FUTURES_STREAM_URL: &str = "wss://fstream.binance.com/stream";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Subscribers = Arc<RwLock<HashMap<String, mpsc::Sender<String>>>>;

/// Push-stream collaborator used by the acquisition controller.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Open the connection.
    async fn connect(&self) -> Result<()>;

    /// Register a delivery queue for `stream`. Replaces (and thereby closes)
    /// any previous queue for the same name.
    fn add_subscriber(&self, stream: &str, buffer: usize) -> mpsc::Receiver<String>;

    /// Subscribe every symbol's kline stream for one interval.
    async fn batch_subscribe(&self, symbols: &[String], interval: &str) -> Result<()>;

    /// Subscribe explicit stream names.
    async fn subscribe(&self, streams: &[String]) -> Result<()>;

    /// Tear down the connection and close every delivery queue.
    async fn close(&self);

    /// Resolves once the connection has terminated for any reason.
    async fn closed(&self);
}

/// Tracks whether a connection has ended, without losing wake-ups that race
/// with a waiter registering.
#[derive(Default)]
pub struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn fire(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn reset(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_fired(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// Default [`StreamClient`] over the futures combined-stream endpoint.
pub struct CombinedStreamClient {
    url: String,
    batch_size: usize,
    subscribers: Subscribers,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    close_signal: Arc<CloseSignal>,
}

impl CombinedStreamClient {
    /// `batch_size` caps how many stream names go into one SUBSCRIBE request.
    pub fn new(url: impl Into<String>, batch_size: usize) -> Self {
        Self {
            url: url.into(),
            batch_size: batch_size.max(1),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            dispatch: Mutex::new(None),
            next_id: AtomicU64::new(1),
            close_signal: Arc::new(CloseSignal::default()),
        }
    }

    async fn send_subscribe(&self, streams: &[String]) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "method": "SUBSCRIBE",
            "params": streams,
            "id": id,
        });

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().context("stream client is not connected")?;
        sink.send(Message::Text(request.to_string()))
            .await
            .context("failed to send SUBSCRIBE request")?;
        debug!(id, count = streams.len(), "SUBSCRIBE request sent");
        Ok(())
    }

    /// Route one text frame to its subscriber queue.
    fn dispatch_text(subscribers: &Subscribers, text: &str) {
        let Ok(mut root) = serde_json::from_str::<Value>(text) else {
            warn!("dropping non-JSON stream frame");
            return;
        };
        // Subscription acknowledgements: {"result": null, "id": n}
        if root.get("id").is_some() {
            if let Some(err) = root.get("error") {
                warn!(error = %err, "stream request rejected");
            }
            return;
        }
        let Some(stream) = root.get("stream").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let payload = root["data"].take();

        let sender = subscribers.read().get(&stream).cloned();
        if let Some(tx) = sender {
            if let Err(e) = tx.try_send(payload.to_string()) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        debug!(stream = %stream, "subscriber queue full, update dropped")
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        subscribers.write().remove(&stream);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StreamClient for CombinedStreamClient {
    async fn connect(&self) -> Result<()> {
        info!(url = %self.url, "connecting to combined kline stream");
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .context("failed to connect to combined stream")?;
        let (write, mut read) = ws_stream.split();
        *self.sink.lock().await = Some(write);
        self.close_signal.reset();

        let subscribers = self.subscribers.clone();
        let sink = self.sink.clone();
        let close_signal = self.close_signal.clone();
        let handle = tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        CombinedStreamClient::dispatch_text(&subscribers, &text)
                    }
                    Some(Ok(Message::Ping(frame))) => {
                        if let Some(sink) = sink.lock().await.as_mut() {
                            let _ = sink.send(Message::Pong(frame)).await;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "combined stream closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "combined stream read error");
                        break;
                    }
                    None => {
                        warn!("combined stream ended");
                        break;
                    }
                }
            }
            subscribers.write().clear();
            close_signal.fire();
        });

        if let Some(old) = self.dispatch.lock().replace(handle) {
            old.abort();
        }
        info!("combined kline stream connected");
        Ok(())
    }

    fn add_subscriber(&self, stream: &str, buffer: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.subscribers.write().insert(stream.to_string(), tx);
        rx
    }

    async fn batch_subscribe(&self, symbols: &[String], interval: &str) -> Result<()> {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| kline_stream_name(s, interval))
            .collect();
        for chunk in streams.chunks(self.batch_size) {
            self.send_subscribe(chunk)
                .await
                .with_context(|| format!("batch subscribe {interval} ({} streams)", chunk.len()))?;
        }
        info!(interval, count = streams.len(), "kline streams subscribed");
        Ok(())
    }

    async fn subscribe(&self, streams: &[String]) -> Result<()> {
        if streams.is_empty() {
            return Ok(());
        }
        self.send_subscribe(streams).await
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
        self.subscribers.write().clear();
        self.close_signal.fire();
        info!("combined kline stream closed");
    }

    async fn closed(&self) {
        self.close_signal.wait().await;
    }
}
