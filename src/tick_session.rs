/// Tick Session: the single market-data connection for the process.
///
/// State machine: `{kws?, running, connected}` —
/// `(none, false, false) -setup-> (set, false, false) -start-> (set, true, false)
/// -on_connect-> (set, true, true) -stop-> (none, false, false)`.
/// All operations are serialized under an internal mutex. The session does
/// not auto-reconnect; callers detect `connected == false` and restart.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::types::{Depth, DepthLevel, Ohlc, Tick};

const FEED_URL: &str = "wss://feed.broker.example/stream";
/// Bounds the handshake itself, independent of `wait_connected`'s polling
/// timeout, so a hung TCP/TLS handshake fails fast instead of blocking the
/// mutex other callers need to observe `is_connected()`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FeedCredentials {
    pub api_key: String,
    pub session_token: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct OhlcWire {
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DepthWire {
    buy: Option<Vec<DepthLevelWire>>,
    sell: Option<Vec<DepthLevelWire>>,
}

#[derive(Debug, Deserialize)]
struct DepthLevelWire {
    quantity: i64,
    price: f64,
    orders: i32,
}

/// One partial packet from the feed, as sent by the upstream market-data
/// service: any field may be absent.
#[derive(Debug, Deserialize)]
struct FeedPacket {
    instrument_token: i64,
    last_price: Option<f64>,
    ohlc: Option<OhlcWire>,
    volume: Option<i64>,
    depth: Option<DepthWire>,
    timestamp: Option<i64>,
}

/// Concurrent mapping from `token` to latest merged `Tick`. Published by
/// atomic replace-by-pointer so readers never observe a partially
/// constructed record.
#[derive(Default)]
struct LiveTickStore {
    ticks: RwLock<HashMap<i64, Arc<Tick>>>,
}

impl LiveTickStore {
    async fn get(&self, token: i64) -> Option<Arc<Tick>> {
        self.ticks.read().await.get(&token).cloned()
    }

    async fn merge_in(&self, token: i64, incoming: &FeedPacket) {
        let mut ticks = self.ticks.write().await;
        let existing = ticks.get(&token).cloned();
        let merged = merge_tick(existing.as_deref(), incoming);
        ticks.insert(token, Arc::new(merged));
    }

    async fn any_tick(&self) -> bool {
        !self.ticks.read().await.is_empty()
    }
}

fn merge_tick(existing: Option<&Tick>, incoming: &FeedPacket) -> Tick {
    let empty = Ohlc::default();
    let existing_ohlc = existing.map(|t| &t.ohlc).unwrap_or(&empty);

    let ohlc = match &incoming.ohlc {
        Some(wire) => Ohlc {
            open: wire.open.or(existing_ohlc.open),
            high: wire.high.or(existing_ohlc.high),
            low: wire.low.or(existing_ohlc.low),
            close: wire.close.or(existing_ohlc.close),
        },
        None => existing_ohlc.clone(),
    };

    let depth = match (&incoming.depth, existing.and_then(|t| t.depth.clone())) {
        (None, existing_depth) => existing_depth,
        (Some(wire), existing_depth) => {
            let existing_depth = existing_depth.unwrap_or_default();
            Some(Depth {
                buy: wire
                    .buy
                    .as_ref()
                    .map(|levels| levels.iter().map(wire_to_level).collect())
                    .or(existing_depth.buy),
                sell: wire
                    .sell
                    .as_ref()
                    .map(|levels| levels.iter().map(wire_to_level).collect())
                    .or(existing_depth.sell),
            })
        }
    };

    Tick {
        last_price: incoming.last_price.or(existing.and_then(|t| t.last_price)),
        ohlc,
        volume: incoming.volume.or(existing.and_then(|t| t.volume)),
        depth,
        timestamp: incoming
            .timestamp
            .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
            .or(existing.and_then(|t| t.timestamp)),
    }
}

fn wire_to_level(w: &DepthLevelWire) -> DepthLevel {
    DepthLevel {
        quantity: w.quantity,
        price: w.price,
        orders: w.orders,
    }
}

struct Inner {
    credentials: Option<FeedCredentials>,
    running: bool,
    connected: Arc<std::sync::atomic::AtomicBool>,
    subscribed: Vec<i64>,
    reader: Option<JoinHandle<()>>,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            credentials: None,
            running: false,
            connected: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            subscribed: Vec::new(),
            reader: None,
        }
    }
}

pub struct TickSession {
    inner: Mutex<Inner>,
    store: Arc<LiveTickStore>,
}

impl TickSession {
    pub fn new() -> Self {
        TickSession {
            inner: Mutex::new(Inner::default()),
            store: Arc::new(LiveTickStore::default()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn get(&self, token: i64) -> Option<Arc<Tick>> {
        self.store.get(token).await
    }

    /// `(nil, false, false) -> (set, false, false)`.
    pub async fn setup(&self, credentials: FeedCredentials) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.credentials = Some(credentials);
        inner.running = false;
        inner.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Non-blocking: spawns the feed reader task. `(set, false, false) ->
    /// (set, true, false)`; the reader flips `connected` once the socket
    /// handshake completes. The handshake itself runs with the mutex
    /// released (only `running` is set optimistically beforehand), so
    /// `is_connected()`/`wait_connected()` stay observable — and therefore
    /// able to time out — while a hung connect is still in flight.
    pub async fn start(&self) -> Result<()> {
        let url = {
            let mut inner = self.inner.lock().await;
            let creds = inner
                .credentials
                .clone()
                .ok_or_else(|| EngineError::FeedSetupFailed("start called before setup".to_string()))?;

            if inner.running {
                return Ok(());
            }

            let url = format!(
                "{}?api_key={}&session_token={}&user_id={}",
                FEED_URL, creds.api_key, creds.session_token, creds.user_id
            );
            inner.running = true;
            url
        };

        let ws_stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.inner.lock().await.running = false;
                return Err(EngineError::FeedSetupFailed(format!("connect failed: {}", e)));
            }
            Err(_) => {
                self.inner.lock().await.running = false;
                return Err(EngineError::FeedSetupFailed("connect timed out".to_string()));
            }
        };

        let mut inner = self.inner.lock().await;
        if !inner.running {
            // A concurrent `stop()` ran while the handshake was in flight.
            return Ok(());
        }

        inner.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        info!("tick session connected");

        let (_write, mut read) = ws_stream.split();
        let store = Arc::clone(&self.store);
        let connected_flag = Arc::clone(&inner.connected);

        let handle = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        match serde_json::from_str::<FeedPacket>(&text) {
                            Ok(packet) => store.merge_in(packet.instrument_token, &packet).await,
                            Err(e) => debug!("unparseable feed packet: {}", e),
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) => {
                        warn!("tick feed closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("tick feed error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            connected_flag.store(false, std::sync::atomic::Ordering::SeqCst);
            warn!("tick feed reader ended");
        });

        inner.reader = Some(handle);
        Ok(())
    }

    /// No-op unless connected.
    pub async fn subscribe(&self, tokens: &[i64]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.connected.load(std::sync::atomic::Ordering::SeqCst) {
            debug!("subscribe skipped: not connected");
            return Ok(());
        }
        inner.subscribed.extend_from_slice(tokens);
        info!(count = tokens.len(), "subscribed tokens");
        Ok(())
    }

    /// `(set, true, true) -> (nil, false, false)`.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.reader.take() {
            handle.abort();
        }
        inner.credentials = None;
        inner.running = false;
        inner.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        inner.subscribed.clear();
        Ok(())
    }

    /// Forces a clean session: `stop -> setup -> start`, per the Eligibility
    /// Classifier's precondition.
    pub async fn reset(&self, credentials: FeedCredentials) -> Result<()> {
        self.stop().await?;
        self.setup(credentials).await?;
        self.start().await
    }

    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        wait_until(timeout, || self.is_connected()).await
    }

    pub async fn wait_for_any_tick(&self, timeout: Duration) -> bool {
        wait_until(timeout, || self.store.any_tick()).await
    }
}

impl Default for TickSession {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_until<F, Fut>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let step = Duration::from_millis(500);
    let mut waited = Duration::ZERO;
    loop {
        if predicate().await {
            return true;
        }
        if waited >= timeout {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn merging_empty_packet_leaves_tick_unchanged() {
        let store = LiveTickStore::default();
        let first = FeedPacket {
            instrument_token: 1,
            last_price: Some(100.0),
            ohlc: Some(OhlcWire { open: Some(95.0), high: Some(101.0), low: Some(94.0), close: Some(90.0) }),
            volume: Some(1000),
            depth: None,
            timestamp: Some(Utc::now().timestamp_millis()),
        };
        store.merge_in(1, &first).await;
        let before = store.get(1).await.unwrap();

        let empty = FeedPacket {
            instrument_token: 1,
            last_price: None,
            ohlc: None,
            volume: None,
            depth: None,
            timestamp: None,
        };
        store.merge_in(1, &empty).await;
        let after = store.get(1).await.unwrap();

        assert_eq!(before.last_price, after.last_price);
        assert_eq!(before.ohlc.open, after.ohlc.open);
        assert_eq!(before.volume, after.volume);
    }

    #[tokio::test]
    async fn later_partial_tick_does_not_erase_open() {
        let store = LiveTickStore::default();
        let open_packet = FeedPacket {
            instrument_token: 5,
            last_price: Some(100.0),
            ohlc: Some(OhlcWire { open: Some(85.0), high: None, low: None, close: None }),
            volume: None,
            depth: None,
            timestamp: None,
        };
        store.merge_in(5, &open_packet).await;

        let ltp_only = FeedPacket {
            instrument_token: 5,
            last_price: Some(101.0),
            ohlc: None,
            volume: None,
            depth: None,
            timestamp: None,
        };
        store.merge_in(5, &ltp_only).await;

        let tick = store.get(5).await.unwrap();
        assert_eq!(tick.ohlc.open, Some(85.0));
        assert_eq!(tick.last_price, Some(101.0));
    }

    #[tokio::test]
    async fn depth_sides_merge_independently() {
        let store = LiveTickStore::default();
        let buy_only = FeedPacket {
            instrument_token: 9,
            last_price: None,
            ohlc: None,
            volume: None,
            depth: Some(DepthWire {
                buy: Some(vec![DepthLevelWire { quantity: 10, price: 99.0, orders: 1 }]),
                sell: None,
            }),
            timestamp: None,
        };
        store.merge_in(9, &buy_only).await;

        let sell_only = FeedPacket {
            instrument_token: 9,
            last_price: None,
            ohlc: None,
            volume: None,
            depth: Some(DepthWire {
                buy: None,
                sell: Some(vec![DepthLevelWire { quantity: 5, price: 101.0, orders: 1 }]),
            }),
            timestamp: None,
        };
        store.merge_in(9, &sell_only).await;

        let tick = store.get(9).await.unwrap();
        let depth = tick.depth.as_ref().unwrap();
        assert!(depth.buy.is_some());
        assert!(depth.sell.is_some());
    }
}
