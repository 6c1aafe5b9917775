// =============================================================================
// Tick Stream — real-time trade subscriber with per-ticker rolling summaries
// =============================================================================
//
// A single WebSocket carries tick prints for every subscribed ticker. Each
// print updates that ticker's rolling summary in place; the signal engine
// reads summaries synchronously and checks freshness via `updated_at`.
//
// Subscriptions carry an optional TTL: watchlist tickers subscribe forever,
// discoveries for two hours. The per-ticker tick buffer is bounded (FIFO)
// so a runaway symbol cannot grow memory without limit.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

/// A summary older than this is not live-eligible for scoring.
const FRESHNESS_SECS: i64 = 60;
/// Bounded per-ticker tick buffer.
const MAX_TICKS: usize = 1_000;
/// Notional size above which a print counts as a block.
const BLOCK_NOTIONAL: f64 = 250_000.0;
/// Recent-tick window used for the flow-imbalance read.
const IMBALANCE_WINDOW: usize = 200;

/// One normalized tick print.
#[derive(Debug, Clone, Copy)]
struct Tick {
    price: f64,
    size: f64,
    is_buy: bool,
}

/// Rolling summary for one ticker, recomputed incrementally per print.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSummary {
    pub last_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub vwap: f64,
    pub buy_volume_pct: f64,
    pub sell_volume_pct: f64,
    /// (buy - sell) / total over the recent window, in [-1, 1].
    pub flow_imbalance: f64,
    pub large_block_buys: u64,
    pub large_block_sells: u64,
    pub total_volume: f64,
    pub high_of_day: f64,
    pub low_of_day: f64,
    pub updated_at: DateTime<Utc>,
}

impl TickSummary {
    pub fn is_fresh(&self) -> bool {
        (Utc::now() - self.updated_at).num_seconds() <= FRESHNESS_SECS
    }
}

struct Accumulator {
    summary: TickSummary,
    ticks: VecDeque<Tick>,
    pv_sum: f64,
    buy_volume: f64,
    sell_volume: f64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            summary: TickSummary::default(),
            ticks: VecDeque::with_capacity(MAX_TICKS),
            pv_sum: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
        }
    }

    fn apply(&mut self, tick: Tick, bid: f64, ask: f64) {
        let notional = tick.price * tick.size;

        if self.ticks.len() == MAX_TICKS {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);

        self.pv_sum += tick.price * tick.size;
        if tick.is_buy {
            self.buy_volume += notional;
            if notional >= BLOCK_NOTIONAL {
                self.summary.large_block_buys += 1;
            }
        } else {
            self.sell_volume += notional;
            if notional >= BLOCK_NOTIONAL {
                self.summary.large_block_sells += 1;
            }
        }

        let s = &mut self.summary;
        s.last_price = tick.price;
        if bid > 0.0 {
            s.bid = bid;
        }
        if ask > 0.0 {
            s.ask = ask;
        }
        s.total_volume += tick.size;
        s.vwap = if s.total_volume > 0.0 { self.pv_sum / s.total_volume } else { 0.0 };
        s.high_of_day = if s.high_of_day > 0.0 { s.high_of_day.max(tick.price) } else { tick.price };
        s.low_of_day = if s.low_of_day > 0.0 { s.low_of_day.min(tick.price) } else { tick.price };

        let total = self.buy_volume + self.sell_volume;
        if total > 0.0 {
            s.buy_volume_pct = self.buy_volume / total * 100.0;
            s.sell_volume_pct = self.sell_volume / total * 100.0;
        }

        // Imbalance over the recent window only — session totals lag.
        let recent = self.ticks.iter().rev().take(IMBALANCE_WINDOW);
        let (mut buy, mut sell) = (0.0_f64, 0.0_f64);
        for t in recent {
            let n = t.price * t.size;
            if t.is_buy { buy += n } else { sell += n }
        }
        let window_total = buy + sell;
        s.flow_imbalance = if window_total > 0.0 {
            ((buy - sell) / window_total).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        s.updated_at = Utc::now();
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns every per-ticker accumulator and the subscription set.
pub struct TickStreamManager {
    accumulators: RwLock<HashMap<String, Accumulator>>,
    /// ticker -> optional expiry. None = permanent (watchlist).
    subscriptions: RwLock<HashMap<String, Option<DateTime<Utc>>>>,
    /// Set when the subscription set changed and the socket should resend.
    dirty: RwLock<bool>,
}

impl TickStreamManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accumulators: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            dirty: RwLock::new(false),
        })
    }

    /// Subscribe a ticker; `expires_at = None` keeps it forever. An existing
    /// permanent subscription is never downgraded to an expiring one.
    pub fn subscribe(&self, ticker: &str, expires_at: Option<DateTime<Utc>>) {
        let key = ticker.to_uppercase();
        let mut subs = self.subscriptions.write();
        match subs.get(&key) {
            Some(None) => {}
            _ => {
                subs.insert(key.clone(), expires_at);
                *self.dirty.write() = true;
                debug!(ticker = %key, ttl = ?expires_at, "tick subscription added");
            }
        }
    }

    pub fn unsubscribe(&self, ticker: &str) {
        let key = ticker.to_uppercase();
        if self.subscriptions.write().remove(&key).is_some() {
            self.accumulators.write().remove(&key);
            *self.dirty.write() = true;
            debug!(ticker = %key, "tick subscription removed");
        }
    }

    /// Drop every subscription whose TTL has passed. Returns the removed
    /// tickers.
    pub fn expire_subscriptions(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .subscriptions
            .read()
            .iter()
            .filter_map(|(t, exp)| exp.filter(|e| *e <= now).map(|_| t.clone()))
            .collect();
        for ticker in &expired {
            self.unsubscribe(ticker);
        }
        expired
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscriptions.read().keys().cloned().collect()
    }

    pub fn is_subscribed(&self, ticker: &str) -> bool {
        self.subscriptions.read().contains_key(&ticker.to_uppercase())
    }

    /// Current summary for a ticker, if any prints arrived.
    pub fn summary(&self, ticker: &str) -> Option<TickSummary> {
        self.accumulators
            .read()
            .get(&ticker.to_uppercase())
            .map(|a| a.summary.clone())
    }

    /// All summaries (for the snapshot).
    pub fn all_summaries(&self) -> HashMap<String, TickSummary> {
        self.accumulators
            .read()
            .iter()
            .map(|(k, a)| (k.clone(), a.summary.clone()))
            .collect()
    }

    /// Feed one print. Prints for unsubscribed tickers are dropped.
    pub fn process_tick(&self, ticker: &str, price: f64, size: f64, is_buy: bool, bid: f64, ask: f64) {
        let key = ticker.to_uppercase();
        if !self.subscriptions.read().contains_key(&key) {
            return;
        }
        let mut accs = self.accumulators.write();
        let acc = accs.entry(key).or_insert_with(Accumulator::new);
        acc.apply(Tick { price, size, is_buy }, bid, ask);
    }

    fn take_dirty(&self) -> bool {
        std::mem::replace(&mut self.dirty.write(), false)
    }
}

// =============================================================================
// WebSocket run loop
// =============================================================================

/// Connect to the tick provider and feed prints into `manager` until the
/// stream drops. The caller owns reconnection.
pub async fn run_tick_stream(url: &str, manager: &Arc<TickStreamManager>) -> Result<()> {
    info!(url, "connecting to tick stream");
    let (ws_stream, _resp) = connect_async(url)
        .await
        .context("failed to connect to tick stream")?;
    info!("tick stream connected");

    let (mut write, mut read) = ws_stream.split();

    send_subscriptions(&mut write, manager).await?;

    loop {
        // Subscription set changed since the last frame? Resend.
        if manager.take_dirty() {
            send_subscriptions(&mut write, manager).await?;
        }

        match read.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                match parse_tick(&text) {
                    Ok(Some((ticker, price, size, is_buy, bid, ask))) => {
                        manager.process_tick(&ticker, price, size, is_buy, bid, ask);
                    }
                    Ok(None) => {} // heartbeat / ack frame
                    Err(e) => warn!(error = %e, "failed to parse tick message"),
                }
            }
            Some(Ok(tokio_tungstenite::tungstenite::Message::Ping(_))) => {}
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "tick stream read error");
                return Err(e.into());
            }
            None => {
                warn!("tick stream ended");
                return Ok(());
            }
        }
    }
}

async fn send_subscriptions<S>(write: &mut S, manager: &Arc<TickStreamManager>) -> Result<()>
where
    S: futures_util::Sink<tokio_tungstenite::tungstenite::Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let symbols = manager.subscribed();
    let frame = serde_json::json!({ "action": "subscribe", "symbols": symbols });
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(frame.to_string()))
        .await
        .context("failed to send subscribe frame")?;
    debug!(count = symbols.len(), "subscription frame sent");
    Ok(())
}

/// Parse one tick frame.
///
/// Expected shape:
/// ```json
/// { "ev": "T", "s": "NVDA", "p": 905.1, "v": 300, "side": "buy", "bid": 905.0, "ask": 905.2 }
/// ```
/// Non-trade frames (acks, heartbeats) return `Ok(None)`.
fn parse_tick(text: &str) -> Result<Option<(String, f64, f64, bool, f64, f64)>> {
    let root: serde_json::Value = serde_json::from_str(text).context("tick frame not JSON")?;

    if root["ev"].as_str() != Some("T") {
        return Ok(None);
    }

    let ticker = root["s"].as_str().context("missing field s")?.to_string();
    let price = root["p"].as_f64().context("missing field p")?;
    let size = root["v"].as_f64().context("missing field v")?;
    let is_buy = root["side"].as_str().map(|s| s == "buy").unwrap_or(true);
    let bid = root["bid"].as_f64().unwrap_or(0.0);
    let ask = root["ask"].as_f64().unwrap_or(0.0);

    Ok(Some((ticker, price, size, is_buy, bid, ask)))
}
