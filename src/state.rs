// =============================================================================
// State Store — per-ticker and market-wide facts behind one writer lock
// =============================================================================
//
// The single source of truth for everything the engine knows about the
// market. Refresh cycles, the tick subscriber, and API handlers all mutate
// through the store; readers that need a consistent view (the scoring pass,
// the snapshot broadcast) clone what they need under the read lock.
//
// Every fact group carries an `updated_at` so the dashboard can render
// staleness instead of silently showing dead data. A failed provider call
// leaves the previous group intact.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::persist;
use crate::signals::SignalScore;
use crate::types::PriceSource;

/// Maximum candles retained per (ticker, timeframe).
const MAX_CANDLES: usize = 500;
/// Maximum news headlines retained market-wide.
const MAX_HEADLINES: usize = 200;

// =============================================================================
// Market data primitives
// =============================================================================

/// One OHLCV bar. `date` is ISO-8601 — a calendar date for daily bars, a
/// timestamp for intraday bars. Bars are stored oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(date: impl Into<String>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { date: date.into(), open, high, low, close, volume }
    }

    /// Typical price (H+L+C)/3 — the VWAP building block.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Latest quote for one ticker. When a real-time stream value is available it
/// supersedes the REST snapshot and the historical close; the chosen value
/// and its provenance are both retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quote {
    pub last: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub prev_close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub bid: f64,
    pub ask: f64,
    pub price_source: PriceSource,
    #[serde(default)]
    pub earnings_next_date: Option<String>,
    /// "bmo" | "amc" | "unknown"
    #[serde(default)]
    pub announce_time: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Merge a fresher quote in, honoring price-source preference: a lower-
    /// ranked source never overwrites the price of a higher-ranked one unless
    /// the higher-ranked value has gone stale (> 60 s old).
    pub fn merge(&mut self, incoming: Quote) {
        let stale = self
            .updated_at
            .map(|t| (Utc::now() - t).num_seconds() > 60)
            .unwrap_or(true);

        if incoming.price_source.rank() >= self.price_source.rank() || stale {
            self.last = incoming.last;
            self.bid = incoming.bid;
            self.ask = incoming.ask;
            self.price_source = incoming.price_source;
        }

        // Session aggregates always merge forward.
        if incoming.open > 0.0 {
            self.open = incoming.open;
        }
        if incoming.high > 0.0 {
            self.high = self.high.max(incoming.high);
        }
        if incoming.low > 0.0 {
            self.low = if self.low > 0.0 { self.low.min(incoming.low) } else { incoming.low };
        }
        if incoming.prev_close > 0.0 {
            self.prev_close = incoming.prev_close;
        }
        if incoming.volume > 0.0 {
            self.volume = self.volume.max(incoming.volume);
        }
        if incoming.vwap > 0.0 {
            self.vwap = incoming.vwap;
        }
        if incoming.earnings_next_date.is_some() {
            self.earnings_next_date = incoming.earnings_next_date;
            self.announce_time = incoming.announce_time;
        }
        self.updated_at = Some(Utc::now());
    }
}

// =============================================================================
// Options facts
// =============================================================================

/// One unusual-options-activity alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAlert {
    pub ticker: String,
    pub side: String,
    pub premium: f64,
    pub strike: f64,
    pub expiry: String,
    pub is_sweep: bool,
    pub at: DateTime<Utc>,
}

/// Net call/put premium and volume for one slice of time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetPremium {
    pub call_premium: f64,
    pub put_premium: f64,
    pub call_volume: f64,
    pub put_volume: f64,
}

impl NetPremium {
    /// Call/put premium ratio, guarded against an empty put side.
    pub fn premium_ratio(&self) -> Option<f64> {
        if self.put_premium <= 0.0 {
            return None;
        }
        Some(self.call_premium / self.put_premium)
    }
}

/// Options volume concentrated at one strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeFlow {
    pub strike: f64,
    pub call_volume: f64,
    pub put_volume: f64,
    pub net_premium: f64,
}

impl StrikeFlow {
    pub fn total_volume(&self) -> f64 {
        self.call_volume + self.put_volume
    }
}

/// Options volume concentrated in one expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryFlow {
    pub expiry: String,
    pub call_volume: f64,
    pub put_volume: f64,
    pub net_premium: f64,
}

/// Dealer Greek exposures for the whole chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreekExposure {
    pub delta: f64,
    pub gamma: f64,
    pub vanna: f64,
    pub charm: f64,
}

/// Gamma exposure at one strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GexStrike {
    pub strike: f64,
    pub gamma_exposure: f64,
}

/// Net open-interest change since the prior session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OiChange {
    pub call_change: f64,
    pub put_change: f64,
}

/// One point of the IV term structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermPoint {
    pub expiry: String,
    pub days_out: u32,
    pub iv: f64,
}

/// Everything the options provider knows about one ticker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsFacts {
    #[serde(default)]
    pub flow_alerts: Vec<FlowAlert>,
    #[serde(default)]
    pub net_premium: Option<NetPremium>,
    #[serde(default)]
    pub flow_per_strike: Vec<StrikeFlow>,
    #[serde(default)]
    pub intraday_flow_per_strike: Vec<StrikeFlow>,
    #[serde(default)]
    pub flow_per_expiry: Vec<ExpiryFlow>,
    #[serde(default)]
    pub greek_exposure: Option<GreekExposure>,
    #[serde(default)]
    pub spot_gamma: Option<f64>,
    #[serde(default)]
    pub gex_per_strike: Vec<GexStrike>,
    #[serde(default)]
    pub max_pain: Option<f64>,
    #[serde(default)]
    pub oi_change: Option<OiChange>,
    /// 1-year IV rank in [0, 100].
    #[serde(default)]
    pub iv_rank: Option<f64>,
    /// 25-delta risk-reversal skew; negative = puts bid.
    #[serde(default)]
    pub iv_skew: Option<f64>,
    #[serde(default)]
    pub realized_vol: Option<f64>,
    #[serde(default)]
    pub term_structure: Vec<TermPoint>,
    #[serde(default)]
    pub nope: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OptionsFacts {
    /// True when the front of the term structure is below the back (contango).
    pub fn term_in_contango(&self) -> Option<bool> {
        if self.term_structure.len() < 2 {
            return None;
        }
        let front = self.term_structure.first()?;
        let back = self.term_structure.last()?;
        Some(front.iv < back.iv)
    }
}

// =============================================================================
// Dark pool facts
// =============================================================================

/// A single off-exchange print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkPoolPrint {
    pub price: f64,
    pub size: f64,
    pub premium: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DarkPoolFacts {
    #[serde(default)]
    pub prints: Vec<DarkPoolPrint>,
    /// Buy/sell lean of recent prints, in [-1, 1].
    #[serde(default)]
    pub aggressor_score: f64,
    #[serde(default)]
    pub total_premium: f64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Slow-moving (COLD tier) facts
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderTx {
    pub insider: String,
    pub relation: String,
    pub side: String,
    pub shares: f64,
    pub value_usd: f64,
    pub filed_at: String,
}

/// Post-report earnings enrichment used by the earnings signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsEnriched {
    /// "BEAT" | "MISS" | "INLINE"
    #[serde(default)]
    pub beat: Option<String>,
    #[serde(default)]
    pub surprise_pct: Option<f64>,
    #[serde(default)]
    pub afterhours_change: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalFacts {
    /// Short interest as a percentage of float. Values above 100 are
    /// impossible and refused by the scoring engine.
    #[serde(default)]
    pub short_interest_pct: Option<f64>,
    #[serde(default)]
    pub insider_transactions: Vec<InsiderTx>,
    #[serde(default)]
    pub earnings: Option<EarningsEnriched>,
    #[serde(default)]
    pub analyst_rating: Option<String>,
    #[serde(default)]
    pub analyst_target: Option<f64>,
    #[serde(default)]
    pub institutional_ownership_pct: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Market-wide facts
// =============================================================================

/// Bull/bear options tide for the whole market or one sector/ETF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tide {
    pub bull_premium: f64,
    pub bear_premium: f64,
    pub bull_volume: f64,
    pub bear_volume: f64,
}

impl Tide {
    /// Net lean in [-1, 1]; positive is bullish.
    pub fn lean(&self) -> f64 {
        let total = self.bull_premium + self.bear_premium;
        if total <= 0.0 {
            return 0.0;
        }
        (self.bull_premium - self.bear_premium) / total
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VixState {
    pub value: f64,
    pub change_pct: f64,
    pub spiking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub date: String,
    pub name: String,
    pub importance: String,
    #[serde(default)]
    pub ticker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongressTrade {
    pub politician: String,
    pub ticker: String,
    pub side: String,
    pub amount_range: String,
    pub filed_at: String,
    /// Historical hit rate of this politician's disclosed trades, if known.
    #[serde(default)]
    pub track_record_win_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsHeadline {
    pub ticker: Option<String>,
    pub headline: String,
    /// [-1, 1]
    pub sentiment: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoliday {
    pub date: String,
    pub name: String,
    #[serde(default)]
    pub early_close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetImpactEntry {
    pub ticker: String,
    pub net_premium: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFacts {
    #[serde(default)]
    pub market_tide: Option<Tide>,
    #[serde(default)]
    pub sector_tides: HashMap<String, Tide>,
    #[serde(default)]
    pub etf_tides: HashMap<String, Tide>,
    #[serde(default)]
    pub vix: Option<VixState>,
    /// Advancers / (advancers + decliners) in [0, 1].
    #[serde(default)]
    pub breadth: Option<f64>,
    #[serde(default)]
    pub economic_calendar: Vec<CalendarEvent>,
    #[serde(default)]
    pub fda_calendar: Vec<CalendarEvent>,
    #[serde(default)]
    pub top_net_impact: Vec<NetImpactEntry>,
    #[serde(default)]
    pub congress_trades: Vec<CongressTrade>,
    #[serde(default)]
    pub news: Vec<NewsHeadline>,
    #[serde(default)]
    pub holidays: Vec<MarketHoliday>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MarketFacts {
    /// True when `date` (YYYY-MM-DD) is a full market holiday.
    pub fn is_holiday(&self, date: &str) -> bool {
        self.holidays.iter().any(|h| h.date == date && !h.early_close)
    }

    /// True when `date` is a shortened trading day.
    pub fn is_early_close(&self, date: &str) -> bool {
        self.holidays.iter().any(|h| h.date == date && h.early_close)
    }
}

// =============================================================================
// Per-ticker aggregate
// =============================================================================

/// Everything the engine knows about one ticker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerFacts {
    #[serde(default)]
    pub quote: Quote,
    /// Candles keyed by timeframe label: 1m, 5m, 15m, 1h, 4h, 1d.
    #[serde(default)]
    pub candles: HashMap<String, Vec<Candle>>,
    #[serde(default)]
    pub technicals: Option<crate::analyzer::Technicals>,
    #[serde(default)]
    pub options: OptionsFacts,
    #[serde(default)]
    pub dark_pool: DarkPoolFacts,
    #[serde(default)]
    pub fundamentals: FundamentalFacts,
    /// Most recent score from the signal engine (derived; not persisted as
    /// an input to anything).
    #[serde(default)]
    pub last_score: Option<SignalScore>,
}

// =============================================================================
// Store
// =============================================================================

/// Persisted form of the whole store — what `data/state-snapshot.json` holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub tickers: HashMap<String, TickerFacts>,
    #[serde(default)]
    pub market: MarketFacts,
}

/// In-memory keyed store. One writer lock per top-level map; readers clone.
pub struct StateStore {
    tickers: RwLock<HashMap<String, TickerFacts>>,
    market: RwLock<MarketFacts>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            tickers: RwLock::new(HashMap::new()),
            market: RwLock::new(MarketFacts::default()),
        }
    }

    /// Warm-start from a previously persisted snapshot. A missing or
    /// malformed file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let persisted: PersistedState = persist::read_json_or_default(path.as_ref());
        let count = persisted.tickers.len();
        if count > 0 {
            info!(tickers = count, "state snapshot restored from disk");
        }
        Self {
            tickers: RwLock::new(persisted.tickers),
            market: RwLock::new(persisted.market),
        }
    }

    /// Persist the full store atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = PersistedState {
            tickers: self.tickers.read().clone(),
            market: self.market.read().clone(),
        };
        persist::write_json_atomic(path, &snapshot)
    }

    // ── Ticker access ───────────────────────────────────────────────────

    /// Clone one ticker's facts, if known.
    pub fn ticker(&self, symbol: &str) -> Option<TickerFacts> {
        self.tickers.read().get(symbol).cloned()
    }

    /// All known ticker symbols.
    pub fn ticker_symbols(&self) -> Vec<String> {
        self.tickers.read().keys().cloned().collect()
    }

    /// Clone the full ticker map (used by the snapshot builder).
    pub fn all_tickers(&self) -> HashMap<String, TickerFacts> {
        self.tickers.read().clone()
    }

    /// Mutate one ticker's facts under the write lock, creating the entry on
    /// first touch. This is the single mutation path for per-ticker data —
    /// provider merges, TA writes, and score writes all come through here.
    pub fn update_ticker<F>(&self, symbol: &str, f: F)
    where
        F: FnOnce(&mut TickerFacts),
    {
        let mut map = self.tickers.write();
        let entry = map.entry(symbol.to_uppercase()).or_default();
        f(entry);
    }

    /// Drop a ticker entirely (watchlist removal).
    pub fn remove_ticker(&self, symbol: &str) {
        self.tickers.write().remove(symbol);
    }

    /// Replace a ticker's candle series for one timeframe, tail-truncated to
    /// the retention cap.
    pub fn set_candles(&self, symbol: &str, timeframe: &str, mut candles: Vec<Candle>) {
        if candles.len() > MAX_CANDLES {
            candles.drain(..candles.len() - MAX_CANDLES);
        }
        self.update_ticker(symbol, |t| {
            t.candles.insert(timeframe.to_string(), candles);
        });
    }

    // ── Market access ───────────────────────────────────────────────────

    pub fn market(&self) -> MarketFacts {
        self.market.read().clone()
    }

    pub fn update_market<F>(&self, f: F)
    where
        F: FnOnce(&mut MarketFacts),
    {
        let mut market = self.market.write();
        f(&mut market);
        market.updated_at = Some(Utc::now());

        if market.news.len() > MAX_HEADLINES {
            let excess = market.news.len() - MAX_HEADLINES;
            market.news.drain(..excess);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_merge_prefers_stream_over_snapshot() {
        let mut q = Quote {
            last: 100.0,
            price_source: PriceSource::RealTimeStream,
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        q.merge(Quote {
            last: 99.0,
            price_source: PriceSource::Snapshot,
            ..Default::default()
        });
        // Fresh stream price survives the snapshot merge.
        assert_eq!(q.last, 100.0);
        assert_eq!(q.price_source, PriceSource::RealTimeStream);
    }

    #[test]
    fn quote_merge_snapshot_replaces_stale_stream() {
        let mut q = Quote {
            last: 100.0,
            price_source: PriceSource::RealTimeStream,
            updated_at: Some(Utc::now() - chrono::Duration::seconds(120)),
            ..Default::default()
        };
        q.merge(Quote {
            last: 99.0,
            price_source: PriceSource::Snapshot,
            ..Default::default()
        });
        assert_eq!(q.last, 99.0);
        assert_eq!(q.price_source, PriceSource::Snapshot);
    }

    #[test]
    fn quote_merge_session_extremes() {
        let mut q = Quote {
            high: 105.0,
            low: 95.0,
            price_source: PriceSource::Snapshot,
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        q.merge(Quote {
            last: 103.0,
            high: 104.0,
            low: 93.0,
            price_source: PriceSource::Snapshot,
            ..Default::default()
        });
        assert_eq!(q.high, 105.0);
        assert_eq!(q.low, 93.0);
    }

    #[test]
    fn tide_lean_range() {
        let tide = Tide {
            bull_premium: 300.0,
            bear_premium: 100.0,
            ..Default::default()
        };
        assert!((tide.lean() - 0.5).abs() < 1e-10);
        assert_eq!(Tide::default().lean(), 0.0);
    }

    #[test]
    fn candle_cap_enforced() {
        let store = StateStore::new();
        let candles: Vec<Candle> = (0..600)
            .map(|i| Candle::new(format!("2025-01-{i}"), 1.0, 2.0, 0.5, 1.5, 100.0))
            .collect();
        store.set_candles("SPY", "1d", candles);
        let facts = store.ticker("SPY").unwrap();
        assert_eq!(facts.candles["1d"].len(), MAX_CANDLES);
        // Oldest were dropped — the tail survives.
        assert_eq!(facts.candles["1d"].last().unwrap().date, "2025-01-599");
    }

    #[test]
    fn update_ticker_uppercases_key() {
        let store = StateStore::new();
        store.update_ticker("nvda", |t| t.quote.last = 500.0);
        assert!(store.ticker("NVDA").is_some());
        assert!(store.ticker("nvda").is_none());
    }

    #[test]
    fn holiday_lookup() {
        let mut market = MarketFacts::default();
        market.holidays.push(MarketHoliday {
            date: "2025-07-04".into(),
            name: "Independence Day".into(),
            early_close: false,
        });
        market.holidays.push(MarketHoliday {
            date: "2025-07-03".into(),
            name: "Early close".into(),
            early_close: true,
        });
        assert!(market.is_holiday("2025-07-04"));
        assert!(!market.is_holiday("2025-07-03"));
        assert!(market.is_early_close("2025-07-03"));
    }

    #[test]
    fn store_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "meridian-state-test-{}.json",
            std::process::id()
        ));
        let store = StateStore::new();
        store.update_ticker("AMD", |t| {
            t.quote.last = 170.0;
            t.quote.price_source = PriceSource::Snapshot;
        });
        store.update_market(|m| {
            m.breadth = Some(0.62);
        });
        store.save(&path).unwrap();

        let restored = StateStore::load(&path);
        assert_eq!(restored.ticker("AMD").unwrap().quote.last, 170.0);
        assert_eq!(restored.market().breadth, Some(0.62));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn term_structure_contango() {
        let mut opts = OptionsFacts::default();
        assert!(opts.term_in_contango().is_none());
        opts.term_structure = vec![
            TermPoint { expiry: "2025-04-17".into(), days_out: 7, iv: 0.30 },
            TermPoint { expiry: "2025-06-20".into(), days_out: 70, iv: 0.38 },
        ];
        assert_eq!(opts.term_in_contango(), Some(true));
    }
}
