// =============================================================================
// REST Provider Adapter — the aggregated market-data API
// =============================================================================
//
// One reqwest client with a per-call timeout and the API key as a default
// header. Every endpoint returns `Result<Option<T>>` per the source
// contract: HTTP or parse failure is an `Err` the orchestrator converts to
// "keep stale entry"; an empty body is `Ok(None)`.
//
// Every outbound request increments the shared daily call counter the
// scheduler budgets against.
//
// SECURITY: the API key is never logged; Debug redacts it.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::sources::{MarketDataSource, MoverRow, RunnerCandidate};
use crate::state::{
    CalendarEvent, Candle, CongressTrade, DarkPoolFacts, DarkPoolPrint, EarningsEnriched,
    ExpiryFlow, FlowAlert, GexStrike, GreekExposure, InsiderTx, MarketHoliday, NetImpactEntry,
    NetPremium, NewsHeadline, OiChange, Quote, StrikeFlow, TermPoint, Tide, VixState,
};
use crate::types::PriceSource;

/// Per-call timeout. Providers that dawdle longer than this return "no data"
/// for the cycle instead of stalling it.
const CALL_TIMEOUT_SECS: u64 = 8;

pub struct RestProvider {
    client: reqwest::Client,
    base_url: String,
    /// Shared with the scheduler for daily budgeting.
    call_counter: Arc<AtomicU64>,
}

impl RestProvider {
    pub fn new(base_url: impl Into<String>, api_key: &str, call_counter: Arc<AtomicU64>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert("Authorization", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(CALL_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            call_counter,
        }
    }

    /// GET a JSON document, counting the call against the daily budget.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        self.call_counter.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("GET {path} returned non-JSON"))?;

        if !status.is_success() {
            anyhow::bail!("GET {path} returned {status}: {body}");
        }

        Ok(body)
    }

    /// Parse a value that providers send as either string or number.
    fn num(val: &serde_json::Value) -> f64 {
        if let Some(n) = val.as_f64() {
            n
        } else if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0.0)
        } else {
            0.0
        }
    }

    fn str_of(val: &serde_json::Value) -> String {
        val.as_str().unwrap_or_default().to_string()
    }

    fn rows<'a>(body: &'a serde_json::Value) -> &'a [serde_json::Value] {
        body["data"].as_array().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[async_trait]
impl MarketDataSource for RestProvider {
    fn name(&self) -> &'static str {
        "rest-aggregate"
    }

    // ── HOT tier ────────────────────────────────────────────────────────

    async fn quote(&self, ticker: &str) -> Result<Option<Quote>> {
        let body = self.get_json(&format!("/v1/quote?ticker={ticker}")).await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }

        Ok(Some(Quote {
            last: Self::num(&d["last"]),
            open: Self::num(&d["open"]),
            high: Self::num(&d["high"]),
            low: Self::num(&d["low"]),
            prev_close: Self::num(&d["prev_close"]),
            volume: Self::num(&d["volume"]),
            vwap: Self::num(&d["vwap"]),
            bid: Self::num(&d["bid"]),
            ask: Self::num(&d["ask"]),
            price_source: PriceSource::Snapshot,
            earnings_next_date: d["earnings_date"].as_str().map(String::from),
            announce_time: d["announce_time"].as_str().map(String::from),
            updated_at: Some(Utc::now()),
        }))
    }

    async fn flow_alerts(&self, ticker: &str) -> Result<Option<Vec<FlowAlert>>> {
        let body = self.get_json(&format!("/v1/options/flow-alerts?ticker={ticker}")).await?;
        let alerts: Vec<FlowAlert> = Self::rows(&body)
            .iter()
            .map(|row| FlowAlert {
                ticker: ticker.to_string(),
                side: Self::str_of(&row["side"]),
                premium: Self::num(&row["premium"]),
                strike: Self::num(&row["strike"]),
                expiry: Self::str_of(&row["expiry"]),
                is_sweep: row["is_sweep"].as_bool().unwrap_or(false),
                at: Utc::now(),
            })
            .collect();
        Ok((!alerts.is_empty()).then_some(alerts))
    }

    async fn net_premium(&self, ticker: &str) -> Result<Option<NetPremium>> {
        let body = self.get_json(&format!("/v1/options/net-premium?ticker={ticker}")).await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        Ok(Some(NetPremium {
            call_premium: Self::num(&d["call_premium"]),
            put_premium: Self::num(&d["put_premium"]),
            call_volume: Self::num(&d["call_volume"]),
            put_volume: Self::num(&d["put_volume"]),
        }))
    }

    async fn dark_pool(&self, ticker: &str) -> Result<Option<DarkPoolFacts>> {
        let body = self.get_json(&format!("/v1/darkpool?ticker={ticker}")).await?;
        let rows = Self::rows(&body);
        if rows.is_empty() {
            return Ok(None);
        }

        let prints: Vec<DarkPoolPrint> = rows
            .iter()
            .map(|row| DarkPoolPrint {
                price: Self::num(&row["price"]),
                size: Self::num(&row["size"]),
                premium: Self::num(&row["premium"]),
                at: Utc::now(),
            })
            .collect();
        let total_premium: f64 = prints.iter().map(|p| p.premium).sum();

        Ok(Some(DarkPoolFacts {
            prints,
            aggressor_score: Self::num(&body["aggressor_score"]).clamp(-1.0, 1.0),
            total_premium,
            updated_at: Some(Utc::now()),
        }))
    }

    async fn gex_per_strike(&self, ticker: &str) -> Result<Option<Vec<GexStrike>>> {
        let body = self.get_json(&format!("/v1/options/gex?ticker={ticker}")).await?;
        let strikes: Vec<GexStrike> = Self::rows(&body)
            .iter()
            .map(|row| GexStrike {
                strike: Self::num(&row["strike"]),
                gamma_exposure: Self::num(&row["gamma_exposure"]),
            })
            .collect();
        Ok((!strikes.is_empty()).then_some(strikes))
    }

    async fn candles(&self, ticker: &str, timeframe: &str, limit: u32) -> Result<Option<Vec<Candle>>> {
        let body = self
            .get_json(&format!("/v1/candles?ticker={ticker}&timeframe={timeframe}&limit={limit}"))
            .await?;
        let rows = Self::rows(&body);
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!(ticker, timeframe, "skipping malformed candle row");
                    continue;
                }
            };
            candles.push(Candle {
                date: Self::str_of(&arr[0]),
                open: Self::num(&arr[1]),
                high: Self::num(&arr[2]),
                low: Self::num(&arr[3]),
                close: Self::num(&arr[4]),
                volume: Self::num(&arr[5]),
            });
        }
        debug!(ticker, timeframe, count = candles.len(), "candles fetched");
        Ok((!candles.is_empty()).then_some(candles))
    }

    // ── WARM tier ───────────────────────────────────────────────────────

    async fn iv_rank(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/options/iv-rank?ticker={ticker}")).await?;
        Ok(body["data"]["iv_rank"].as_f64())
    }

    async fn iv_skew(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/options/skew?ticker={ticker}")).await?;
        Ok(body["data"]["risk_reversal"].as_f64())
    }

    async fn max_pain(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/options/max-pain?ticker={ticker}")).await?;
        Ok(body["data"]["max_pain"].as_f64())
    }

    async fn oi_change(&self, ticker: &str) -> Result<Option<OiChange>> {
        let body = self.get_json(&format!("/v1/options/oi-change?ticker={ticker}")).await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        Ok(Some(OiChange {
            call_change: Self::num(&d["call_change"]),
            put_change: Self::num(&d["put_change"]),
        }))
    }

    async fn greek_exposure(&self, ticker: &str) -> Result<Option<GreekExposure>> {
        let body = self.get_json(&format!("/v1/options/greeks?ticker={ticker}")).await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        Ok(Some(GreekExposure {
            delta: Self::num(&d["delta"]),
            gamma: Self::num(&d["gamma"]),
            vanna: Self::num(&d["vanna"]),
            charm: Self::num(&d["charm"]),
        }))
    }

    async fn spot_gamma(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/options/spot-exposures?ticker={ticker}")).await?;
        Ok(body["data"]["gamma"].as_f64())
    }

    async fn nope(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/options/nope?ticker={ticker}")).await?;
        Ok(body["data"]["nope"].as_f64())
    }

    async fn flow_per_strike(&self, ticker: &str) -> Result<Option<Vec<StrikeFlow>>> {
        self.strike_flow(&format!("/v1/options/flow-per-strike?ticker={ticker}")).await
    }

    async fn intraday_flow_per_strike(&self, ticker: &str) -> Result<Option<Vec<StrikeFlow>>> {
        self.strike_flow(&format!("/v1/options/flow-per-strike-intraday?ticker={ticker}")).await
    }

    async fn flow_per_expiry(&self, ticker: &str) -> Result<Option<Vec<ExpiryFlow>>> {
        let body = self.get_json(&format!("/v1/options/flow-per-expiry?ticker={ticker}")).await?;
        let flows: Vec<ExpiryFlow> = Self::rows(&body)
            .iter()
            .map(|row| ExpiryFlow {
                expiry: Self::str_of(&row["expiry"]),
                call_volume: Self::num(&row["call_volume"]),
                put_volume: Self::num(&row["put_volume"]),
                net_premium: Self::num(&row["net_premium"]),
            })
            .collect();
        Ok((!flows.is_empty()).then_some(flows))
    }

    // ── COLD tier ───────────────────────────────────────────────────────

    async fn short_interest(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/short-interest?ticker={ticker}")).await?;
        Ok(body["data"]["si_pct_float"].as_f64())
    }

    async fn insider_transactions(&self, ticker: &str) -> Result<Option<Vec<InsiderTx>>> {
        let body = self.get_json(&format!("/v1/insider?ticker={ticker}")).await?;
        let txs: Vec<InsiderTx> = Self::rows(&body)
            .iter()
            .map(|row| InsiderTx {
                insider: Self::str_of(&row["insider"]),
                relation: Self::str_of(&row["relation"]),
                side: Self::str_of(&row["side"]),
                shares: Self::num(&row["shares"]),
                value_usd: Self::num(&row["value_usd"]),
                filed_at: Self::str_of(&row["filed_at"]),
            })
            .collect();
        Ok((!txs.is_empty()).then_some(txs))
    }

    async fn earnings_enriched(&self, ticker: &str) -> Result<Option<EarningsEnriched>> {
        let body = self.get_json(&format!("/v1/earnings?ticker={ticker}")).await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        Ok(Some(EarningsEnriched {
            beat: d["beat"].as_str().map(String::from),
            surprise_pct: d["surprise_pct"].as_f64(),
            afterhours_change: d["afterhours_change"].as_f64(),
        }))
    }

    async fn realized_vol(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/realized-vol?ticker={ticker}")).await?;
        Ok(body["data"]["rv_30d"].as_f64())
    }

    async fn term_structure(&self, ticker: &str) -> Result<Option<Vec<TermPoint>>> {
        let body = self.get_json(&format!("/v1/options/term-structure?ticker={ticker}")).await?;
        let points: Vec<TermPoint> = Self::rows(&body)
            .iter()
            .map(|row| TermPoint {
                expiry: Self::str_of(&row["expiry"]),
                days_out: row["days_out"].as_u64().unwrap_or(0) as u32,
                iv: Self::num(&row["iv"]),
            })
            .collect();
        Ok((!points.is_empty()).then_some(points))
    }

    async fn analyst_summary(&self, ticker: &str) -> Result<Option<(String, f64)>> {
        let body = self.get_json(&format!("/v1/analyst?ticker={ticker}")).await?;
        let d = &body["data"];
        let rating = d["consensus"].as_str();
        let target = d["price_target"].as_f64();
        Ok(rating.zip(target).map(|(r, t)| (r.to_string(), t)))
    }

    async fn institutional_ownership(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/institutional?ticker={ticker}")).await?;
        Ok(body["data"]["ownership_pct"].as_f64())
    }

    async fn market_cap(&self, ticker: &str) -> Result<Option<f64>> {
        let body = self.get_json(&format!("/v1/fundamentals?ticker={ticker}")).await?;
        Ok(body["data"]["market_cap"].as_f64())
    }

    // ── Market-wide ─────────────────────────────────────────────────────

    async fn market_tide(&self) -> Result<Option<Tide>> {
        let body = self.get_json("/v1/market/tide").await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        Ok(Some(Self::tide_of(d)))
    }

    async fn sector_tides(&self) -> Result<Option<Vec<(String, Tide)>>> {
        let body = self.get_json("/v1/market/sector-tides").await?;
        Ok(Self::named_tides(&body))
    }

    async fn etf_tides(&self) -> Result<Option<Vec<(String, Tide)>>> {
        let body = self.get_json("/v1/market/etf-tides").await?;
        Ok(Self::named_tides(&body))
    }

    async fn vix(&self) -> Result<Option<VixState>> {
        let body = self.get_json("/v1/market/vix").await?;
        let d = &body["data"];
        if d.is_null() {
            return Ok(None);
        }
        let value = Self::num(&d["value"]);
        let change_pct = Self::num(&d["change_pct"]);
        Ok(Some(VixState {
            value,
            change_pct,
            spiking: change_pct > 15.0,
        }))
    }

    async fn breadth(&self) -> Result<Option<f64>> {
        let body = self.get_json("/v1/market/breadth").await?;
        Ok(body["data"]["advancers_ratio"].as_f64())
    }

    async fn economic_calendar(&self) -> Result<Option<Vec<CalendarEvent>>> {
        let body = self.get_json("/v1/calendar/economic").await?;
        Ok(Self::calendar_of(&body))
    }

    async fn fda_calendar(&self) -> Result<Option<Vec<CalendarEvent>>> {
        let body = self.get_json("/v1/calendar/fda").await?;
        Ok(Self::calendar_of(&body))
    }

    async fn top_net_impact(&self) -> Result<Option<Vec<NetImpactEntry>>> {
        let body = self.get_json("/v1/market/top-net-impact").await?;
        let entries: Vec<NetImpactEntry> = Self::rows(&body)
            .iter()
            .map(|row| NetImpactEntry {
                ticker: Self::str_of(&row["ticker"]),
                net_premium: Self::num(&row["net_premium"]),
            })
            .collect();
        Ok((!entries.is_empty()).then_some(entries))
    }

    async fn congress_trades(&self) -> Result<Option<Vec<CongressTrade>>> {
        let body = self.get_json("/v1/congress/trades").await?;
        let trades: Vec<CongressTrade> = Self::rows(&body)
            .iter()
            .map(|row| CongressTrade {
                politician: Self::str_of(&row["politician"]),
                ticker: Self::str_of(&row["ticker"]),
                side: Self::str_of(&row["side"]),
                amount_range: Self::str_of(&row["amount_range"]),
                filed_at: Self::str_of(&row["filed_at"]),
                track_record_win_rate: row["track_record_win_rate"].as_f64(),
            })
            .collect();
        Ok((!trades.is_empty()).then_some(trades))
    }

    async fn news(&self) -> Result<Option<Vec<NewsHeadline>>> {
        let body = self.get_json("/v1/news").await?;
        let headlines: Vec<NewsHeadline> = Self::rows(&body)
            .iter()
            .map(|row| NewsHeadline {
                ticker: row["ticker"].as_str().map(String::from),
                headline: Self::str_of(&row["headline"]),
                sentiment: Self::num(&row["sentiment"]).clamp(-1.0, 1.0),
                at: Utc::now(),
            })
            .collect();
        Ok((!headlines.is_empty()).then_some(headlines))
    }

    async fn market_holidays(&self) -> Result<Option<Vec<MarketHoliday>>> {
        let body = self.get_json("/v1/market/holidays").await?;
        let holidays: Vec<MarketHoliday> = Self::rows(&body)
            .iter()
            .map(|row| MarketHoliday {
                date: Self::str_of(&row["date"]),
                name: Self::str_of(&row["name"]),
                early_close: row["early_close"].as_bool().unwrap_or(false),
            })
            .collect();
        Ok((!holidays.is_empty()).then_some(holidays))
    }

    async fn runner_screener(&self) -> Result<Option<Vec<RunnerCandidate>>> {
        let body = self
            .get_json("/v1/screener/runners?min_change=10&min_volume=500000&max_cap=50000000&min_rvol=3")
            .await?;
        let rows: Vec<RunnerCandidate> = Self::rows(&body)
            .iter()
            .map(|row| RunnerCandidate {
                ticker: Self::str_of(&row["ticker"]),
                change_pct: Self::num(&row["change_pct"]),
                volume: Self::num(&row["volume"]),
                market_cap: Self::num(&row["market_cap"]),
                relative_volume: Self::num(&row["relative_volume"]),
                price: Self::num(&row["price"]),
            })
            .collect();
        Ok((!rows.is_empty()).then_some(rows))
    }

    async fn movers(&self) -> Result<Option<Vec<MoverRow>>> {
        let body = self.get_json("/v1/market/movers").await?;
        let rows: Vec<MoverRow> = Self::rows(&body)
            .iter()
            .map(|row| MoverRow {
                ticker: Self::str_of(&row["ticker"]),
                change_pct: Self::num(&row["change_pct"]),
                price: Self::num(&row["price"]),
            })
            .collect();
        Ok((!rows.is_empty()).then_some(rows))
    }
}

impl RestProvider {
    async fn strike_flow(&self, path: &str) -> Result<Option<Vec<StrikeFlow>>> {
        let body = self.get_json(path).await?;
        let flows: Vec<StrikeFlow> = Self::rows(&body)
            .iter()
            .map(|row| StrikeFlow {
                strike: Self::num(&row["strike"]),
                call_volume: Self::num(&row["call_volume"]),
                put_volume: Self::num(&row["put_volume"]),
                net_premium: Self::num(&row["net_premium"]),
            })
            .collect();
        Ok((!flows.is_empty()).then_some(flows))
    }

    fn tide_of(d: &serde_json::Value) -> Tide {
        Tide {
            bull_premium: Self::num(&d["bull_premium"]),
            bear_premium: Self::num(&d["bear_premium"]),
            bull_volume: Self::num(&d["bull_volume"]),
            bear_volume: Self::num(&d["bear_volume"]),
        }
    }

    fn named_tides(body: &serde_json::Value) -> Option<Vec<(String, Tide)>> {
        let tides: Vec<(String, Tide)> = Self::rows(body)
            .iter()
            .map(|row| (Self::str_of(&row["name"]), Self::tide_of(row)))
            .collect();
        (!tides.is_empty()).then_some(tides)
    }

    fn calendar_of(body: &serde_json::Value) -> Option<Vec<CalendarEvent>> {
        let events: Vec<CalendarEvent> = Self::rows(body)
            .iter()
            .map(|row| CalendarEvent {
                date: Self::str_of(&row["date"]),
                name: Self::str_of(&row["name"]),
                importance: Self::str_of(&row["importance"]),
                ticker: row["ticker"].as_str().map(String::from),
            })
            .collect();
        (!events.is_empty()).then_some(events)
    }
}

impl std::fmt::Debug for RestProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_parses_strings_and_numbers() {
        assert_eq!(RestProvider::num(&serde_json::json!(3.5)), 3.5);
        assert_eq!(RestProvider::num(&serde_json::json!("3.5")), 3.5);
        assert_eq!(RestProvider::num(&serde_json::json!("garbage")), 0.0);
        assert_eq!(RestProvider::num(&serde_json::json!(null)), 0.0);
    }

    #[test]
    fn tide_parsing() {
        let d = serde_json::json!({
            "bull_premium": 5000000.0,
            "bear_premium": "2500000",
            "bull_volume": 120000,
            "bear_volume": 80000
        });
        let tide = RestProvider::tide_of(&d);
        assert_eq!(tide.bull_premium, 5_000_000.0);
        assert_eq!(tide.bear_premium, 2_500_000.0);
        assert!(tide.lean() > 0.0);
    }

    #[test]
    fn calendar_parsing_skips_empty() {
        let body = serde_json::json!({ "data": [] });
        assert!(RestProvider::calendar_of(&body).is_none());

        let body = serde_json::json!({
            "data": [{ "date": "2025-03-14", "name": "CPI", "importance": "high" }]
        });
        let events = RestProvider::calendar_of(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "CPI");
        assert!(events[0].ticker.is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let provider = RestProvider::new(
            "https://api.example.com",
            "super-secret",
            Arc::new(AtomicU64::new(0)),
        );
        let debug = format!("{provider:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn call_counter_shared() {
        let counter = Arc::new(AtomicU64::new(0));
        let _provider = RestProvider::new("https://api.example.com", "k", counter.clone());
        // The counter only moves on actual calls; construction is free.
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
