// =============================================================================
// Data-source abstraction — one call shape over N providers
// =============================================================================
//
// Every external provider exposes the same shape: a typed request in, a
// `Result<Option<T>>` out. `Ok(None)` means the provider has no data for the
// request (not an error); `Err` means the call failed and the caller must
// leave the previous state entry intact. The orchestrator fans out
// independent calls and tolerates partial success — one provider failing
// never poisons a cycle.
//
// Default method bodies return `Ok(None)` so an adapter implements only the
// capabilities it actually has.
// =============================================================================

pub mod rest;
pub mod tick_stream;

use anyhow::Result;
use async_trait::async_trait;

use crate::state::{
    Candle, CalendarEvent, CongressTrade, DarkPoolFacts, EarningsEnriched, ExpiryFlow, FlowAlert,
    GexStrike, GreekExposure, MarketHoliday, NetImpactEntry, NetPremium, NewsHeadline, OiChange,
    Quote, StrikeFlow, TermPoint, Tide, VixState,
};

/// A screener row from the small-cap runner scan.
#[derive(Debug, Clone)]
pub struct RunnerCandidate {
    pub ticker: String,
    pub change_pct: f64,
    pub volume: f64,
    pub market_cap: f64,
    pub relative_volume: f64,
    pub price: f64,
}

/// A gainers/losers row.
#[derive(Debug, Clone)]
pub struct MoverRow {
    pub ticker: String,
    pub change_pct: f64,
    pub price: f64,
}

/// Uniform capability surface over the market-data providers.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    // ── HOT tier ────────────────────────────────────────────────────────
    async fn quote(&self, _ticker: &str) -> Result<Option<Quote>> {
        Ok(None)
    }
    async fn flow_alerts(&self, _ticker: &str) -> Result<Option<Vec<FlowAlert>>> {
        Ok(None)
    }
    async fn net_premium(&self, _ticker: &str) -> Result<Option<NetPremium>> {
        Ok(None)
    }
    async fn dark_pool(&self, _ticker: &str) -> Result<Option<DarkPoolFacts>> {
        Ok(None)
    }
    async fn gex_per_strike(&self, _ticker: &str) -> Result<Option<Vec<GexStrike>>> {
        Ok(None)
    }
    async fn candles(&self, _ticker: &str, _timeframe: &str, _limit: u32) -> Result<Option<Vec<Candle>>> {
        Ok(None)
    }

    // ── WARM tier ───────────────────────────────────────────────────────
    async fn iv_rank(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn iv_skew(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn max_pain(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn oi_change(&self, _ticker: &str) -> Result<Option<OiChange>> {
        Ok(None)
    }
    async fn greek_exposure(&self, _ticker: &str) -> Result<Option<GreekExposure>> {
        Ok(None)
    }
    async fn spot_gamma(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn nope(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn flow_per_strike(&self, _ticker: &str) -> Result<Option<Vec<StrikeFlow>>> {
        Ok(None)
    }
    async fn intraday_flow_per_strike(&self, _ticker: &str) -> Result<Option<Vec<StrikeFlow>>> {
        Ok(None)
    }
    async fn flow_per_expiry(&self, _ticker: &str) -> Result<Option<Vec<ExpiryFlow>>> {
        Ok(None)
    }

    // ── COLD tier ───────────────────────────────────────────────────────
    async fn short_interest(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn insider_transactions(&self, _ticker: &str) -> Result<Option<Vec<crate::state::InsiderTx>>> {
        Ok(None)
    }
    async fn earnings_enriched(&self, _ticker: &str) -> Result<Option<EarningsEnriched>> {
        Ok(None)
    }
    async fn realized_vol(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn term_structure(&self, _ticker: &str) -> Result<Option<Vec<TermPoint>>> {
        Ok(None)
    }
    async fn analyst_summary(&self, _ticker: &str) -> Result<Option<(String, f64)>> {
        Ok(None)
    }
    async fn institutional_ownership(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn market_cap(&self, _ticker: &str) -> Result<Option<f64>> {
        Ok(None)
    }

    // ── Market-wide ─────────────────────────────────────────────────────
    async fn market_tide(&self) -> Result<Option<Tide>> {
        Ok(None)
    }
    async fn sector_tides(&self) -> Result<Option<Vec<(String, Tide)>>> {
        Ok(None)
    }
    async fn etf_tides(&self) -> Result<Option<Vec<(String, Tide)>>> {
        Ok(None)
    }
    async fn vix(&self) -> Result<Option<VixState>> {
        Ok(None)
    }
    async fn breadth(&self) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn economic_calendar(&self) -> Result<Option<Vec<CalendarEvent>>> {
        Ok(None)
    }
    async fn fda_calendar(&self) -> Result<Option<Vec<CalendarEvent>>> {
        Ok(None)
    }
    async fn top_net_impact(&self) -> Result<Option<Vec<NetImpactEntry>>> {
        Ok(None)
    }
    async fn congress_trades(&self) -> Result<Option<Vec<CongressTrade>>> {
        Ok(None)
    }
    async fn news(&self) -> Result<Option<Vec<NewsHeadline>>> {
        Ok(None)
    }
    async fn market_holidays(&self) -> Result<Option<Vec<MarketHoliday>>> {
        Ok(None)
    }
    async fn runner_screener(&self) -> Result<Option<Vec<RunnerCandidate>>> {
        Ok(None)
    }
    async fn movers(&self) -> Result<Option<Vec<MoverRow>>> {
        Ok(None)
    }
}

/// Collapse a provider call into the merge-or-skip decision: `Some` merges,
/// `None` (no data or failure) leaves the previous state entry alone. Logs
/// one warning per failed call.
pub fn null_on_error<T>(provider: &str, endpoint: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(provider, endpoint, error = %e, "provider call failed — keeping stale entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    #[async_trait]
    impl MarketDataSource for EmptySource {
        fn name(&self) -> &'static str {
            "empty"
        }
    }

    #[tokio::test]
    async fn default_capabilities_return_none() {
        let src = EmptySource;
        assert!(src.quote("SPY").await.unwrap().is_none());
        assert!(src.market_tide().await.unwrap().is_none());
        assert!(src.runner_screener().await.unwrap().is_none());
    }

    #[test]
    fn null_on_error_swallows_failures() {
        let ok: Result<Option<u32>> = Ok(Some(5));
        assert_eq!(null_on_error("p", "e", ok), Some(5));

        let none: Result<Option<u32>> = Ok(None);
        assert_eq!(null_on_error("p", "e", none), None);

        let err: Result<Option<u32>> = Err(anyhow::anyhow!("boom"));
        assert_eq!(null_on_error("p", "e", err), None);
    }
}
