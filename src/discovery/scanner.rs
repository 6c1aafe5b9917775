// =============================================================================
// Market Scanner — harvest candidates from market-wide flow and catalysts
// =============================================================================
//
// Runs deferred 60 s after each HOT cycle so the provider's rate window has
// room. Candidates come from the facts the cycle already paid for — top net
// premium impact, congressional and insider tapes, news — plus one movers
// call. Watchlist tickers and the ETF blacklist never qualify; everything
// else gets a full engine pass through the common sink.
// =============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::discovery::{
    process_discovery, score_candidate, top_signals, DiscoveryEntry, DiscoveryMeta, ETF_BLACKLIST,
};
use crate::sources::null_on_error;
use crate::types::{canonical_ticker, DiscoverySource};

/// Candidates fully scored per scan pass.
const MAX_SCORED: usize = 5;
/// Movers need a move worth looking at.
const MIN_MOVER_CHANGE_PCT: f64 = 4.0;

/// One scan pass. Returns how many candidates were scored.
pub async fn run_scan(app: &Arc<AppState>) -> usize {
    let watchlist: BTreeSet<String> = app.config.read().watchlist.iter().cloned().collect();
    let market = app.store.market();

    let mut candidates: BTreeSet<String> = BTreeSet::new();

    // ── Harvest from facts already in the store ─────────────────────────
    for entry in &market.top_net_impact {
        candidates.insert(entry.ticker.clone());
    }
    for trade in &market.congress_trades {
        if trade.side == "buy" {
            candidates.insert(trade.ticker.clone());
        }
    }
    for headline in market.news.iter().rev().take(50) {
        if let Some(ticker) = &headline.ticker {
            if headline.sentiment.abs() > 0.5 {
                candidates.insert(ticker.clone());
            }
        }
    }

    // ── One movers call on top ──────────────────────────────────────────
    let provider = app.provider.clone();
    if let Some(movers) = null_on_error(provider.name(), "movers", provider.movers().await) {
        for row in movers {
            if row.change_pct.abs() >= MIN_MOVER_CHANGE_PCT {
                candidates.insert(row.ticker);
            }
        }
    }

    // ── Filter ──────────────────────────────────────────────────────────
    let filtered: Vec<String> = candidates
        .into_iter()
        .filter_map(|t| canonical_ticker(&t))
        .filter(|t| !watchlist.contains(t))
        .filter(|t| !ETF_BLACKLIST.contains(&t.as_str()))
        .filter(|t| !app.discoveries.contains(t))
        .take(MAX_SCORED)
        .collect();

    if filtered.is_empty() {
        debug!("scan pass found no new candidates");
        return 0;
    }

    let ttl = Duration::minutes(app.config.read().discovery_ttl_minutes);
    let mut scored = 0;

    for ticker in filtered {
        let Some(score) = score_candidate(app, &ticker).await else {
            continue;
        };
        scored += 1;

        let price = app.store.ticker(&ticker).map(|f| f.quote.last).unwrap_or(0.0);
        let now = Utc::now();
        let entry = DiscoveryEntry {
            ticker: ticker.clone(),
            source: DiscoverySource::Scanner,
            discovered_at: now,
            price,
            direction: score.direction,
            confidence: score.confidence,
            top_signals: top_signals(&score, 3),
            meta: DiscoveryMeta::default(),
            expires_at: now + ttl,
        };
        process_discovery(app, entry, Some(&score));
    }

    info!(scored, "market scan pass complete");
    scored
}
