// =============================================================================
// Volatility Runner — small-cap screener for fast movers
// =============================================================================
//
// Screener filters (applied server-side and re-checked here): change >= 10%,
// volume >= 500k, market cap < $50M, relative volume >= 3x. Watchlist and
// common ETFs are excluded, each ticker carries a 10-minute cooldown, and
// only the top two fresh runners per pass get a full engine score.
// =============================================================================

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::discovery::{
    process_discovery, score_candidate, top_signals, DiscoveryEntry, DiscoveryMeta, ETF_BLACKLIST,
};
use crate::sources::null_on_error;
use crate::types::{canonical_ticker, DiscoverySource};

const MIN_CHANGE_PCT: f64 = 10.0;
const MIN_VOLUME: f64 = 500_000.0;
const MAX_MARKET_CAP: f64 = 50_000_000.0;
const MIN_RELATIVE_VOLUME: f64 = 3.0;
/// Fresh runners scored per pass.
const MAX_RUNNERS: usize = 2;

/// One screener pass. Returns how many runners were scored.
pub async fn run_volatility_scan(app: &Arc<AppState>) -> usize {
    let provider = app.provider.clone();
    let Some(rows) = null_on_error(provider.name(), "runner_screener", provider.runner_screener().await)
    else {
        return 0;
    };

    let config = app.config.read().clone();
    let watchlist: Vec<String> = config.watchlist.clone();
    let cooldown = Duration::minutes(config.runner_cooldown_minutes);
    let ttl = Duration::minutes(config.discovery_ttl_minutes);
    let now = Utc::now();

    let mut fresh: Vec<_> = rows
        .into_iter()
        .filter(|r| {
            r.change_pct >= MIN_CHANGE_PCT
                && r.volume >= MIN_VOLUME
                && r.market_cap > 0.0
                && r.market_cap < MAX_MARKET_CAP
                && r.relative_volume >= MIN_RELATIVE_VOLUME
        })
        .filter_map(|mut r| {
            r.ticker = canonical_ticker(&r.ticker)?;
            Some(r)
        })
        .filter(|r| !watchlist.contains(&r.ticker))
        .filter(|r| !ETF_BLACKLIST.contains(&r.ticker.as_str()))
        .filter(|r| !app.discoveries.runner_on_cooldown(&r.ticker, now, cooldown))
        .collect();

    // Hardest movers first; take the top two.
    fresh.sort_by(|a, b| b.change_pct.partial_cmp(&a.change_pct).unwrap_or(std::cmp::Ordering::Equal));
    fresh.truncate(MAX_RUNNERS);

    if fresh.is_empty() {
        debug!("volatility screener found no fresh runners");
        return 0;
    }

    let mut scored = 0;
    for row in fresh {
        app.discoveries.mark_runner_seen(&row.ticker, now);

        let Some(score) = score_candidate(app, &row.ticker).await else {
            continue;
        };
        scored += 1;

        let entry = DiscoveryEntry {
            ticker: row.ticker.clone(),
            source: DiscoverySource::VolatilityRunner,
            discovered_at: now,
            price: row.price,
            direction: score.direction,
            confidence: score.confidence,
            top_signals: top_signals(&score, 3),
            meta: DiscoveryMeta {
                relative_volume: Some(row.relative_volume),
                gap_pct: Some(row.change_pct),
                halt_reason: None,
            },
            expires_at: now + ttl,
        };
        process_discovery(app, entry, Some(&score));
    }

    info!(scored, "volatility runner pass complete");
    scored
}
