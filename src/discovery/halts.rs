// =============================================================================
// Halt-Resume Watcher — trade-halt RSS feed transitions
// =============================================================================
//
// Polls the exchange trade-halts RSS feed on a 60-second timer. A row whose
// previous state was `halted` and whose current state is `resumed` is the
// event worth money: the ticker gets a full engine score, a tick
// subscription with the standard TTL, and an alert at confidence >= 50.
// At most three resumes are processed per poll. Resumed tickers never enter
// the watchlist.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::discovery::{
    process_discovery, score_candidate, top_signals, DiscoveryEntry, DiscoveryMeta,
};
use crate::types::{canonical_ticker, DiscoverySource};

/// Default feed location; override with `HALT_FEED_URL`.
pub const DEFAULT_FEED_URL: &str = "https://www.nasdaqtrader.com/rss.aspx?feed=tradehalts";
/// Resumes scored per poll.
const MAX_RESUMES_PER_POLL: usize = 3;

/// One parsed feed row.
#[derive(Debug, Clone, PartialEq)]
pub struct HaltRow {
    pub ticker: String,
    /// "halted" or "resumed".
    pub state: String,
    pub reason: String,
}

/// Tracks the last seen state per ticker so transitions are detectable.
pub struct HaltWatcher {
    states: RwLock<HashMap<String, String>>,
    client: reqwest::Client,
    feed_url: String,
}

impl HaltWatcher {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build halt-feed client"),
            feed_url: feed_url.into(),
        }
    }

    /// Fetch and parse the feed.
    pub async fn fetch_rows(&self) -> Result<Vec<HaltRow>> {
        let bytes = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .context("halt feed request failed")?
            .bytes()
            .await
            .context("halt feed body read failed")?;

        let channel = rss::Channel::read_from(&bytes[..]).context("halt feed is not valid RSS")?;
        Ok(channel.items().iter().filter_map(parse_item).collect())
    }

    /// Apply a batch of rows and return tickers that transitioned
    /// halted -> resumed on this poll.
    pub fn apply_rows(&self, rows: &[HaltRow]) -> Vec<HaltRow> {
        let mut states = self.states.write();
        let mut resumed = Vec::new();

        for row in rows {
            let prev = states.insert(row.ticker.clone(), row.state.clone());
            if prev.as_deref() == Some("halted") && row.state == "resumed" {
                resumed.push(row.clone());
            }
        }
        resumed
    }
}

/// Parse one RSS item. Title shape: "TICKER - Trading Halted" or
/// "TICKER - Trading Resumed"; the description carries the halt code.
fn parse_item(item: &rss::Item) -> Option<HaltRow> {
    let title = item.title()?;
    let (ticker_part, state_part) = title.split_once('-')?;
    let ticker = canonical_ticker(ticker_part)?;

    let lower = state_part.to_lowercase();
    let state = if lower.contains("resumed") {
        "resumed"
    } else if lower.contains("halted") {
        "halted"
    } else {
        return None;
    };

    Some(HaltRow {
        ticker,
        state: state.to_string(),
        reason: item.description().unwrap_or("").trim().to_string(),
    })
}

/// One poll: fetch, diff, and run each fresh resume through the sink.
pub async fn poll_once(app: &Arc<AppState>, watcher: &HaltWatcher) {
    let rows = match watcher.fetch_rows().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "halt feed poll failed");
            return;
        }
    };

    let resumed = watcher.apply_rows(&rows);
    if resumed.is_empty() {
        debug!(rows = rows.len(), "halt feed poll — no fresh resumes");
        return;
    }

    let ttl = Duration::minutes(app.config.read().discovery_ttl_minutes);

    for row in resumed.into_iter().take(MAX_RESUMES_PER_POLL) {
        info!(ticker = %row.ticker, reason = %row.reason, "halt resumed — scoring");

        let Some(score) = score_candidate(app, &row.ticker).await else {
            continue;
        };
        let price = app.store.ticker(&row.ticker).map(|f| f.quote.last).unwrap_or(0.0);
        let now = Utc::now();

        let entry = DiscoveryEntry {
            ticker: row.ticker.clone(),
            source: DiscoverySource::HaltResume,
            discovered_at: now,
            price,
            direction: score.direction,
            confidence: score.confidence,
            top_signals: top_signals(&score, 3),
            meta: DiscoveryMeta {
                halt_reason: Some(row.reason.clone()),
                gap_pct: None,
                relative_volume: None,
            },
            expires_at: now + ttl,
        };
        process_discovery(app, entry, Some(&score));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn row(ticker: &str, state: &str) -> HaltRow {
        HaltRow {
            ticker: ticker.to_string(),
            state: state.to_string(),
            reason: "LUDP".to_string(),
        }
    }

    #[test]
    fn transition_detection() {
        let watcher = HaltWatcher::new("http://unused");

        // First sighting as halted: no resume event.
        assert!(watcher.apply_rows(&[row("ABCD", "halted")]).is_empty());
        // Still halted: nothing.
        assert!(watcher.apply_rows(&[row("ABCD", "halted")]).is_empty());
        // Transition: exactly one resume.
        let resumed = watcher.apply_rows(&[row("ABCD", "resumed")]);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].ticker, "ABCD");
        // Repeat resumed rows do not re-fire.
        assert!(watcher.apply_rows(&[row("ABCD", "resumed")]).is_empty());
    }

    #[test]
    fn first_sighting_as_resumed_does_not_fire() {
        let watcher = HaltWatcher::new("http://unused");
        assert!(watcher.apply_rows(&[row("WXYZ", "resumed")]).is_empty());
    }

    #[test]
    fn parse_item_shapes() {
        let mut item = rss::Item::default();
        item.set_title("ABCD - Trading Halted".to_string());
        item.set_description("LUDP - Volatility Trading Pause".to_string());
        let parsed = parse_item(&item).unwrap();
        assert_eq!(parsed.ticker, "ABCD");
        assert_eq!(parsed.state, "halted");

        item.set_title("ABCD - Trading Resumed".to_string());
        assert_eq!(parse_item(&item).unwrap().state, "resumed");

        item.set_title("no separator here".to_string());
        assert!(parse_item(&item).is_none());

        item.set_title("TOOLONGNAME - Trading Halted".to_string());
        assert!(parse_item(&item).is_none());
    }
}
