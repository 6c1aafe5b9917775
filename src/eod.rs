// =============================================================================
// End-of-Day Reporter — what worked today, what didn't
// =============================================================================
//
// Joins the day's closed paper trades back to the setups that produced them
// and aggregates accuracy two ways: per session (when was the edge real) and
// per signal (which indicators earned their weight). Plain-language
// recommendations fall out of simple thresholds; the operator decides what
// to do with them.
//
// Reports persist to `data/eod-reports/{YYYY-MM-DD}.json`.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::US::Eastern;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::journal::{PaperJournal, PaperTrade};
use crate::persist;
use crate::session;
use crate::types::Session;

/// Max clock distance between a setup record and the trade it produced.
const JOIN_WINDOW_MINUTES: i64 = 5;
/// Minimum fires before a signal's hit rate is worth a recommendation.
const MIN_SIGNAL_FIRES: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAccuracy {
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub pnl_dollars: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalAccuracy {
    pub fired: usize,
    pub wins: usize,
    pub losses: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EodReport {
    pub date: String,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub pnl_dollars: f64,
    pub per_session: HashMap<String, SessionAccuracy>,
    pub per_signal: HashMap<String, SignalAccuracy>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Build the report for one ET date (YYYY-MM-DD) from the journal.
pub fn generate_report(journal: &PaperJournal, date: &str) -> EodReport {
    let setups = journal.setups();
    let closed_today: Vec<PaperTrade> = journal
        .trades()
        .into_iter()
        .filter(|t| t.status.is_closed())
        .filter(|t| {
            t.exit_time
                .map(|e| session::eastern_date_string(e.with_timezone(&Eastern)) == date)
                .unwrap_or(false)
        })
        .collect();

    let mut per_session: HashMap<String, SessionAccuracy> = HashMap::new();
    let mut per_signal: HashMap<String, SignalAccuracy> = HashMap::new();
    let mut wins = 0;
    let mut pnl_dollars = 0.0;

    for trade in &closed_today {
        let won = trade.pnl_points.unwrap_or(0.0) > 0.0;
        if won {
            wins += 1;
        }
        pnl_dollars += trade.pnl_total.unwrap_or(0.0);

        // ── Per-session bucket from the entry time ──────────────────────
        let entry_session = session::classify(trade.entry_time.with_timezone(&Eastern));
        let bucket = per_session.entry(entry_session.to_string()).or_default();
        bucket.trades += 1;
        if won {
            bucket.wins += 1;
        }
        bucket.pnl_dollars += trade.pnl_total.unwrap_or(0.0);

        // ── Per-signal accuracy via the setup join ──────────────────────
        let joined = setups.iter().find(|r| {
            r.setup.ticker == trade.ticker
                && r.setup.direction == trade.direction
                && (trade.entry_time - r.at).num_minutes().abs() <= JOIN_WINDOW_MINUTES
        });
        if let Some(record) = joined {
            for signal in &record.setup.signals {
                let acc = per_signal.entry(signal.clone()).or_default();
                acc.fired += 1;
                if won {
                    acc.wins += 1;
                } else {
                    acc.losses += 1;
                }
            }
        }
    }

    for bucket in per_session.values_mut() {
        if bucket.trades > 0 {
            bucket.win_rate = bucket.wins as f64 / bucket.trades as f64;
        }
    }
    for acc in per_signal.values_mut() {
        if acc.fired > 0 {
            acc.hit_rate = acc.wins as f64 / acc.fired as f64;
        }
    }

    let recommendations = build_recommendations(&per_session, &per_signal);

    EodReport {
        date: date.to_string(),
        total_trades: closed_today.len(),
        wins,
        losses: closed_today.len() - wins,
        pnl_dollars,
        per_session,
        per_signal,
        recommendations,
        generated_at: Utc::now(),
    }
}

fn build_recommendations(
    per_session: &HashMap<String, SessionAccuracy>,
    per_signal: &HashMap<String, SignalAccuracy>,
) -> Vec<String> {
    let mut recs = Vec::new();

    for session in Session::ALL {
        let key = session.to_string();
        if let Some(bucket) = per_session.get(&key) {
            if bucket.trades >= 3 && bucket.win_rate < 0.40 {
                recs.push(format!(
                    "{key}: {:.0}% win rate over {} trades — cut size or stand down in this session",
                    bucket.win_rate * 100.0,
                    bucket.trades
                ));
            }
            if bucket.trades >= 3 && bucket.win_rate > 0.65 {
                recs.push(format!(
                    "{key}: {:.0}% win rate over {} trades — edge concentrated here",
                    bucket.win_rate * 100.0,
                    bucket.trades
                ));
            }
        }
    }

    let mut signal_names: Vec<&String> = per_signal.keys().collect();
    signal_names.sort();
    for name in signal_names {
        let acc = &per_signal[name];
        if acc.fired >= MIN_SIGNAL_FIRES && acc.hit_rate < 0.40 {
            recs.push(format!(
                "{name}: {}/{} wins — candidate for a lower weight",
                acc.wins, acc.fired
            ));
        }
    }

    if recs.is_empty() {
        recs.push("no actionable pattern today".to_string());
    }
    recs
}

// =============================================================================
// Persistence
// =============================================================================

pub fn report_path(data_dir: &str, date: &str) -> PathBuf {
    Path::new(data_dir).join("eod-reports").join(format!("{date}.json"))
}

pub fn save_report(data_dir: &str, report: &EodReport) -> Result<()> {
    let path = report_path(data_dir, &report.date);
    persist::write_json_atomic(&path, report)?;
    info!(date = %report.date, trades = report.total_trades, "EOD report saved");
    Ok(())
}

pub fn load_report(data_dir: &str, date: &str) -> Option<EodReport> {
    persist::read_json(report_path(data_dir, date)).ok()
}

/// Dates with a saved report, newest first.
pub fn list_reports(data_dir: &str) -> Vec<String> {
    let dir = Path::new(data_dir).join("eod-reports");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dates: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
        })
        .collect();
    dates.sort_by(|a, b| b.cmp(a));
    dates
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{risk_reward, TradeSetup};
    use crate::types::{Horizon, TradeDirection};
    use chrono::Duration;

    fn tmp_journal(tag: &str) -> PaperJournal {
        let path = std::env::temp_dir().join(format!(
            "meridian-eod-{tag}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        PaperJournal::load(path, 2_000.0)
    }

    fn setup(ticker: &str) -> TradeSetup {
        TradeSetup {
            ticker: ticker.to_string(),
            direction: TradeDirection::Long,
            entry: 100.0,
            target1: 103.0,
            target2: 106.0,
            stop: 98.0,
            risk_reward: risk_reward(100.0, 103.0, 98.0),
            horizon: Horizon::Day,
            atr_multiplier: 1.5,
            technical_confidence: 62,
            ml_confidence: None,
            blended_confidence: 62,
            kelly_pct: 0.1,
            signals: vec!["rsi_oversold".into(), "bb_dip_buy".into()],
            structure: None,
            at: Utc::now(),
        }
    }

    fn today_et() -> String {
        session::eastern_date_string(Utc::now().with_timezone(&Eastern))
    }

    #[test]
    fn empty_journal_empty_report() {
        let journal = tmp_journal("empty");
        let report = generate_report(&journal, &today_et());
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.recommendations, vec!["no actionable pattern today"]);
    }

    #[test]
    fn joins_trades_to_setups() {
        let journal = tmp_journal("join");
        let s = setup("NVDA");
        journal.log_setup(s.clone(), vec![0.0; 25], "v3");
        journal.open_trade(&s, 100.0, Duration::zero(), "v3").unwrap();
        let prices = HashMap::from([("NVDA".to_string(), 103.5)]);
        journal.check_outcomes(&prices);

        let report = generate_report(&journal, &today_et());
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.wins, 1);
        assert_eq!(report.per_signal["rsi_oversold"].wins, 1);
        assert_eq!(report.per_signal["bb_dip_buy"].fired, 1);
        assert_eq!(report.per_session.values().map(|b| b.trades).sum::<usize>(), 1);
    }

    #[test]
    fn weak_signal_gets_recommendation() {
        let mut per_signal = HashMap::new();
        per_signal.insert(
            "macd_negative".to_string(),
            SignalAccuracy { fired: 6, wins: 1, losses: 5, hit_rate: 1.0 / 6.0 },
        );
        let recs = build_recommendations(&HashMap::new(), &per_signal);
        assert!(recs.iter().any(|r| r.contains("macd_negative")));
    }

    #[test]
    fn few_fires_no_recommendation() {
        let mut per_signal = HashMap::new();
        per_signal.insert(
            "macd_negative".to_string(),
            SignalAccuracy { fired: 2, wins: 0, losses: 2, hit_rate: 0.0 },
        );
        let recs = build_recommendations(&HashMap::new(), &per_signal);
        assert!(!recs.iter().any(|r| r.contains("macd_negative")));
    }

    #[test]
    fn report_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join(format!("meridian-eod-dir-{}", std::process::id()));
        let dir_str = dir.to_str().unwrap().to_string();
        let journal = tmp_journal("roundtrip");
        let report = generate_report(&journal, "2025-03-12");
        save_report(&dir_str, &report).unwrap();

        let loaded = load_report(&dir_str, "2025-03-12").unwrap();
        assert_eq!(loaded.date, "2025-03-12");
        assert!(list_reports(&dir_str).contains(&"2025-03-12".to_string()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
