// =============================================================================
// Notifier — deduplicated alert channel with per-key cooldowns
// =============================================================================
//
// Alerts fan out to the in-memory ring buffer (served over the API and the
// WebSocket snapshot) and, best-effort, to the configured Discord/Telegram
// webhooks. A repeat alert on the same key inside the cooldown window is
// dropped so a signal that keeps re-firing cannot spam the channel.
//
// The daily brief goes out at most once per (ET date, session).
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::Session;

/// Ring-buffer cap on retained alerts.
const MAX_ALERTS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// e.g. "discovery", "halt-resume", "trade-open", "trade-closed", "brief"
    pub kind: String,
    pub ticker: Option<String>,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Outbound webhook endpoints, all optional.
#[derive(Debug, Clone, Default)]
pub struct NotifierEndpoints {
    pub discord_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl NotifierEndpoints {
    pub fn from_env() -> Self {
        Self {
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty()),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty()),
        }
    }
}

pub struct Notifier {
    alerts: RwLock<Vec<Alert>>,
    last_sent: RwLock<HashMap<String, DateTime<Utc>>>,
    briefs_sent: RwLock<HashMap<String, ()>>,
    cooldown: Duration,
    endpoints: NotifierEndpoints,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(cooldown_minutes: i64, endpoints: NotifierEndpoints) -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            last_sent: RwLock::new(HashMap::new()),
            briefs_sent: RwLock::new(HashMap::new()),
            cooldown: Duration::minutes(cooldown_minutes),
            endpoints,
            client: reqwest::Client::new(),
        }
    }

    /// Emit an alert unless `key` fired within the cooldown. Returns whether
    /// the alert went out.
    pub fn notify(
        &self,
        key: &str,
        kind: &str,
        ticker: Option<&str>,
        title: &str,
        message: &str,
    ) -> bool {
        let now = Utc::now();
        {
            let mut last = self.last_sent.write();
            if let Some(&prev) = last.get(key) {
                if now - prev < self.cooldown {
                    debug!(key, "alert suppressed by cooldown");
                    return false;
                }
            }
            last.insert(key.to_string(), now);
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            ticker: ticker.map(String::from),
            title: title.to_string(),
            message: message.to_string(),
            at: now,
        };

        info!(kind, ticker = ticker.unwrap_or("-"), title, "alert");

        {
            let mut alerts = self.alerts.write();
            alerts.push(alert.clone());
            if alerts.len() > MAX_ALERTS {
                let excess = alerts.len() - MAX_ALERTS;
                alerts.drain(..excess);
            }
        }

        self.dispatch_webhooks(alert);
        true
    }

    /// Send the daily brief at most once per (date, session).
    pub fn send_brief(&self, date: &str, session: Session, content: &str) -> bool {
        let key = format!("{date}:{session}");
        {
            let mut sent = self.briefs_sent.write();
            if sent.contains_key(&key) {
                return false;
            }
            sent.insert(key, ());
        }
        self.notify(
            &format!("brief:{date}:{session}"),
            "brief",
            None,
            &format!("Daily brief — {session}"),
            content,
        )
    }

    /// Recent alerts, newest last.
    pub fn recent(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    // ── Transports ──────────────────────────────────────────────────────

    /// Fire-and-forget webhook delivery; transport failure is logged, never
    /// propagated.
    fn dispatch_webhooks(&self, alert: Alert) {
        if let Some(url) = self.endpoints.discord_webhook_url.clone() {
            let client = self.client.clone();
            let body = serde_json::json!({
                "content": format!("**{}**\n{}", alert.title, alert.message),
            });
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).json(&body).send().await {
                    warn!(error = %e, "discord webhook failed");
                }
            });
        }

        if let (Some(token), Some(chat_id)) = (
            self.endpoints.telegram_bot_token.clone(),
            self.endpoints.telegram_chat_id.clone(),
        ) {
            let client = self.client.clone();
            let url = format!("https://api.telegram.org/bot{token}/sendMessage");
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": format!("{}\n{}", alert.title, alert.message),
            });
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).json(&body).send().await {
                    warn!(error = %e, "telegram webhook failed");
                }
            });
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> Notifier {
        Notifier::new(15, NotifierEndpoints::default())
    }

    #[tokio::test]
    async fn cooldown_dedup() {
        let n = notifier();
        assert!(n.notify("sig:NVDA:long", "discovery", Some("NVDA"), "t", "m"));
        assert!(!n.notify("sig:NVDA:long", "discovery", Some("NVDA"), "t", "m"));
        // Different key passes.
        assert!(n.notify("sig:NVDA:short", "discovery", Some("NVDA"), "t", "m"));
        assert_eq!(n.recent().len(), 2);
    }

    #[tokio::test]
    async fn ring_buffer_capped() {
        let n = notifier();
        for i in 0..(MAX_ALERTS + 20) {
            n.notify(&format!("k{i}"), "test", None, "t", "m");
        }
        assert_eq!(n.recent().len(), MAX_ALERTS);
    }

    #[tokio::test]
    async fn brief_once_per_session() {
        let n = notifier();
        assert!(n.send_brief("2025-03-12", Session::PreMarket, "brief text"));
        assert!(!n.send_brief("2025-03-12", Session::PreMarket, "brief text"));
        // New session or new day goes out again.
        assert!(n.send_brief("2025-03-12", Session::Midday, "brief text"));
        assert!(n.send_brief("2025-03-13", Session::PreMarket, "brief text"));
    }
}
