// =============================================================================
// Shared types used across the Meridian trading intelligence engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Wall-clock classification of the Eastern trading day. Chooses the refresh
/// cadence and the horizon weight profile used by the signal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Session {
    PreMarket,
    OpenRush,
    PowerOpen,
    Midday,
    PowerHour,
    AfterHours,
    Overnight,
}

impl Session {
    /// All sessions, in the order they occur across a trading day.
    pub const ALL: [Session; 7] = [
        Session::PreMarket,
        Session::OpenRush,
        Session::PowerOpen,
        Session::Midday,
        Session::PowerHour,
        Session::AfterHours,
        Session::Overnight,
    ];
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreMarket => write!(f, "pre-market"),
            Self::OpenRush => write!(f, "open-rush"),
            Self::PowerOpen => write!(f, "power-open"),
            Self::Midday => write!(f, "midday"),
            Self::PowerHour => write!(f, "power-hour"),
            Self::AfterHours => write!(f, "after-hours"),
            Self::Overnight => write!(f, "overnight"),
        }
    }
}

/// Coarse market-state label derived from VIX, ADX, breadth, and options tide.
/// Influences per-signal dampening inside the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Unknown,
}

impl Regime {
    /// True for either directional trending regime.
    pub fn is_trending(self) -> bool {
        matches!(self, Self::TrendingUp | Self::TrendingDown)
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "trending-up"),
            Self::TrendingDown => write!(f, "trending-down"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Expected holding duration of a setup. Derived from the session; selects
/// the weight profile and the stop-width policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Horizon {
    Scalp,
    Day,
    DayVolatile,
    Swing,
    Intraday,
    ExtendedHours,
}

impl Horizon {
    /// Whether positions on this horizon must be flat before the close.
    pub fn is_intraday(self) -> bool {
        matches!(self, Self::Scalp | Self::Day | Self::DayVolatile | Self::Intraday)
    }

    /// The weight-profile bucket this horizon maps to.
    pub fn profile_key(self) -> &'static str {
        match self {
            Self::Scalp => "scalp",
            Self::Day | Self::DayVolatile | Self::Intraday => "day",
            Self::Swing | Self::ExtendedHours => "swing",
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalp => write!(f, "scalp"),
            Self::Day => write!(f, "day"),
            Self::DayVolatile => write!(f, "day-volatile"),
            Self::Swing => write!(f, "swing"),
            Self::Intraday => write!(f, "intraday"),
            Self::ExtendedHours => write!(f, "extended-hours"),
        }
    }
}

/// Refresh cadence class for a data category: every cycle, every 5th, or
/// every 15th. Exists to respect the provider's daily call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataTier {
    Hot,
    Warm,
    Cold,
}

impl DataTier {
    /// Tier for a given cycle counter. COLD takes precedence over WARM when
    /// both cadences line up.
    pub fn for_cycle(cycle: u64) -> Self {
        if cycle % 15 == 14 {
            Self::Cold
        } else if cycle % 5 == 4 {
            Self::Warm
        } else {
            Self::Hot
        }
    }
}

impl std::fmt::Display for DataTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "HOT"),
            Self::Warm => write!(f, "WARM"),
            Self::Cold => write!(f, "COLD"),
        }
    }
}

/// Direction of a trade setup or paper trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// +1.0 for long, -1.0 for short. Used in P&L math.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Directional lean of a signal score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalDirection {
    /// Map a non-neutral score direction onto a trade direction.
    pub fn trade_direction(self) -> Option<TradeDirection> {
        match self {
            Self::Bullish => Some(TradeDirection::Long),
            Self::Bearish => Some(TradeDirection::Short),
            Self::Neutral => None,
        }
    }
}

impl Default for SignalDirection {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Lifecycle status of a paper trade. A trade is created `Pending` and
/// transitions exactly once to one of the closed statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeStatus {
    Pending,
    WinT1,
    WinT2,
    LossStop,
    ClosedEod,
    ClosedManual,
}

impl TradeStatus {
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::WinT1 => write!(f, "win-t1"),
            Self::WinT2 => write!(f, "win-t2"),
            Self::LossStop => write!(f, "loss-stop"),
            Self::ClosedEod => write!(f, "closed-eod"),
            Self::ClosedManual => write!(f, "closed-manual"),
        }
    }
}

/// Provenance of a quoted price. A real-time stream value supersedes a REST
/// snapshot, which supersedes a historical close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    RealTimeStream,
    Snapshot,
    HistoricalClose,
}

impl PriceSource {
    /// Preference rank — higher wins when merging overlapping providers.
    pub fn rank(self) -> u8 {
        match self {
            Self::RealTimeStream => 2,
            Self::Snapshot => 1,
            Self::HistoricalClose => 0,
        }
    }
}

impl Default for PriceSource {
    fn default() -> Self {
        Self::HistoricalClose
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RealTimeStream => write!(f, "real-time-stream"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::HistoricalClose => write!(f, "historical-close"),
        }
    }
}

/// Which producer surfaced a discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoverySource {
    Scanner,
    VolatilityRunner,
    HaltResume,
    GapAnalyzer,
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scanner => write!(f, "Scanner"),
            Self::VolatilityRunner => write!(f, "VolatilityRunner"),
            Self::HaltResume => write!(f, "HaltResume"),
            Self::GapAnalyzer => write!(f, "GapAnalyzer"),
        }
    }
}

/// Validate and canonicalize a ticker symbol: 1-5 ASCII letters, uppercased.
pub fn canonical_ticker(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 5 {
        return None;
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(trimmed.to_uppercase())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_for_cycle_cadence() {
        assert_eq!(DataTier::for_cycle(0), DataTier::Hot);
        assert_eq!(DataTier::for_cycle(3), DataTier::Hot);
        assert_eq!(DataTier::for_cycle(4), DataTier::Warm);
        assert_eq!(DataTier::for_cycle(9), DataTier::Warm);
        assert_eq!(DataTier::for_cycle(14), DataTier::Cold);
        assert_eq!(DataTier::for_cycle(29), DataTier::Cold);
        // 44 % 5 == 4 but 44 % 15 == 14 — COLD wins.
        assert_eq!(DataTier::for_cycle(44), DataTier::Cold);
    }

    #[test]
    fn trade_direction_sign() {
        assert_eq!(TradeDirection::Long.sign(), 1.0);
        assert_eq!(TradeDirection::Short.sign(), -1.0);
    }

    #[test]
    fn status_serde_labels() {
        let json = serde_json::to_string(&TradeStatus::WinT1).unwrap();
        assert_eq!(json, "\"win-t1\"");
        let back: TradeStatus = serde_json::from_str("\"closed-eod\"").unwrap();
        assert_eq!(back, TradeStatus::ClosedEod);
    }

    #[test]
    fn session_serde_labels() {
        let json = serde_json::to_string(&Session::PowerHour).unwrap();
        assert_eq!(json, "\"power-hour\"");
        let back: Session = serde_json::from_str("\"pre-market\"").unwrap();
        assert_eq!(back, Session::PreMarket);
    }

    #[test]
    fn price_source_rank_ordering() {
        assert!(PriceSource::RealTimeStream.rank() > PriceSource::Snapshot.rank());
        assert!(PriceSource::Snapshot.rank() > PriceSource::HistoricalClose.rank());
    }

    #[test]
    fn canonical_ticker_rules() {
        assert_eq!(canonical_ticker("nvda"), Some("NVDA".to_string()));
        assert_eq!(canonical_ticker(" SPY "), Some("SPY".to_string()));
        assert_eq!(canonical_ticker(""), None);
        assert_eq!(canonical_ticker("TOOLONG"), None);
        assert_eq!(canonical_ticker("BRK.B"), None);
    }

    #[test]
    fn horizon_profile_buckets() {
        assert_eq!(Horizon::Scalp.profile_key(), "scalp");
        assert_eq!(Horizon::DayVolatile.profile_key(), "day");
        assert_eq!(Horizon::Swing.profile_key(), "swing");
        assert!(Horizon::Intraday.is_intraday());
        assert!(!Horizon::Swing.is_intraday());
    }
}
