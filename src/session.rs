// =============================================================================
// Session Clock — Eastern wall-clock classification of the trading day
// =============================================================================
//
// The session label drives two things: the refresh interval of the scheduler
// (10s at the open, 60s overnight) and the horizon weight profile used by the
// signal engine. All boundaries are ET, DST-aware via chrono-tz.
//
// Session table:
//   pre-market   08:30–09:00
//   open-rush    09:00–09:20
//   power-open   09:21–10:00
//   midday       10:01–15:00
//   power-hour   15:01–16:15
//   after-hours  16:16–17:00
//   overnight    otherwise
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use chrono_tz::US::Eastern;

use crate::types::{Horizon, Session};

/// Current time in the US-Eastern zone.
pub fn now_eastern() -> DateTime<Tz> {
    Utc::now().with_timezone(&Eastern)
}

/// ET calendar date as `YYYY-MM-DD`. The daily call budget resets when this
/// string changes.
pub fn eastern_date_string(at: DateTime<Tz>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Classify an ET timestamp into a session.
pub fn classify(at: DateTime<Tz>) -> Session {
    let minutes = at.hour() * 60 + at.minute();

    match minutes {
        m if (510..540).contains(&m) => Session::PreMarket,   // 08:30–08:59
        m if (540..=560).contains(&m) => Session::OpenRush,   // 09:00–09:20
        m if (561..=600).contains(&m) => Session::PowerOpen,  // 09:21–10:00
        m if (601..=900).contains(&m) => Session::Midday,     // 10:01–15:00
        m if (901..=975).contains(&m) => Session::PowerHour,  // 15:01–16:15
        m if (976..=1020).contains(&m) => Session::AfterHours, // 16:16–17:00
        _ => Session::Overnight,
    }
}

/// Refresh interval for a session, in milliseconds.
pub fn refresh_interval_ms(session: Session) -> u64 {
    match session {
        Session::OpenRush => 10_000,
        Session::PowerOpen | Session::PowerHour => 15_000,
        Session::PreMarket | Session::Midday => 30_000,
        Session::AfterHours => 45_000,
        Session::Overnight => 60_000,
    }
}

/// Horizon label for setups generated during a session.
pub fn horizon_for(session: Session) -> Horizon {
    match session {
        Session::OpenRush => Horizon::Scalp,
        Session::PowerOpen => Horizon::DayVolatile,
        Session::Midday => Horizon::Day,
        Session::PowerHour => Horizon::Intraday,
        Session::PreMarket | Session::AfterHours => Horizon::ExtendedHours,
        Session::Overnight => Horizon::Swing,
    }
}

/// True on Saturday/Sunday — no cycles run at all.
pub fn is_weekend(at: DateTime<Tz>) -> bool {
    matches!(at.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True once the 15:55 ET intraday force-close pass should run for the day.
pub fn is_intraday_close_window(at: DateTime<Tz>) -> bool {
    let minutes = at.hour() * 60 + at.minute();
    // 15:55–16:00
    (955..960).contains(&minutes)
}

/// True inside the nightly retrain window (17:00–17:05 ET).
pub fn is_retrain_window(at: DateTime<Tz>) -> bool {
    let minutes = at.hour() * 60 + at.minute();
    (1020..1025).contains(&minutes)
}

/// True once the wall clock has passed an early close (13:00 ET) on a
/// shortened trading day.
pub fn past_early_close(at: DateTime<Tz>, early_close: bool) -> bool {
    early_close && at.hour() >= 13
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et(h: u32, m: u32) -> DateTime<Tz> {
        // A regular Wednesday.
        Eastern.with_ymd_and_hms(2025, 3, 12, h, m, 0).unwrap()
    }

    #[test]
    fn session_boundaries() {
        assert_eq!(classify(et(8, 29)), Session::Overnight);
        assert_eq!(classify(et(8, 30)), Session::PreMarket);
        assert_eq!(classify(et(8, 59)), Session::PreMarket);
        assert_eq!(classify(et(9, 0)), Session::OpenRush);
        assert_eq!(classify(et(9, 20)), Session::OpenRush);
        assert_eq!(classify(et(9, 21)), Session::PowerOpen);
        assert_eq!(classify(et(10, 0)), Session::PowerOpen);
        assert_eq!(classify(et(10, 1)), Session::Midday);
        assert_eq!(classify(et(15, 0)), Session::Midday);
        assert_eq!(classify(et(15, 1)), Session::PowerHour);
        assert_eq!(classify(et(16, 15)), Session::PowerHour);
        assert_eq!(classify(et(16, 16)), Session::AfterHours);
        assert_eq!(classify(et(17, 0)), Session::AfterHours);
        assert_eq!(classify(et(17, 1)), Session::Overnight);
        assert_eq!(classify(et(3, 0)), Session::Overnight);
    }

    #[test]
    fn intervals_quiet_down_overnight() {
        assert_eq!(refresh_interval_ms(Session::OpenRush), 10_000);
        assert!(refresh_interval_ms(Session::Overnight) > refresh_interval_ms(Session::Midday));
        assert_eq!(refresh_interval_ms(Session::Overnight), 60_000);
    }

    #[test]
    fn horizons_track_sessions() {
        assert_eq!(horizon_for(Session::OpenRush), Horizon::Scalp);
        assert_eq!(horizon_for(Session::Midday), Horizon::Day);
        assert_eq!(horizon_for(Session::Overnight), Horizon::Swing);
        assert_eq!(horizon_for(Session::PreMarket), Horizon::ExtendedHours);
    }

    #[test]
    fn weekend_detection() {
        let saturday = Eastern.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap();
        assert!(is_weekend(saturday));
        assert!(!is_weekend(et(10, 0)));
    }

    #[test]
    fn intraday_close_window() {
        assert!(!is_intraday_close_window(et(15, 54)));
        assert!(is_intraday_close_window(et(15, 55)));
        assert!(is_intraday_close_window(et(15, 59)));
        assert!(!is_intraday_close_window(et(16, 0)));
    }

    #[test]
    fn retrain_window() {
        assert!(is_retrain_window(et(17, 0)));
        assert!(is_retrain_window(et(17, 4)));
        assert!(!is_retrain_window(et(17, 5)));
        assert!(!is_retrain_window(et(16, 59)));
    }

    #[test]
    fn early_close_cutoff() {
        assert!(!past_early_close(et(12, 59), true));
        assert!(past_early_close(et(13, 0), true));
        assert!(!past_early_close(et(14, 0), false));
    }

    #[test]
    fn date_string_format() {
        assert_eq!(eastern_date_string(et(10, 0)), "2025-03-12");
    }
}
