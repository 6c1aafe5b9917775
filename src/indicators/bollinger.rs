// =============================================================================
// Bollinger Bands — middle SMA, k·σ envelopes, position and bandwidth
// =============================================================================
//
// upper  = SMA + k*σ
// lower  = SMA - k*σ
// position = (price - lower) / (upper - lower), clamped to [0, 1]
// bandwidth = (upper - lower) / middle
//
// `position` is the engine's normalised read of where price sits inside the
// envelope; `bandwidth` feeds squeeze detection and the feature vector.
// =============================================================================

/// Bollinger Band reading for the most recent close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Where the last close sits in the envelope, clamped to [0, 1].
    pub position: f64,
    /// (upper - lower) / middle.
    pub bandwidth: f64,
}

/// Compute the bands over the trailing `period` closes.
///
/// Returns `None` on short input, zero middle band, or non-finite output.
pub fn latest_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;

    let last = *closes.last()?;
    let span = upper - lower;
    let position = if span > 0.0 {
        ((last - lower) / span).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let bandwidth = span / middle;

    if !bandwidth.is_finite() || !position.is_finite() {
        return None;
    }

    Some(BollingerResult { upper, middle, lower, position, bandwidth })
}

/// Rolling bandwidth series — one value per window position. Used for the
/// squeeze detector (bandwidth in the bottom decile of its own history).
pub fn bandwidth_series(closes: &[f64], period: usize, num_std: f64) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    (period..=closes.len())
        .filter_map(|end| latest_bollinger(&closes[..end], period, num_std).map(|b| b.bandwidth))
        .collect()
}

/// True when the current bandwidth is in the lowest `pct` fraction of its
/// recent history — the classic pre-breakout compression.
pub fn is_squeezed(closes: &[f64], period: usize, pct: f64) -> bool {
    let series = bandwidth_series(closes, period, 2.0);
    if series.len() < 10 {
        return false;
    }

    let current = *series.last().unwrap();
    let mut sorted = series.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let cutoff_idx = ((sorted.len() as f64) * pct).floor() as usize;
    let cutoff = sorted[cutoff_idx.min(sorted.len() - 1)];

    current <= cutoff
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_shape() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = latest_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.bandwidth > 0.0);
    }

    #[test]
    fn insufficient_data() {
        assert!(latest_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
        assert!(latest_bollinger(&[], 20, 2.0).is_none());
    }

    #[test]
    fn flat_series_centers_position() {
        let closes = vec![100.0; 20];
        let bb = latest_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.bandwidth.abs() < 1e-10);
        assert!((bb.position - 0.5).abs() < 1e-10);
    }

    #[test]
    fn position_clamped() {
        // Last close far above the window mean — position must clamp at 1.
        let mut closes = vec![100.0; 19];
        closes.push(500.0);
        let bb = latest_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.position <= 1.0);
        assert!(bb.position >= 0.0);

        // And far below — clamp at 0.
        let mut closes = vec![100.0; 19];
        closes.push(1.0);
        let bb = latest_bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(bb.position, 0.0);
    }

    #[test]
    fn position_tracks_price() {
        let closes: Vec<f64> = (1..=30).map(|x| 100.0 + (x as f64 * 0.7).sin() * 5.0).collect();
        let bb = latest_bollinger(&closes, 20, 2.0).unwrap();
        assert!((0.0..=1.0).contains(&bb.position));
    }

    #[test]
    fn squeeze_detects_compression() {
        // Volatile start, dead-flat finish — the tail is squeezed.
        let mut closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.9).sin() * 10.0)
            .collect();
        closes.extend(std::iter::repeat(100.0).take(40));
        assert!(is_squeezed(&closes, 20, 0.15));
    }

    #[test]
    fn no_squeeze_when_volatility_expands() {
        // Amplitude grows over time — the trailing window is the widest.
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.9).sin() * (1.0 + i as f64 * 0.2))
            .collect();
        assert!(!is_squeezed(&closes, 20, 0.15));
    }
}
