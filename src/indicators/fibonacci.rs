use serde::{Deserialize, Serialize};

use crate::models::Bar;

/// One retracement level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FibLevel {
    pub ratio: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImpulseWave {
    Up,
    Down,
    None,
}

/// Retracement levels interpolated between the series low and high
///
/// Levels are kept sorted by ratio so every lookup is independent of the
/// order the ratios were configured in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FibonacciLevels {
    pub high: f64,
    pub low: f64,
    pub levels: Vec<FibLevel>,
}

impl FibonacciLevels {
    /// Build levels from the full series extremes
    pub fn from_bars(bars: &[Bar], ratios: &[f64]) -> Option<Self> {
        if bars.is_empty() || ratios.is_empty() {
            return None;
        }

        let high = bars.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
        let low = bars.iter().fold(f64::MAX, |acc, b| acc.min(b.low));

        let mut levels: Vec<FibLevel> = ratios
            .iter()
            .filter(|r| r.is_finite())
            .map(|&ratio| FibLevel {
                ratio,
                price: low + ratio * (high - low),
            })
            .collect();
        levels.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        levels.dedup_by(|a, b| a.ratio == b.ratio);

        Some(Self { high, low, levels })
    }

    /// Price of the level with exactly this ratio
    pub fn level(&self, ratio: f64) -> Option<f64> {
        self.levels
            .iter()
            .find(|l| l.ratio == ratio)
            .map(|l| l.price)
    }

    /// Closest level within `tolerance` of the close (relative to the series high)
    ///
    /// Only reported while the close sits strictly inside the series range,
    /// which marks a corrective wave resting on a retracement level.
    pub fn near_level(&self, close: f64, tolerance: f64) -> Option<FibLevel> {
        if self.high <= 0.0 || !(self.low < close && close < self.high) {
            return None;
        }

        self.levels
            .iter()
            .map(|l| (l, (close - l.price).abs() / self.high))
            .filter(|(_, distance)| *distance < tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(l, _)| *l)
    }

    /// Impulse continuation beyond the key levels
    ///
    /// Up when the close is above the lowest level with ratio >= `up_ratio`,
    /// Down when it is below the highest level with ratio <= `down_ratio`.
    /// Both or neither yields `None`.
    pub fn impulse(&self, close: f64, up_ratio: f64, down_ratio: f64) -> ImpulseWave {
        let up_threshold = self
            .levels
            .iter()
            .filter(|l| l.ratio >= up_ratio)
            .map(|l| l.price)
            .min_by(|a, b| a.total_cmp(b));
        let down_threshold = self
            .levels
            .iter()
            .filter(|l| l.ratio <= down_ratio)
            .map(|l| l.price)
            .max_by(|a, b| a.total_cmp(b));

        let up = up_threshold.is_some_and(|p| close > p);
        let down = down_threshold.is_some_and(|p| close < p);

        match (up, down) {
            (true, false) => ImpulseWave::Up,
            (false, true) => ImpulseWave::Down,
            _ => ImpulseWave::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    const RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc::now() + Duration::minutes(15 * i),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn swing(close: f64) -> (FibonacciLevels, f64) {
        let bars = vec![bar(0, 200.0, 150.0, 180.0), bar(1, 160.0, 100.0, 120.0), bar(2, close, close, close)];
        (FibonacciLevels::from_bars(&bars, &RATIOS).unwrap(), close)
    }

    #[test]
    fn test_levels_interpolate_range() {
        let (fib, _) = swing(150.0);
        assert_eq!(fib.high, 200.0);
        assert_eq!(fib.low, 100.0);
        assert!((fib.level(0.5).unwrap() - 150.0).abs() < 1e-9);
        assert!((fib.level(0.618).unwrap() - 161.8).abs() < 1e-9);
    }

    #[test]
    fn test_levels_sorted_regardless_of_config_order() {
        let bars = vec![bar(0, 200.0, 100.0, 150.0)];
        let shuffled = FibonacciLevels::from_bars(&bars, &[0.786, 0.236, 0.5, 0.382, 0.618]).unwrap();
        let ordered = FibonacciLevels::from_bars(&bars, &RATIOS).unwrap();
        assert_eq!(shuffled, ordered);
    }

    #[test]
    fn test_near_level_within_tolerance() {
        let (fib, close) = swing(151.0);
        let near = fib.near_level(close, 0.02).unwrap();
        assert_eq!(near.ratio, 0.5);
    }

    #[test]
    fn test_near_level_picks_closest() {
        // 6% of 200 is 12.0, so both 0.5 (150) and 0.382 (138.2) are in reach of 146
        let (fib, close) = swing(146.0);
        assert_eq!(fib.near_level(close, 0.06).unwrap().ratio, 0.5);
    }

    #[test]
    fn test_near_level_requires_close_inside_range() {
        let bars = vec![bar(0, 200.0, 100.0, 150.0), bar(1, 200.0, 200.0, 200.0)];
        let fib = FibonacciLevels::from_bars(&bars, &RATIOS).unwrap();
        assert!(fib.near_level(200.0, 0.5).is_none());
    }

    #[test]
    fn test_impulse_up_above_golden_ratio() {
        let (fib, close) = swing(170.0);
        assert_eq!(fib.impulse(close, 0.618, 0.382), ImpulseWave::Up);
    }

    #[test]
    fn test_impulse_down_below_lower_levels() {
        let (fib, close) = swing(130.0);
        assert_eq!(fib.impulse(close, 0.618, 0.382), ImpulseWave::Down);
    }

    #[test]
    fn test_no_impulse_in_middle_band() {
        let (fib, close) = swing(150.0);
        assert_eq!(fib.impulse(close, 0.618, 0.382), ImpulseWave::None);
    }

    #[test]
    fn test_flat_series_has_no_impulse() {
        let bars = vec![bar(0, 100.0, 100.0, 100.0); 3];
        let fib = FibonacciLevels::from_bars(&bars, &RATIOS).unwrap();
        assert_eq!(fib.impulse(100.0, 0.618, 0.382), ImpulseWave::None);
    }
}
