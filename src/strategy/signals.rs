use serde::{Deserialize, Serialize};

use crate::indicators::{ImpulseWave, IndicatorSnapshot, MaCross, RangeBreak};
use crate::models::{Bar, Direction};

/// Configuration for signal aggregation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub use_ma_cross: bool,
    pub use_breakout: bool,
    pub use_impulse: bool,
    /// The impulse wave itself must confirm the direction
    pub require_impulse: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            use_ma_cross: true,
            use_breakout: true,
            use_impulse: false,
            require_impulse: false,
        }
    }
}

/// A directional confirmation cast by one indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

/// Confirmations cast by the enabled indicators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Votes {
    pub ma_cross: Option<Vote>,
    pub breakout: Option<Vote>,
    pub impulse: Option<Vote>,
}

impl Votes {
    pub fn collect(snapshot: &IndicatorSnapshot, config: &SignalConfig) -> Self {
        let ma_cross = match snapshot.ma_cross {
            MaCross::Bullish if config.use_ma_cross => Some(Vote::Up),
            MaCross::Bearish if config.use_ma_cross => Some(Vote::Down),
            _ => None,
        };
        let breakout = match snapshot.breakout {
            RangeBreak::Up if config.use_breakout => Some(Vote::Up),
            RangeBreak::Down if config.use_breakout => Some(Vote::Down),
            _ => None,
        };
        let impulse_enabled = config.use_impulse || config.require_impulse;
        let impulse = match snapshot.impulse {
            ImpulseWave::Up if impulse_enabled => Some(Vote::Up),
            ImpulseWave::Down if impulse_enabled => Some(Vote::Down),
            _ => None,
        };

        Self {
            ma_cross,
            breakout,
            impulse,
        }
    }

    fn cast(&self) -> impl Iterator<Item = Vote> {
        [self.ma_cross, self.breakout, self.impulse].into_iter().flatten()
    }

    /// Common direction of all cast votes, `None` when absent or conflicting
    pub fn consensus(&self) -> Option<Vote> {
        let ups = self.cast().filter(|v| *v == Vote::Up).count();
        let downs = self.cast().filter(|v| *v == Vote::Down).count();

        match (ups, downs) {
            (0, 0) => None,
            (_, 0) => Some(Vote::Up),
            (0, _) => Some(Vote::Down),
            _ => None,
        }
    }
}

/// Combine an indicator snapshot into a trade direction
///
/// Bullish needs RSI below the oversold threshold and at least one up
/// confirmation with no down confirmation; bearish is the mirror with the
/// overbought threshold. Conflicting confirmations yield `Direction::None`.
pub fn aggregate(snapshot: &IndicatorSnapshot, config: &SignalConfig) -> Direction {
    let votes = Votes::collect(snapshot, config);
    let Some(consensus) = votes.consensus() else {
        return Direction::None;
    };

    if config.require_impulse && votes.impulse != Some(consensus) {
        return Direction::None;
    }

    match consensus {
        Vote::Up if snapshot.rsi < config.rsi_oversold => Direction::Bullish,
        Vote::Down if snapshot.rsi > config.rsi_overbought => Direction::Bearish,
        _ => Direction::None,
    }
}

/// One-line audit description of the inputs behind a decision
pub fn describe_votes(snapshot: &IndicatorSnapshot, config: &SignalConfig) -> String {
    let votes = Votes::collect(snapshot, config);
    format!(
        "RSI={:.1} (<{}/>{}), MA cross={:?}, Breakout={:?}, Impulse={:?}, votes=[ma:{:?} range:{:?} impulse:{:?}]",
        snapshot.rsi,
        config.rsi_oversold,
        config.rsi_overbought,
        snapshot.ma_cross,
        snapshot.breakout,
        snapshot.impulse,
        votes.ma_cross,
        votes.breakout,
        votes.impulse
    )
}

/// Parse an exchange timeframe string ("15m", "1h", "4h", "1d") into seconds
pub fn timeframe_secs(timeframe: &str) -> Option<u64> {
    let timeframe = timeframe.trim();
    let split = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = timeframe.split_at(split);
    let amount: u64 = amount.parse().ok()?;

    let unit_secs = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };

    amount.checked_mul(unit_secs).filter(|secs| *secs > 0)
}

/// Validate that bars are uniformly spaced in time
///
/// # Arguments
/// * `bars` - The bars to validate
/// * `expected_interval_secs` - Expected time between bars in seconds
///
/// # Tolerance
/// Allows up to 1.5x the expected interval
pub fn validate_bar_spacing(bars: &[Bar], expected_interval_secs: u64) -> anyhow::Result<()> {
    if bars.len() < 2 {
        return Ok(());
    }

    // Allow 50% tolerance for slight timing variations
    let max_gap_secs = expected_interval_secs + (expected_interval_secs / 2);

    for window in bars.windows(2) {
        let time_diff = (window[1].timestamp - window[0].timestamp).num_seconds();

        if time_diff <= 0 {
            anyhow::bail!("Bars are not sorted by timestamp");
        }

        let time_diff_u64 = time_diff as u64;

        if time_diff_u64 > max_gap_secs {
            anyhow::bail!(
                "Data gap detected: {}s between bars (expected ~{}s, max allowed {}s). Gap from {} to {}",
                time_diff_u64,
                expected_interval_secs,
                max_gap_secs,
                window[0].timestamp.format("%Y-%m-%d %H:%M"),
                window[1].timestamp.format("%Y-%m-%d %H:%M")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn snapshot(rsi: f64, ma_cross: MaCross, breakout: RangeBreak, impulse: ImpulseWave) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: 100.0,
            rsi,
            short_ma: Some(100.0),
            long_ma: Some(100.0),
            ma_cross,
            range: None,
            breakout,
            atr: Some(1.0),
            fibonacci: None,
            near_level: None,
            impulse,
        }
    }

    #[test]
    fn test_bullish_requires_oversold_and_confirmation() {
        let config = SignalConfig::default();

        let s = snapshot(25.0, MaCross::NoCross, RangeBreak::Up, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::Bullish);

        // Oversold alone is not enough
        let s = snapshot(25.0, MaCross::NoCross, RangeBreak::Inside, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::None);

        // Confirmation without oversold RSI is not enough
        let s = snapshot(45.0, MaCross::Bullish, RangeBreak::Up, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::None);
    }

    #[test]
    fn test_bearish_mirror() {
        let config = SignalConfig::default();

        let s = snapshot(80.0, MaCross::Bearish, RangeBreak::Inside, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::Bearish);

        let s = snapshot(80.0, MaCross::Undetermined, RangeBreak::Down, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::Bearish);
    }

    #[test]
    fn test_conflicting_confirmations_emit_none() {
        let config = SignalConfig::default();

        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Down, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::None);

        let s = snapshot(80.0, MaCross::Bullish, RangeBreak::Down, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::None);
    }

    #[test]
    fn test_disabled_indicator_does_not_vote() {
        let config = SignalConfig {
            use_breakout: false,
            ..Default::default()
        };

        // Breakout down would conflict, but it is not part of the mix
        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Down, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::Bullish);
    }

    #[test]
    fn test_impulse_vote_joins_consensus() {
        let config = SignalConfig {
            use_impulse: true,
            ..Default::default()
        };

        let s = snapshot(25.0, MaCross::NoCross, RangeBreak::Inside, ImpulseWave::Up);
        assert_eq!(aggregate(&s, &config), Direction::Bullish);

        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Inside, ImpulseWave::Down);
        assert_eq!(aggregate(&s, &config), Direction::None);
    }

    #[test]
    fn test_require_impulse() {
        let config = SignalConfig {
            require_impulse: true,
            ..Default::default()
        };

        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Up, ImpulseWave::None);
        assert_eq!(aggregate(&s, &config), Direction::None);

        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Inside, ImpulseWave::Up);
        assert_eq!(aggregate(&s, &config), Direction::Bullish);

        let s = snapshot(75.0, MaCross::NoCross, RangeBreak::Down, ImpulseWave::Down);
        assert_eq!(aggregate(&s, &config), Direction::Bearish);
    }

    #[test]
    fn test_describe_votes_lists_inputs() {
        let s = snapshot(25.0, MaCross::Bullish, RangeBreak::Inside, ImpulseWave::None);
        let text = describe_votes(&s, &SignalConfig::default());
        assert!(text.contains("RSI=25.0"));
        assert!(text.contains("MA cross=Bullish"));
        assert!(text.contains("ma:Some(Up)"));
    }

    #[test]
    fn test_timeframe_secs() {
        assert_eq!(timeframe_secs("15m"), Some(900));
        assert_eq!(timeframe_secs("1h"), Some(3_600));
        assert_eq!(timeframe_secs("4h"), Some(14_400));
        assert_eq!(timeframe_secs("1d"), Some(86_400));
        assert_eq!(timeframe_secs("m"), None);
        assert_eq!(timeframe_secs("15"), None);
        assert_eq!(timeframe_secs("15x"), None);
        assert_eq!(timeframe_secs("0m"), None);
        assert_eq!(timeframe_secs("30000000000000000w"), None);
    }

    #[test]
    fn test_bar_spacing_gap_detected() {
        let start = Utc::now();
        let make = |minutes: i64| Bar {
            timestamp: start + Duration::minutes(minutes),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        };

        let uniform = vec![make(0), make(15), make(30)];
        assert!(validate_bar_spacing(&uniform, 900).is_ok());

        let gapped = vec![make(0), make(15), make(60)];
        let err = validate_bar_spacing(&gapped, 900).unwrap_err();
        assert!(err.to_string().contains("Data gap detected"));

        let unsorted = vec![make(15), make(0)];
        assert!(validate_bar_spacing(&unsorted, 900).is_err());
    }
}
