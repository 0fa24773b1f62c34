use serde::{Deserialize, Serialize};

use super::{
    calculate_atr, calculate_rsi, calculate_sma, confirm_trend_push, moving_average_cross,
    range_breakout, FibLevel, FibonacciLevels, ImpulseWave, MaCross, RangeBounds, RangeBreak,
};
use crate::models::Bar;

/// Indicator windows and thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
    /// Require the crossing close to clear the recent high/low
    pub require_trend_push: bool,
    pub trend_push_window: usize,
    pub breakout_window: usize,
    pub atr_period: usize,
    pub fibonacci_ratios: Vec<f64>,
    /// Relative distance (to the series high) counted as "near" a level
    pub fibonacci_tolerance: f64,
    pub impulse_up_ratio: f64,
    pub impulse_down_ratio: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            short_ma_period: 50,
            long_ma_period: 200,
            require_trend_push: false,
            trend_push_window: 5,
            breakout_window: 20,
            atr_period: 14,
            fibonacci_ratios: vec![0.236, 0.382, 0.5, 0.618, 0.786],
            fibonacci_tolerance: 0.02,
            impulse_up_ratio: 0.618,
            impulse_down_ratio: 0.382,
        }
    }
}

/// Series too short for the mandatory indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient data: {available} bars, need {required}")]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
}

/// Indicator values attached to the latest bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub rsi: f64,
    pub short_ma: Option<f64>,
    pub long_ma: Option<f64>,
    pub ma_cross: MaCross,
    pub range: Option<RangeBounds>,
    pub breakout: RangeBreak,
    pub atr: Option<f64>,
    pub fibonacci: Option<FibonacciLevels>,
    pub near_level: Option<FibLevel>,
    pub impulse: ImpulseWave,
}

impl IndicatorSnapshot {
    /// Compute every indicator from scratch over `bars`
    ///
    /// RSI is mandatory; each optional indicator reports its own
    /// undetermined state when the series is too short for it.
    pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> Result<Self, InsufficientData> {
        let required = config.rsi_period + 1;
        let insufficient = InsufficientData {
            required,
            available: bars.len(),
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let close = *closes.last().ok_or(insufficient)?;
        let rsi = calculate_rsi(&closes, config.rsi_period).ok_or(insufficient)?;

        let mut ma_cross =
            moving_average_cross(&closes, config.short_ma_period, config.long_ma_period);
        if config.require_trend_push {
            let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
            let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
            ma_cross = confirm_trend_push(
                ma_cross,
                &closes,
                &highs,
                &lows,
                config.short_ma_period,
                config.trend_push_window,
            );
        }

        let (breakout, range) = range_breakout(bars, config.breakout_window);
        let fibonacci = FibonacciLevels::from_bars(bars, &config.fibonacci_ratios);
        let near_level = fibonacci
            .as_ref()
            .and_then(|f| f.near_level(close, config.fibonacci_tolerance));
        let impulse = fibonacci.as_ref().map_or(ImpulseWave::None, |f| {
            f.impulse(close, config.impulse_up_ratio, config.impulse_down_ratio)
        });

        Ok(Self {
            close,
            rsi,
            short_ma: calculate_sma(&closes, config.short_ma_period),
            long_ma: calculate_sma(&closes, config.long_ma_period),
            ma_cross,
            range,
            breakout,
            atr: calculate_atr(bars, config.atr_period),
            fibonacci,
            near_level,
            impulse,
        })
    }
}
