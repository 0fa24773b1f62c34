// Technical indicators module
// Implements RSI, MA cross, range breakout, ATR and Fibonacci levels

pub mod atr;
pub mod fibonacci;
pub mod moving_average;
pub mod range;
pub mod rsi;
pub mod snapshot;

pub use atr::{calculate_atr, true_range};
pub use fibonacci::{FibLevel, FibonacciLevels, ImpulseWave};
pub use moving_average::{
    calculate_sma, confirm_trend_push, moving_average_cross, sma_at, MaCross,
};
pub use range::{prior_range, range_breakout, RangeBounds, RangeBreak};
pub use rsi::calculate_rsi;
pub use snapshot::{IndicatorConfig, IndicatorSnapshot, InsufficientData};
