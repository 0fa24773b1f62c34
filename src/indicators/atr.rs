/// Average True Range (ATR) indicator
///
/// Measures market volatility by averaging true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The average is a simple rolling mean of the latest `period` true ranges.

use crate::models::Bar;

/// True range of `bar` given the previous bar's close
pub fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Calculate ATR for the given bars
///
/// Returns the current ATR value, or None if fewer than `period + 1` bars
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let window = &bars[bars.len() - period - 1..];
    let sum: f64 = window
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .sum();

    Some(sum / period as f64)
}
