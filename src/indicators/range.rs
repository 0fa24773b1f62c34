use serde::{Deserialize, Serialize};

use crate::models::Bar;

/// Rolling high/low extremes of a window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RangeBounds {
    pub high: f64,
    pub low: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RangeBreak {
    Up,
    Down,
    Inside,
    Undetermined,
}

/// Extremes of the `window` bars ending at the second-to-last bar
///
/// The latest bar is excluded so a breakout bar never raises its own
/// threshold. Needs `window + 1` bars.
pub fn prior_range(bars: &[Bar], window: usize) -> Option<RangeBounds> {
    if window == 0 || bars.len() < window + 1 {
        return None;
    }

    let end = bars.len() - 1;
    let prior = &bars[end - window..end];

    let high = prior.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
    let low = prior.iter().fold(f64::MAX, |acc, b| acc.min(b.low));

    Some(RangeBounds { high, low })
}

/// Classify the latest close against the prior rolling range
pub fn range_breakout(bars: &[Bar], window: usize) -> (RangeBreak, Option<RangeBounds>) {
    let Some(bounds) = prior_range(bars, window) else {
        return (RangeBreak::Undetermined, None);
    };
    let Some(latest) = bars.last() else {
        return (RangeBreak::Undetermined, None);
    };

    let state = if latest.close > bounds.high {
        RangeBreak::Up
    } else if latest.close < bounds.low {
        RangeBreak::Down
    } else {
        RangeBreak::Inside
    };

    (state, Some(bounds))
}
