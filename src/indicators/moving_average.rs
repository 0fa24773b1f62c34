use serde::{Deserialize, Serialize};

/// Calculate Simple Moving Average (SMA) over the latest `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    sma_at(values, period, values.len() - 1)
}

/// SMA of the `period` values ending at index `end` (inclusive)
pub fn sma_at(values: &[f64], period: usize, end: usize) -> Option<f64> {
    if period == 0 || end >= values.len() || end + 1 < period {
        return None;
    }

    let sum: f64 = values[end + 1 - period..=end].iter().sum();
    Some(sum / period as f64)
}

/// Short/long moving average relation on the latest bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MaCross {
    /// Short moved from <= long to > long on the latest bar
    Bullish,
    /// Short moved from >= long to < long on the latest bar
    Bearish,
    NoCross,
    /// Not enough bars for a long average on both of the last two bars
    Undetermined,
}

/// Detect a strict moving average crossover on the latest bar
///
/// Compares the short/long relation of the previous bar with the latest
/// bar. Needs `long + 1` closes, otherwise `Undetermined`.
pub fn moving_average_cross(closes: &[f64], short: usize, long: usize) -> MaCross {
    let n = closes.len();
    if short == 0 || long == 0 || n < long + 1 || n < short + 1 {
        return MaCross::Undetermined;
    }

    let (Some(short_now), Some(long_now), Some(short_prev), Some(long_prev)) = (
        sma_at(closes, short, n - 1),
        sma_at(closes, long, n - 1),
        sma_at(closes, short, n - 2),
        sma_at(closes, long, n - 2),
    ) else {
        return MaCross::Undetermined;
    };

    if short_now > long_now && short_prev <= long_prev {
        MaCross::Bullish
    } else if short_now < long_now && short_prev >= long_prev {
        MaCross::Bearish
    } else {
        MaCross::NoCross
    }
}

/// Require the crossing bar to push through the recent extremes
///
/// A bullish cross holds only if the latest close is above the short MA and
/// above the highest high of the `push_window` bars before it; bearish is the
/// mirror. Crosses that fail the check degrade to `NoCross`.
pub fn confirm_trend_push(
    cross: MaCross,
    closes: &[f64],
    highs: &[f64],
    lows: &[f64],
    short: usize,
    push_window: usize,
) -> MaCross {
    if !matches!(cross, MaCross::Bullish | MaCross::Bearish) {
        return cross;
    }

    let n = closes.len();
    if push_window == 0 || n < push_window + 1 || highs.len() != n || lows.len() != n {
        return MaCross::NoCross;
    }

    let Some(short_ma) = calculate_sma(closes, short) else {
        return MaCross::NoCross;
    };
    let close = closes[n - 1];
    let prior = n - 1 - push_window..n - 1;

    let confirmed = match cross {
        MaCross::Bullish => {
            let prior_high = highs[prior].iter().fold(f64::MIN, |acc, &h| acc.max(h));
            close > short_ma && close > prior_high
        }
        _ => {
            let prior_low = lows[prior].iter().fold(f64::MAX, |acc, &l| acc.min(l));
            close < short_ma && close < prior_low
        }
    };

    if confirmed {
        cross
    } else {
        MaCross::NoCross
    }
}
