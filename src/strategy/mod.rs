// Trading strategy module
pub mod composite;
pub mod signals;

pub use composite::CompositeStrategy;
pub use signals::{aggregate, SignalConfig};

use crate::indicators::{IndicatorSnapshot, InsufficientData};
use crate::models::{Bar, Signal};

/// Signal plus the indicator values that produced it
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub signal: Signal,
    pub snapshot: IndicatorSnapshot,
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Evaluate a symbol's bar series into a signal
    fn evaluate(&self, symbol: &str, bars: &[Bar]) -> Result<Evaluation, InsufficientData>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum bars required for this strategy
    fn min_bars_required(&self) -> usize;
}
