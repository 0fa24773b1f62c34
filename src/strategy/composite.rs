use super::{
    signals::{aggregate, describe_votes, SignalConfig},
    Evaluation, Strategy,
};
use crate::indicators::{IndicatorConfig, IndicatorSnapshot, InsufficientData};
use crate::models::{Bar, Signal};

/// Composite technical strategy
///
/// Combines:
/// - RSI as the oversold/overbought gate
/// - Moving average crosses, range breakouts and Fibonacci impulse waves as
///   directional confirmations
///
/// Which confirmations take part is configuration, so single-indicator and
/// full-mix deployments run the same engine.
#[derive(Debug, Clone, Default)]
pub struct CompositeStrategy {
    indicators: IndicatorConfig,
    signals: SignalConfig,
}

impl CompositeStrategy {
    pub fn new(indicators: IndicatorConfig, signals: SignalConfig) -> Self {
        Self {
            indicators,
            signals,
        }
    }

    pub fn indicator_config(&self) -> &IndicatorConfig {
        &self.indicators
    }

    pub fn signal_config(&self) -> &SignalConfig {
        &self.signals
    }
}

impl Strategy for CompositeStrategy {
    fn evaluate(&self, symbol: &str, bars: &[Bar]) -> Result<Evaluation, InsufficientData> {
        let snapshot = IndicatorSnapshot::compute(bars, &self.indicators)?;
        let direction = aggregate(&snapshot, &self.signals);

        tracing::debug!(
            symbol = %symbol,
            "Indicators: {}",
            describe_votes(&snapshot, &self.signals)
        );

        Ok(Evaluation {
            signal: Signal {
                symbol: symbol.to_string(),
                direction,
                price: snapshot.close,
                rsi: snapshot.rsi,
            },
            snapshot,
        })
    }

    fn name(&self) -> &str {
        "CompositeStrategy"
    }

    fn min_bars_required(&self) -> usize {
        self.indicators.rsi_period + 1
    }
}
