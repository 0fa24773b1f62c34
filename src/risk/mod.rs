// Risk management module
pub mod brackets;
pub mod sizing;

pub use brackets::{Bracket, BracketError, StopPolicy};
pub use sizing::{PositionSizer, SizeDecision, SizingMode};

use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Static risk settings for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskParameters {
    pub leverage: u32,
    pub sizing: SizingMode,
    /// Defaults to the leverage-scaled percentage bracket when unset
    pub stops: Option<StopPolicy>,
    /// Exchange minimum order quantity
    pub min_amount: f64,
    /// Exchange maximum order quantity
    pub max_amount: f64,
    /// Entry limit offset from the signal price (buy above, sell below)
    pub entry_offset_pct: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            leverage: 20,
            sizing: SizingMode::default(),
            stops: None,
            min_amount: 0.0001,
            max_amount: 10.0,
            entry_offset_pct: 0.0,
        }
    }
}

impl RiskParameters {
    pub fn sizer(&self) -> PositionSizer {
        PositionSizer::new(self.sizing, self.min_amount, self.max_amount)
    }

    pub fn stop_policy(&self) -> StopPolicy {
        self.stops
            .unwrap_or_else(|| StopPolicy::for_leverage(self.leverage))
    }

    /// Limit price for the entry leg: buys above, sells below the signal price
    pub fn entry_limit_price(&self, side: Side, price: f64) -> f64 {
        match side {
            Side::Buy => price * (1.0 + self.entry_offset_pct),
            Side::Sell => price * (1.0 - self.entry_offset_pct),
        }
    }
}
