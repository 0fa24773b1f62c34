use serde::{Deserialize, Serialize};

/// How a balance is converted into an order quantity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingMode {
    /// Spend a fixed fraction of the balance at the current price
    FractionOfBalance { fraction: f64 },
    /// Fixed risk amount per trade, taken as a fraction of the balance, per unit of price
    FixedRisk { amount: f64 },
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::FixedRisk { amount: 20.0 }
    }
}

/// Outcome of sizing against the exchange bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeDecision {
    Accept { quantity: f64 },
    /// Above the maximum: trade at the maximum instead
    Capped { quantity: f64, requested: f64 },
    /// Below the minimum: skip the trade, never round up
    BelowMinimum { requested: f64 },
}

impl SizeDecision {
    /// Quantity to trade, `None` when the trade must be skipped
    pub fn quantity(&self) -> Option<f64> {
        match self {
            SizeDecision::Accept { quantity } | SizeDecision::Capped { quantity, .. } => {
                Some(*quantity)
            }
            SizeDecision::BelowMinimum { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub mode: SizingMode,
    pub min_amount: f64,
    pub max_amount: f64,
}

impl PositionSizer {
    pub fn new(mode: SizingMode, min_amount: f64, max_amount: f64) -> Self {
        Self {
            mode,
            min_amount,
            max_amount,
        }
    }

    /// Unclamped quantity; 0 for unusable balance or price
    pub fn raw_quantity(&self, balance: f64, price: f64) -> f64 {
        if !(balance.is_finite() && price.is_finite()) || balance <= 0.0 || price <= 0.0 {
            return 0.0;
        }

        let quantity = match self.mode {
            SizingMode::FractionOfBalance { fraction } => balance * fraction / price,
            SizingMode::FixedRisk { amount } => (amount / balance) / price,
        };

        if quantity.is_finite() && quantity > 0.0 {
            quantity
        } else {
            0.0
        }
    }

    /// Size a trade and apply the min/max bounds
    pub fn size(&self, balance: f64, price: f64) -> SizeDecision {
        let requested = self.raw_quantity(balance, price);

        if requested < self.min_amount || requested <= 0.0 {
            SizeDecision::BelowMinimum { requested }
        } else if requested > self.max_amount {
            SizeDecision::Capped {
                quantity: self.max_amount,
                requested,
            }
        } else {
            SizeDecision::Accept {
                quantity: requested,
            }
        }
    }
}
