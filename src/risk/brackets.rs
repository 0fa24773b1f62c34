use serde::{Deserialize, Serialize};

use crate::models::Side;

/// How stop-loss and take-profit distances are derived from the entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StopPolicy {
    /// Fractions of the entry price
    Percentage { stop_loss_pct: f64, take_profit_pct: f64 },
    /// Multiples of the latest ATR
    AtrMultiple { stop_loss_mult: f64, take_profit_mult: f64 },
}

impl StopPolicy {
    /// 1:3 risk/reward scaled by leverage (1/leverage stop, 3/leverage target)
    pub fn for_leverage(leverage: u32) -> Self {
        let leverage = leverage.max(1) as f64;
        StopPolicy::Percentage {
            stop_loss_pct: 1.0 / leverage,
            take_profit_pct: 3.0 / leverage,
        }
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        StopPolicy::for_leverage(20)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum BracketError {
    #[error("ATR stop policy needs an ATR value")]
    MissingAtr,

    #[error("bracket prices invalid for entry {entry}: stop {stop_loss}, target {take_profit}")]
    InvalidPrice {
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
    },
}

/// Protective exit prices around an entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bracket {
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Bracket {
    /// Stop below / target above for buys, mirrored for sells
    pub fn compute(
        policy: &StopPolicy,
        side: Side,
        entry: f64,
        atr: Option<f64>,
    ) -> Result<Self, BracketError> {
        let (stop_distance, target_distance) = match *policy {
            StopPolicy::Percentage {
                stop_loss_pct,
                take_profit_pct,
            } => (entry * stop_loss_pct, entry * take_profit_pct),
            StopPolicy::AtrMultiple {
                stop_loss_mult,
                take_profit_mult,
            } => {
                let atr = atr.ok_or(BracketError::MissingAtr)?;
                (atr * stop_loss_mult, atr * take_profit_mult)
            }
        };

        let bracket = match side {
            Side::Buy => Bracket {
                stop_loss: entry - stop_distance,
                take_profit: entry + target_distance,
            },
            Side::Sell => Bracket {
                stop_loss: entry + stop_distance,
                take_profit: entry - target_distance,
            },
        };

        let ordered = match side {
            Side::Buy => bracket.stop_loss < entry && entry < bracket.take_profit,
            Side::Sell => bracket.take_profit < entry && entry < bracket.stop_loss,
        };
        if !ordered || bracket.stop_loss <= 0.0 || bracket.take_profit <= 0.0 {
            return Err(BracketError::InvalidPrice {
                entry,
                stop_loss: bracket.stop_loss,
                take_profit: bracket.take_profit,
            });
        }

        Ok(bracket)
    }
}
