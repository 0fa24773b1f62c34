use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar as returned by the exchange, oldest first in a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Wire representation used by the exchange
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional outcome of signal aggregation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Bullish,
    Bearish,
    None,
}

impl Direction {
    /// Entry side for a directional signal
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Bullish => Some(Side::Buy),
            Direction::Bearish => Some(Side::Sell),
            Direction::None => None,
        }
    }
}

/// Trading signal for one symbol, with the inputs that produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub rsi: f64,
}

/// 24h ticker summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub high: f64,
    pub low: f64,
}

impl Ticker {
    /// Relative high/low spread, 0 when the low is unusable
    pub fn range_ratio(&self) -> f64 {
        if self.low > 0.0 && self.high >= self.low {
            (self.high - self.low) / self.low
        } else {
            0.0
        }
    }
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRef {
    pub order_id: String,
    pub symbol: String,
}

/// Entry order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub leverage: u32,
}

/// Protective exit order: limit at the take-profit, triggered at the stop-loss
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: f64,
}

/// Exposure the exchange reports as open
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub reference_price: f64,
}
