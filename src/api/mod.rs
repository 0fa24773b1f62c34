pub mod mexc;
pub mod paper;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use mexc::MexcClient;
pub use paper::PaperGateway;
pub use retry::{retry_fixed, RetryPolicy};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{Bar, ConditionalOrder, LimitOrder, OpenPosition, OrderRef, Ticker};

/// Exchange boundary used by the engine
///
/// Symbols are passed in watch-list form (`BTC/USDT`); adapters map them to
/// their own wire format.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> Result<(), GatewayError>;

    /// Closed bars for a symbol, oldest first
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, GatewayError>;

    /// Total quote-currency (USDT) balance
    async fn fetch_balance(&self) -> Result<f64, GatewayError>;

    async fn submit_limit_order(&self, order: &LimitOrder) -> Result<OrderRef, GatewayError>;

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderRef, GatewayError>;

    /// 24h ticker
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;

    /// Exposure the exchange still reports for the given symbols
    async fn fetch_open_positions(
        &self,
        symbols: &[String],
    ) -> Result<Vec<OpenPosition>, GatewayError>;
}
