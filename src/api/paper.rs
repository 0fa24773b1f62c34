use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::MarketGateway;
use crate::error::GatewayError;
use crate::models::{Bar, ConditionalOrder, LimitOrder, OpenPosition, OrderRef, Side, Ticker};

/// A simulated position guarded by its exit order
#[derive(Debug, Clone, PartialEq)]
struct PaperBracket {
    side: Side,
    quantity: f64,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
}

impl PaperBracket {
    /// Exit price if the last trade crossed the stop or the target
    fn exit_price(&self, last: f64) -> Option<f64> {
        let (stop_hit, target_hit) = match self.side {
            Side::Buy => (
                self.stop_loss.is_some_and(|s| last <= s),
                self.take_profit.is_some_and(|t| last >= t),
            ),
            Side::Sell => (
                self.stop_loss.is_some_and(|s| last >= s),
                self.take_profit.is_some_and(|t| last <= t),
            ),
        };

        if stop_hit {
            self.stop_loss
        } else if target_hit {
            self.take_profit
        } else {
            None
        }
    }

    fn pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - exit_price) * self.quantity,
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    realized_pnl: f64,
    orders_placed: usize,
    brackets: HashMap<String, PaperBracket>,
}

/// Paper-trading gateway
///
/// Market data comes from the wrapped gateway; orders never leave the
/// process. An entry opens a simulated position, the exit order attaches its
/// stop and target, and the position closes once the ticker crosses either.
pub struct PaperGateway {
    market: Arc<dyn MarketGateway>,
    starting_balance: f64,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(market: Arc<dyn MarketGateway>, starting_balance: f64) -> Self {
        tracing::info!(balance = starting_balance, "Paper trading enabled");
        Self {
            market,
            starting_balance,
            book: Mutex::new(PaperBook::default()),
        }
    }

    pub fn orders_placed(&self) -> usize {
        self.book.lock().map(|book| book.orders_placed).unwrap_or(0)
    }

    fn with_book<T>(&self, f: impl FnOnce(&mut PaperBook) -> T) -> Result<T, GatewayError> {
        let mut book = self
            .book
            .lock()
            .map_err(|_| GatewayError::Transport("paper book lock poisoned".to_string()))?;
        Ok(f(&mut book))
    }
}

#[async_trait]
impl MarketGateway for PaperGateway {
    async fn ping(&self) -> Result<(), GatewayError> {
        self.market.ping().await
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, GatewayError> {
        self.market.fetch_bars(symbol, timeframe, limit).await
    }

    async fn fetch_balance(&self) -> Result<f64, GatewayError> {
        let realized = self.with_book(|book| book.realized_pnl)?;
        Ok(self.starting_balance + realized)
    }

    async fn submit_limit_order(&self, order: &LimitOrder) -> Result<OrderRef, GatewayError> {
        let order_id = Uuid::new_v4().to_string();

        self.with_book(|book| {
            book.orders_placed += 1;
            book.brackets.insert(
                order.symbol.clone(),
                PaperBracket {
                    side: order.side,
                    quantity: order.quantity,
                    entry_price: order.price,
                    stop_loss: None,
                    take_profit: None,
                },
            );
        })?;

        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            price = order.price,
            order_id = %order_id,
            "📝 Paper entry filled"
        );

        Ok(OrderRef {
            order_id,
            symbol: order.symbol.clone(),
        })
    }

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderRef, GatewayError> {
        let order_id = Uuid::new_v4().to_string();

        let attached = self.with_book(|book| {
            book.orders_placed += 1;
            match book.brackets.get_mut(&order.symbol) {
                Some(bracket) if bracket.side == order.side.opposite() => {
                    bracket.stop_loss = Some(order.stop_price);
                    bracket.take_profit = Some(order.price);
                    true
                }
                _ => false,
            }
        })?;

        if !attached {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("no open {} position to protect", order.symbol),
            });
        }

        tracing::info!(
            symbol = %order.symbol,
            stop_loss = order.stop_price,
            take_profit = order.price,
            order_id = %order_id,
            "📝 Paper bracket attached"
        );

        Ok(OrderRef {
            order_id,
            symbol: order.symbol.clone(),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        self.market.fetch_ticker(symbol).await
    }

    async fn fetch_open_positions(
        &self,
        symbols: &[String],
    ) -> Result<Vec<OpenPosition>, GatewayError> {
        let held: Vec<String> = self.with_book(|book| {
            symbols
                .iter()
                .filter(|s| book.brackets.contains_key(*s))
                .cloned()
                .collect()
        })?;

        let mut positions = Vec::new();
        for symbol in held {
            let ticker = self.market.fetch_ticker(&symbol).await?;

            let position = self.with_book(|book| {
                let bracket = book.brackets.get(&symbol)?.clone();
                match bracket.exit_price(ticker.last) {
                    Some(exit) => {
                        let pnl = bracket.pnl(exit);
                        book.realized_pnl += pnl;
                        book.brackets.remove(&symbol);
                        tracing::info!(
                            symbol = %symbol,
                            exit_price = exit,
                            pnl = pnl,
                            "📝 Paper position closed"
                        );
                        None
                    }
                    None => Some(OpenPosition {
                        symbol: symbol.clone(),
                        side: bracket.side,
                        quantity: bracket.quantity,
                        reference_price: bracket.entry_price,
                    }),
                }
            })?;

            positions.extend(position);
        }

        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedGateway;

    fn ticker(last: f64) -> Ticker {
        Ticker {
            symbol: "BTC/USDT".to_string(),
            last,
            high: last * 1.01,
            low: last * 0.99,
        }
    }

    async fn open_long(paper: &PaperGateway) {
        paper
            .submit_limit_order(&LimitOrder {
                symbol: "BTC/USDT".to_string(),
                side: Side::Buy,
                quantity: 2.0,
                price: 100.0,
                leverage: 20,
            })
            .await
            .unwrap();
        paper
            .submit_conditional_order(&ConditionalOrder {
                symbol: "BTC/USDT".to_string(),
                side: Side::Sell,
                quantity: 2.0,
                price: 115.0,
                stop_price: 95.0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bracket_held_until_target() {
        let market = Arc::new(ScriptedGateway::new());
        let paper = PaperGateway::new(market.clone(), 1_000.0);
        let watch = vec!["BTC/USDT".to_string()];

        open_long(&paper).await;
        assert_eq!(paper.orders_placed(), 2);

        market.set_ticker(ticker(105.0));
        let open = paper.fetch_open_positions(&watch).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].side, Side::Buy);
        assert_eq!(open[0].reference_price, 100.0);

        market.set_ticker(ticker(116.0));
        assert!(paper.fetch_open_positions(&watch).await.unwrap().is_empty());
        // Closed at the target: (115 - 100) * 2
        assert_eq!(paper.fetch_balance().await.unwrap(), 1_030.0);
    }

    #[tokio::test]
    async fn test_stop_loss_realizes_loss() {
        let market = Arc::new(ScriptedGateway::new());
        let paper = PaperGateway::new(market.clone(), 1_000.0);

        open_long(&paper).await;
        market.set_ticker(ticker(94.0));

        let open = paper
            .fetch_open_positions(&["BTC/USDT".to_string()])
            .await
            .unwrap();
        assert!(open.is_empty());
        assert_eq!(paper.fetch_balance().await.unwrap(), 990.0);
    }

    #[tokio::test]
    async fn test_exit_without_entry_rejected() {
        let paper = PaperGateway::new(Arc::new(ScriptedGateway::new()), 1_000.0);
        let result = paper
            .submit_conditional_order(&ConditionalOrder {
                symbol: "ETH/USDT".to_string(),
                side: Side::Buy,
                quantity: 1.0,
                price: 90.0,
                stop_price: 105.0,
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Rejected { .. })));
    }

    #[test]
    fn test_short_bracket_exit_prices() {
        let bracket = PaperBracket {
            side: Side::Sell,
            quantity: 1.0,
            entry_price: 100.0,
            stop_loss: Some(105.0),
            take_profit: Some(85.0),
        };
        assert_eq!(bracket.exit_price(100.0), None);
        assert_eq!(bracket.exit_price(106.0), Some(105.0));
        assert_eq!(bracket.exit_price(84.0), Some(85.0));
        assert_eq!(bracket.pnl(85.0), 15.0);
    }
}
