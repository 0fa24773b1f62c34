use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::MarketGateway;
use crate::error::GatewayError;
use crate::models::{Bar, ConditionalOrder, LimitOrder, OpenPosition, OrderRef, Ticker};

/// In-memory gateway with scripted responses and call recording
pub(crate) struct ScriptedGateway {
    bars: Mutex<HashMap<String, Result<Vec<Bar>, GatewayError>>>,
    balance: Mutex<Result<f64, GatewayError>>,
    tickers: Mutex<HashMap<String, Ticker>>,
    positions: Mutex<Result<Vec<OpenPosition>, GatewayError>>,
    entry_error: Mutex<Option<GatewayError>>,
    exit_error: Mutex<Option<GatewayError>>,
    call_delay: Mutex<Option<Duration>>,
    pub balance_calls: AtomicUsize,
    pub bar_calls: AtomicUsize,
    pub limit_orders: Mutex<Vec<LimitOrder>>,
    pub conditional_orders: Mutex<Vec<ConditionalOrder>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            bars: Mutex::new(HashMap::new()),
            balance: Mutex::new(Ok(1_000.0)),
            tickers: Mutex::new(HashMap::new()),
            positions: Mutex::new(Ok(Vec::new())),
            entry_error: Mutex::new(None),
            exit_error: Mutex::new(None),
            call_delay: Mutex::new(None),
            balance_calls: AtomicUsize::new(0),
            bar_calls: AtomicUsize::new(0),
            limit_orders: Mutex::new(Vec::new()),
            conditional_orders: Mutex::new(Vec::new()),
        }
    }

    pub fn set_bars(&self, symbol: &str, bars: Result<Vec<Bar>, GatewayError>) {
        self.bars.lock().unwrap().insert(symbol.to_string(), bars);
    }

    pub fn set_balance(&self, balance: Result<f64, GatewayError>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn set_ticker(&self, ticker: Ticker) {
        self.tickers
            .lock()
            .unwrap()
            .insert(ticker.symbol.clone(), ticker);
    }

    pub fn set_positions(&self, positions: Result<Vec<OpenPosition>, GatewayError>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn fail_entry(&self, err: GatewayError) {
        *self.entry_error.lock().unwrap() = Some(err);
    }

    pub fn fail_exit(&self, err: GatewayError) {
        *self.exit_error.lock().unwrap() = Some(err);
    }

    /// Every call sleeps this long first
    pub fn set_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = Some(delay);
    }

    pub fn limit_order_count(&self) -> usize {
        self.limit_orders.lock().unwrap().len()
    }

    pub fn conditional_order_count(&self) -> usize {
        self.conditional_orders.lock().unwrap().len()
    }

    async fn pause(&self) {
        let delay = *self.call_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MarketGateway for ScriptedGateway {
    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> Result<Vec<Bar>, GatewayError> {
        self.bar_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.bars
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::Rejected {
                status: 400,
                message: format!("unknown symbol {symbol}"),
            }))
    }

    async fn fetch_balance(&self) -> Result<f64, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.balance.lock().unwrap().clone()
    }

    async fn submit_limit_order(&self, order: &LimitOrder) -> Result<OrderRef, GatewayError> {
        self.pause().await;
        if let Some(err) = self.entry_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut orders = self.limit_orders.lock().unwrap();
        orders.push(order.clone());
        Ok(OrderRef {
            order_id: format!("entry-{}", orders.len()),
            symbol: order.symbol.clone(),
        })
    }

    async fn submit_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderRef, GatewayError> {
        self.pause().await;
        if let Some(err) = self.exit_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut orders = self.conditional_orders.lock().unwrap();
        orders.push(order.clone());
        Ok(OrderRef {
            order_id: format!("exit-{}", orders.len()),
            symbol: order.symbol.clone(),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        self.tickers
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::Transport(format!("no ticker for {symbol}")))
    }

    async fn fetch_open_positions(
        &self,
        symbols: &[String],
    ) -> Result<Vec<OpenPosition>, GatewayError> {
        let positions = self.positions.lock().unwrap().clone()?;
        Ok(positions
            .into_iter()
            .filter(|p| symbols.contains(&p.symbol))
            .collect())
    }
}
