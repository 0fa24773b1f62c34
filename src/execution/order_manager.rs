use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::clock::Clock;
use crate::api::MarketGateway;
use crate::error::{with_timeout, GatewayError};
use crate::models::{ConditionalOrder, LimitOrder, OrderRef, Side};
use crate::risk::{Bracket, BracketError, RiskParameters, StopPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Protected,
    /// Entry is live but the exit order was not accepted
    Unprotected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOrigin {
    Submitted,
    /// Adopted from exchange-reported exposure
    Reconciled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrade {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub entry_order: Option<OrderRef>,
    pub exit_order: Option<OrderRef>,
    pub protection: Protection,
    pub origin: TradeOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EntryRejected,
    Unprotected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Submitting { symbol: String },
    Active { symbol: String },
    Failed { symbol: String, kind: FailureKind },
}

/// What the scheduler asks the manager to open
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(ActiveTrade),
    /// Gate closed: a trade is already held
    AlreadyActive { symbol: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Bracket(#[from] BracketError),

    #[error("entry order for {symbol} failed: {source}")]
    EntryFailed { symbol: String, source: GatewayError },

    #[error("{symbol} position is UNPROTECTED (entry {entry_order}): exit order failed: {source}")]
    Unprotected {
        symbol: String,
        entry_order: String,
        source: GatewayError,
    },
}

impl OrderError {
    /// Whether the failure came from a call that ran out of time
    pub fn timed_out(&self) -> bool {
        matches!(
            self,
            OrderError::EntryFailed {
                source: GatewayError::Timeout(_),
                ..
            } | OrderError::Unprotected {
                source: GatewayError::Timeout(_),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Held trade still reported by the exchange
    Unchanged,
    /// Nothing held and nothing reported
    Flat,
    Adopted(ActiveTrade),
    Released(ActiveTrade),
}

/// Owns the single-active-trade gate and bracket submission
///
/// The gate check and the whole submission run under one async mutex, so
/// concurrent callers can never both pass the gate. Lifecycle state and the
/// active trade live in `RwLock`s that are never held across an await.
pub struct OrderManager {
    gateway: Arc<dyn MarketGateway>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    submission: Mutex<()>,
    state: RwLock<LifecycleState>,
    active: RwLock<Option<ActiveTrade>>,
}

impl OrderManager {
    pub fn new(gateway: Arc<dyn MarketGateway>, clock: Arc<dyn Clock>, call_timeout: Duration) -> Self {
        Self {
            gateway,
            clock,
            call_timeout,
            submission: Mutex::new(()),
            state: RwLock::new(LifecycleState::Idle),
            active: RwLock::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn active_trade(&self) -> Option<ActiveTrade> {
        match self.active.read() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_active_trade(&self) -> bool {
        self.active_trade().is_some()
    }

    fn set_state(&self, state: LifecycleState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn set_active(&self, trade: Option<ActiveTrade>) {
        match self.active.write() {
            Ok(mut guard) => *guard = trade,
            Err(poisoned) => *poisoned.into_inner() = trade,
        }
    }

    /// Submit an entry plus its protective exit, unless a trade is held
    pub async fn open_position(
        &self,
        request: EntryRequest,
        risk: &RiskParameters,
    ) -> Result<OpenOutcome, OrderError> {
        let _guard = self.submission.lock().await;

        if let Some(trade) = self.active_trade() {
            tracing::debug!(
                symbol = %request.symbol,
                active = %trade.symbol,
                "Trade already active, not opening another"
            );
            return Ok(OpenOutcome::AlreadyActive {
                symbol: trade.symbol,
            });
        }

        let bracket = Bracket::compute(
            &risk.stop_policy(),
            request.side,
            request.entry_price,
            request.atr,
        )?;

        self.set_state(LifecycleState::Submitting {
            symbol: request.symbol.clone(),
        });

        let entry = LimitOrder {
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: risk.entry_limit_price(request.side, request.entry_price),
            leverage: risk.leverage,
        };

        tracing::info!(
            symbol = %entry.symbol,
            side = %entry.side,
            quantity = entry.quantity,
            price = entry.price,
            leverage = entry.leverage,
            "Placing entry order"
        );

        let entry_ref = match with_timeout(self.call_timeout, self.gateway.submit_limit_order(&entry)).await {
            Ok(order_ref) => order_ref,
            Err(source) => {
                tracing::warn!(symbol = %entry.symbol, "Entry order failed: {}", source);
                self.set_state(LifecycleState::Failed {
                    symbol: request.symbol.clone(),
                    kind: FailureKind::EntryRejected,
                });
                return Err(OrderError::EntryFailed {
                    symbol: request.symbol,
                    source,
                });
            }
        };

        let exit = ConditionalOrder {
            symbol: request.symbol.clone(),
            side: request.side.opposite(),
            quantity: request.quantity,
            price: bracket.take_profit,
            stop_price: bracket.stop_loss,
        };

        let exit_result =
            with_timeout(self.call_timeout, self.gateway.submit_conditional_order(&exit)).await;

        let mut trade = ActiveTrade {
            id: Uuid::new_v4(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            entry_price: request.entry_price,
            stop_loss: bracket.stop_loss,
            take_profit: bracket.take_profit,
            opened_at: self.clock.now(),
            entry_order: Some(entry_ref.clone()),
            exit_order: None,
            protection: Protection::Protected,
            origin: TradeOrigin::Submitted,
        };

        match exit_result {
            Ok(exit_ref) => {
                trade.exit_order = Some(exit_ref);
                self.set_active(Some(trade.clone()));
                self.set_state(LifecycleState::Active {
                    symbol: trade.symbol.clone(),
                });

                tracing::info!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = trade.quantity,
                    entry = trade.entry_price,
                    stop_loss = trade.stop_loss,
                    take_profit = trade.take_profit,
                    "✅ Trade opened with bracket"
                );
                Ok(OpenOutcome::Opened(trade))
            }
            Err(source) => {
                trade.protection = Protection::Unprotected;
                self.set_active(Some(trade.clone()));
                self.set_state(LifecycleState::Failed {
                    symbol: trade.symbol.clone(),
                    kind: FailureKind::Unprotected,
                });

                tracing::error!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = trade.quantity,
                    entry_order = %entry_ref.order_id,
                    stop_loss = trade.stop_loss,
                    take_profit = trade.take_profit,
                    "🚨 Entry filled but protective order failed, position is UNPROTECTED: {}",
                    source
                );
                Err(OrderError::Unprotected {
                    symbol: trade.symbol,
                    entry_order: entry_ref.order_id,
                    source,
                })
            }
        }
    }

    /// Clear the held trade once it is known closed
    pub fn acknowledge_close(&self, symbol: &str) -> Option<ActiveTrade> {
        let held = self.active_trade().filter(|t| t.symbol == symbol)?;

        self.set_active(None);
        self.set_state(LifecycleState::Idle);
        tracing::info!(trade_id = %held.id, symbol = %symbol, "Trade closed, gate released");
        Some(held)
    }

    /// Drop all lifecycle state
    pub fn reset(&self) {
        if let Some(trade) = self.active_trade() {
            tracing::warn!(trade_id = %trade.id, symbol = %trade.symbol, "Resetting order manager with a held trade");
        }
        self.set_active(None);
        self.set_state(LifecycleState::Idle);
    }

    /// Align the gate with what the exchange reports as open
    pub async fn reconcile(
        &self,
        watch_list: &[String],
        risk: &RiskParameters,
    ) -> Result<ReconcileOutcome, GatewayError> {
        let _guard = self.submission.lock().await;

        let positions = with_timeout(
            self.call_timeout,
            self.gateway.fetch_open_positions(watch_list),
        )
        .await?;

        if let Some(held) = self.active_trade() {
            if positions.iter().any(|p| p.symbol == held.symbol) {
                return Ok(ReconcileOutcome::Unchanged);
            }

            // An unprotected fill has no resting order, so open orders cannot prove it flat
            if held.protection == Protection::Unprotected {
                tracing::error!(
                    trade_id = %held.id,
                    symbol = %held.symbol,
                    quantity = held.quantity,
                    "🚨 Keeping UNPROTECTED trade, exchange shows no order for it; reset or acknowledge_close once remediated"
                );
                return Ok(ReconcileOutcome::Unchanged);
            }

            tracing::info!(
                trade_id = %held.id,
                symbol = %held.symbol,
                "Exchange reports {} flat, releasing trade",
                held.symbol
            );
            self.set_active(None);
            self.set_state(LifecycleState::Idle);
            return Ok(ReconcileOutcome::Released(held));
        }

        let Some(position) = positions.into_iter().next() else {
            return Ok(ReconcileOutcome::Flat);
        };

        let bracket = Bracket::compute(
            &risk.stop_policy(),
            position.side,
            position.reference_price,
            None,
        )
        .or_else(|_| {
            Bracket::compute(
                &StopPolicy::for_leverage(risk.leverage),
                position.side,
                position.reference_price,
                None,
            )
        })
        .unwrap_or(Bracket {
            stop_loss: position.reference_price,
            take_profit: position.reference_price,
        });

        let trade = ActiveTrade {
            id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.reference_price,
            stop_loss: bracket.stop_loss,
            take_profit: bracket.take_profit,
            opened_at: self.clock.now(),
            entry_order: None,
            exit_order: None,
            // Resting orders live on the exchange
            protection: Protection::Protected,
            origin: TradeOrigin::Reconciled,
        };

        self.set_active(Some(trade.clone()));
        self.set_state(LifecycleState::Active {
            symbol: trade.symbol.clone(),
        });

        tracing::warn!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            side = %trade.side,
            quantity = trade.quantity,
            reference_price = position.reference_price,
            "Adopted exchange-reported position"
        );

        Ok(ReconcileOutcome::Adopted(trade))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedGateway;
    use crate::execution::clock::SystemClock;
    use crate::models::OpenPosition;

    fn manager(gateway: Arc<ScriptedGateway>) -> OrderManager {
        OrderManager::new(gateway, Arc::new(SystemClock), Duration::from_secs(10))
    }

    fn buy_request(symbol: &str) -> EntryRequest {
        EntryRequest {
            symbol: symbol.to_string(),
            side: Side::Buy,
            quantity: 0.5,
            entry_price: 100.0,
            atr: Some(2.0),
        }
    }

    #[tokio::test]
    async fn test_open_places_entry_and_bracket() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway.clone());

        let outcome = manager
            .open_position(buy_request("BTC/USDT"), &RiskParameters::default())
            .await
            .unwrap();

        let OpenOutcome::Opened(trade) = outcome else {
            panic!("expected a trade");
        };
        assert_eq!(trade.protection, Protection::Protected);
        assert_eq!(trade.origin, TradeOrigin::Submitted);
        assert!((trade.stop_loss - 95.0).abs() < 1e-9);
        assert!((trade.take_profit - 115.0).abs() < 1e-9);
        assert_eq!(
            manager.state(),
            LifecycleState::Active {
                symbol: "BTC/USDT".to_string()
            }
        );

        let entries = gateway.limit_orders.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].leverage, 20);
        assert_eq!(entries[0].price, 100.0);

        let exits = gateway.conditional_orders.lock().unwrap().clone();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].side, Side::Sell);
        assert!((exits[0].stop_price - 95.0).abs() < 1e-9);
        assert!((exits[0].price - 115.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gate_blocks_second_trade() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway.clone());
        let risk = RiskParameters::default();

        manager.open_position(buy_request("BTC/USDT"), &risk).await.unwrap();
        let second = manager
            .open_position(buy_request("ETH/USDT"), &risk)
            .await
            .unwrap();

        assert_eq!(
            second,
            OpenOutcome::AlreadyActive {
                symbol: "BTC/USDT".to_string()
            }
        );
        assert_eq!(gateway.limit_order_count(), 1);
    }

    #[tokio::test]
    async fn test_entry_failure_leaves_gate_open() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_entry(GatewayError::Rejected {
            status: 400,
            message: "insufficient balance".to_string(),
        });
        let manager = manager(gateway.clone());

        let err = manager
            .open_position(buy_request("BTC/USDT"), &RiskParameters::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::EntryFailed { .. }));
        assert!(!err.timed_out());
        assert!(!manager.has_active_trade());
        assert_eq!(gateway.conditional_order_count(), 0);
        assert_eq!(
            manager.state(),
            LifecycleState::Failed {
                symbol: "BTC/USDT".to_string(),
                kind: FailureKind::EntryRejected
            }
        );
    }

    #[tokio::test]
    async fn test_exit_failure_is_unprotected_not_active() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_exit(GatewayError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        });
        let manager = manager(gateway.clone());

        let err = manager
            .open_position(buy_request("BTC/USDT"), &RiskParameters::default())
            .await
            .unwrap_err();

        match &err {
            OrderError::Unprotected { symbol, entry_order, .. } => {
                assert_eq!(symbol, "BTC/USDT");
                assert_eq!(entry_order, "entry-1");
            }
            other => panic!("expected unprotected, got {other:?}"),
        }

        let trade = manager.active_trade().unwrap();
        assert_eq!(trade.protection, Protection::Unprotected);
        assert!(trade.exit_order.is_none());
        assert_eq!(
            manager.state(),
            LifecycleState::Failed {
                symbol: "BTC/USDT".to_string(),
                kind: FailureKind::Unprotected
            }
        );
    }

    #[tokio::test]
    async fn test_missing_atr_under_atr_policy() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway.clone());
        let risk = RiskParameters {
            stops: Some(StopPolicy::AtrMultiple {
                stop_loss_mult: 0.5,
                take_profit_mult: 1.5,
            }),
            ..Default::default()
        };

        let mut request = buy_request("BTC/USDT");
        request.atr = None;

        let err = manager.open_position(request, &risk).await.unwrap_err();
        assert!(matches!(err, OrderError::Bracket(BracketError::MissingAtr)));
        assert_eq!(gateway.limit_order_count(), 0);
        assert_eq!(manager.state(), LifecycleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_timeout_is_flagged() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_delay(Duration::from_secs(60));
        let manager = manager(gateway);

        let err = manager
            .open_position(buy_request("BTC/USDT"), &RiskParameters::default())
            .await
            .unwrap_err();
        assert!(err.timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_opens_yield_one_trade() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_delay(Duration::from_millis(50));
        let manager = Arc::new(manager(gateway.clone()));
        let risk = Arc::new(RiskParameters::default());

        let handles: Vec<_> = ["BTC/USDT", "ETH/USDT", "SOL/USDT", "XRP/USDT", "BTC/USDT"]
            .into_iter()
            .map(|symbol| {
                let manager = manager.clone();
                let risk = risk.clone();
                tokio::spawn(async move { manager.open_position(buy_request(symbol), &risk).await })
            })
            .collect();

        let mut opened = 0;
        let mut blocked = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                OpenOutcome::Opened(_) => opened += 1,
                OpenOutcome::AlreadyActive { .. } => blocked += 1,
            }
        }

        assert_eq!(opened, 1);
        assert_eq!(blocked, 4);
        assert_eq!(gateway.limit_order_count(), 1);
        assert_eq!(gateway.conditional_order_count(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_close_and_reset() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway);
        let risk = RiskParameters::default();

        manager.open_position(buy_request("BTC/USDT"), &risk).await.unwrap();
        assert!(manager.acknowledge_close("ETH/USDT").is_none());
        assert!(manager.has_active_trade());

        let closed = manager.acknowledge_close("BTC/USDT").unwrap();
        assert_eq!(closed.symbol, "BTC/USDT");
        assert_eq!(manager.state(), LifecycleState::Idle);

        manager.open_position(buy_request("ETH/USDT"), &risk).await.unwrap();
        manager.reset();
        assert!(!manager.has_active_trade());
        assert_eq!(manager.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_reconcile_adopts_and_releases() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway.clone());
        let risk = RiskParameters::default();
        let watch = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];

        assert_eq!(manager.reconcile(&watch, &risk).await.unwrap(), ReconcileOutcome::Flat);

        gateway.set_positions(Ok(vec![OpenPosition {
            symbol: "ETH/USDT".to_string(),
            side: Side::Sell,
            quantity: 1.5,
            reference_price: 2_000.0,
        }]));

        let ReconcileOutcome::Adopted(trade) = manager.reconcile(&watch, &risk).await.unwrap() else {
            panic!("expected adoption");
        };
        assert_eq!(trade.origin, TradeOrigin::Reconciled);
        assert_eq!(trade.side, Side::Sell);
        assert!((trade.stop_loss - 2_100.0).abs() < 1e-9);
        assert!(manager.has_active_trade());

        assert_eq!(
            manager.reconcile(&watch, &risk).await.unwrap(),
            ReconcileOutcome::Unchanged
        );

        gateway.set_positions(Ok(Vec::new()));
        assert!(matches!(
            manager.reconcile(&watch, &risk).await.unwrap(),
            ReconcileOutcome::Released(_)
        ));
        assert!(!manager.has_active_trade());
        assert_eq!(manager.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_unprotected_trade_when_exchange_looks_flat() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_exit(GatewayError::Rejected {
            status: 400,
            message: "stop price invalid".to_string(),
        });
        gateway.set_positions(Ok(Vec::new()));
        let manager = manager(gateway.clone());
        let risk = RiskParameters::default();
        let watch = vec!["BTC/USDT".to_string()];

        manager
            .open_position(buy_request("BTC/USDT"), &risk)
            .await
            .unwrap_err();

        assert_eq!(
            manager.reconcile(&watch, &risk).await.unwrap(),
            ReconcileOutcome::Unchanged
        );
        let trade = manager.active_trade().unwrap();
        assert_eq!(trade.protection, Protection::Unprotected);
        assert_eq!(
            manager.state(),
            LifecycleState::Failed {
                symbol: "BTC/USDT".to_string(),
                kind: FailureKind::Unprotected
            }
        );

        manager.acknowledge_close("BTC/USDT").unwrap();
        assert_eq!(manager.reconcile(&watch, &risk).await.unwrap(), ReconcileOutcome::Flat);
    }

    #[tokio::test]
    async fn test_reconcile_error_keeps_state() {
        let gateway = Arc::new(ScriptedGateway::new());
        let manager = manager(gateway.clone());
        let risk = RiskParameters::default();
        manager.open_position(buy_request("BTC/USDT"), &risk).await.unwrap();

        gateway.set_positions(Err(GatewayError::Transport("reset".to_string())));
        assert!(manager
            .reconcile(&["BTC/USDT".to_string()], &risk)
            .await
            .is_err());
        assert!(manager.has_active_trade());
    }
}
