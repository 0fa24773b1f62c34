use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::balance_cache::BalanceCache;
use super::order_manager::{ActiveTrade, EntryRequest, OpenOutcome, OrderError, OrderManager, ReconcileOutcome};
use crate::api::MarketGateway;
use crate::config::EngineConfig;
use crate::error::{with_timeout, GatewayError};
use crate::indicators::InsufficientData;
use crate::risk::{BracketError, RiskParameters, SizeDecision};
use crate::strategy::signals::{timeframe_secs, validate_bar_spacing};
use crate::strategy::{Evaluation, Strategy};

/// Wait between scan cycles
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    Fixed { interval: Duration },
    /// `max(floor, base * (high - low) / low)` of the first watched symbol
    VolatilityAdjusted { base: Duration, floor: Duration },
}

impl Cadence {
    /// Wait for a given relative high/low spread
    pub fn wait_for_range(&self, range_ratio: f64) -> Duration {
        match *self {
            Cadence::Fixed { interval } => interval,
            Cadence::VolatilityAdjusted { base, floor } => {
                let scaled = base.as_secs_f64() * range_ratio.max(0.0);
                let scaled = if scaled.is_finite() {
                    Duration::from_secs(scaled as u64)
                } else {
                    base
                };
                scaled.max(floor)
            }
        }
    }
}

/// Result of evaluating one watch-list symbol
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    FetchFailed(GatewayError),
    Insufficient(InsufficientData),
    GappedSeries(String),
    NoSignal { price: f64, rsi: f64 },
    /// Balance unavailable: sized to zero
    SizedOut(GatewayError),
    BelowMinimum { requested: f64 },
    BracketRejected(BracketError),
    AlreadyActive { active: String },
    Opened(ActiveTrade),
    EntryFailed(GatewayError),
    Unprotected(GatewayError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    SkippedActiveTrade,
    TradeOpened { symbol: String },
    NoTrade,
    /// Analysis ran past the cycle deadline
    TimedOut,
    Unprotected { symbol: String },
    /// Shutdown observed between symbols
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub symbols: Vec<(String, SymbolOutcome)>,
    pub reconciled: Option<ReconcileOutcome>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            outcome: CycleOutcome::NoTrade,
            symbols: Vec::new(),
            reconciled: None,
        }
    }

    pub fn outcome_for(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, outcome)| outcome)
    }
}

/// Static scan settings
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub watch_list: Vec<String>,
    pub timeframe: String,
    pub bar_limit: usize,
    pub risk: RiskParameters,
    pub cadence: Cadence,
    pub cycle_timeout: Duration,
    pub call_timeout: Duration,
    pub release_on_flat: bool,
    pub reject_gapped_series: bool,
}

impl ScanSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            watch_list: config.watch_list.clone(),
            timeframe: config.timeframe.clone(),
            bar_limit: config.bar_limit,
            risk: config.risk.clone(),
            cadence: config.schedule.cadence(),
            cycle_timeout: config.schedule.cycle_timeout(),
            call_timeout: config.schedule.call_timeout(),
            release_on_flat: config.schedule.release_on_flat,
            reject_gapped_series: config.schedule.reject_gapped_series,
        }
    }
}

/// A signal that survived analysis and sizing
struct Candidate {
    request: EntryRequest,
    decision: SizeDecision,
}

/// Periodic watch-list scan driving the order manager
pub struct ScanScheduler {
    gateway: Arc<dyn MarketGateway>,
    strategy: Arc<dyn Strategy>,
    balance: Arc<BalanceCache>,
    orders: Arc<OrderManager>,
    settings: ScanSettings,
}

impl ScanScheduler {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        strategy: Arc<dyn Strategy>,
        balance: Arc<BalanceCache>,
        orders: Arc<OrderManager>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            gateway,
            strategy,
            balance,
            orders,
            settings,
        }
    }

    pub fn order_manager(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    /// One scan over the watch list
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(None).await
    }

    /// Cycle, wait, repeat until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            strategy = self.strategy.name(),
            symbols = ?self.settings.watch_list,
            timeframe = %self.settings.timeframe,
            "Starting scan loop"
        );

        let mut cycles: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            cycles += 1;
            let report = self.cycle(Some(&shutdown)).await;
            tracing::info!(cycle = cycles, outcome = ?report.outcome, "Cycle complete");

            let wait = self.next_wait().await;
            tracing::debug!("Next scan in {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(cycles = cycles, "Scan loop stopped");
    }

    /// Wait before the next cycle according to the cadence
    pub async fn next_wait(&self) -> Duration {
        let cadence = self.settings.cadence;
        let (base, symbol) = match (cadence, self.settings.watch_list.first()) {
            (Cadence::Fixed { interval }, _) => return interval,
            (Cadence::VolatilityAdjusted { base, .. }, None) => return base,
            (Cadence::VolatilityAdjusted { base, .. }, Some(symbol)) => (base, symbol),
        };

        match with_timeout(self.settings.call_timeout, self.gateway.fetch_ticker(symbol)).await {
            Ok(ticker) => {
                let wait = cadence.wait_for_range(ticker.range_ratio());
                tracing::debug!(
                    symbol = %symbol,
                    volatility = ticker.range_ratio(),
                    wait_secs = wait.as_secs(),
                    "Volatility-adjusted wait"
                );
                wait
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Ticker unavailable ({}), using base interval", e);
                base
            }
        }
    }

    async fn cycle(&self, shutdown: Option<&watch::Receiver<bool>>) -> CycleReport {
        let mut report = CycleReport::new();

        if let Some(trade) = self.orders.active_trade() {
            if self.settings.release_on_flat {
                match self.orders.reconcile(&self.settings.watch_list, &self.settings.risk).await {
                    Ok(outcome) => report.reconciled = Some(outcome),
                    Err(e) => tracing::warn!(symbol = %trade.symbol, "Reconciliation failed: {}", e),
                }
            }

            tracing::info!(
                trade_id = %trade.id,
                symbol = %trade.symbol,
                protection = ?trade.protection,
                "Trade active, skipping evaluation"
            );
            report.outcome = CycleOutcome::SkippedActiveTrade;
            return report;
        }

        let deadline = Instant::now() + self.settings.cycle_timeout;

        for symbol in &self.settings.watch_list {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                tracing::info!("Shutdown requested, ending cycle early");
                report.outcome = CycleOutcome::Interrupted;
                break;
            }

            let candidate = match tokio::time::timeout_at(deadline, self.analyze(symbol)).await {
                Ok(Ok(candidate)) => candidate,
                Ok(Err(outcome)) => {
                    report.symbols.push((symbol.clone(), outcome));
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        symbol = %symbol,
                        timeout = ?self.settings.cycle_timeout,
                        "Cycle deadline reached during analysis"
                    );
                    report.outcome = CycleOutcome::TimedOut;
                    break;
                }
            };

            // Submission is never raced against the deadline
            let outcome = self.submit(symbol, candidate).await;
            let stop = match &outcome {
                SymbolOutcome::Opened(_) => {
                    report.outcome = CycleOutcome::TradeOpened {
                        symbol: symbol.clone(),
                    };
                    true
                }
                SymbolOutcome::Unprotected(_) => {
                    report.outcome = CycleOutcome::Unprotected {
                        symbol: symbol.clone(),
                    };
                    true
                }
                SymbolOutcome::AlreadyActive { .. } => true,
                SymbolOutcome::EntryFailed(GatewayError::Timeout(_)) => {
                    // The exchange may have accepted the order after all
                    match self.orders.reconcile(&self.settings.watch_list, &self.settings.risk).await {
                        Ok(outcome) => report.reconciled = Some(outcome),
                        Err(e) => tracing::warn!("Reconciliation after entry timeout failed: {}", e),
                    }
                    self.orders.has_active_trade()
                }
                _ => false,
            };

            report.symbols.push((symbol.clone(), outcome));
            if stop {
                break;
            }
        }

        report
    }

    /// Everything before submission: bars, indicators, signal, balance, sizing
    async fn analyze(&self, symbol: &str) -> Result<Candidate, SymbolOutcome> {
        let settings = &self.settings;

        let bars = with_timeout(
            settings.call_timeout,
            self.gateway
                .fetch_bars(symbol, &settings.timeframe, settings.bar_limit),
        )
        .await
        .map_err(|e| {
            tracing::warn!(symbol = %symbol, transient = e.is_transient(), "Failed to fetch bars: {}", e);
            SymbolOutcome::FetchFailed(e)
        })?;

        if settings.reject_gapped_series {
            if let Some(secs) = timeframe_secs(&settings.timeframe) {
                validate_bar_spacing(&bars, secs).map_err(|e| {
                    tracing::warn!(symbol = %symbol, bars = bars.len(), "Rejecting bar series: {}", e);
                    SymbolOutcome::GappedSeries(e.to_string())
                })?;
            }
        }

        let Evaluation { signal, snapshot } =
            self.strategy.evaluate(symbol, &bars).map_err(|e| {
                tracing::info!(symbol = %symbol, "Skipping: {}", e);
                SymbolOutcome::Insufficient(e)
            })?;

        let Some(side) = signal.direction.side() else {
            tracing::info!(
                symbol = %symbol,
                price = signal.price,
                rsi = signal.rsi,
                cross = ?snapshot.ma_cross,
                breakout = ?snapshot.breakout,
                impulse = ?snapshot.impulse,
                "No signal"
            );
            return Err(SymbolOutcome::NoSignal {
                price: signal.price,
                rsi: signal.rsi,
            });
        };

        let balance = match self.balance.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(
                    symbol = %symbol,
                    side = %side,
                    price = signal.price,
                    "Balance unavailable, position size is zero: {}",
                    e
                );
                return Err(SymbolOutcome::SizedOut(e));
            }
        };

        let decision = settings.risk.sizer().size(balance, signal.price);
        let Some(quantity) = decision.quantity() else {
            let requested = match decision {
                SizeDecision::BelowMinimum { requested } => requested,
                _ => 0.0,
            };
            tracing::info!(
                symbol = %symbol,
                side = %side,
                price = signal.price,
                balance = balance,
                quantity = requested,
                min = settings.risk.min_amount,
                "Calculated amount below the minimum allowed, skipping trade"
            );
            return Err(SymbolOutcome::BelowMinimum { requested });
        };

        tracing::info!(
            symbol = %symbol,
            side = %side,
            price = signal.price,
            rsi = signal.rsi,
            cross = ?snapshot.ma_cross,
            breakout = ?snapshot.breakout,
            impulse = ?snapshot.impulse,
            quantity = quantity,
            "📈 {} signal",
            side
        );

        Ok(Candidate {
            request: EntryRequest {
                symbol: symbol.to_string(),
                side,
                quantity,
                entry_price: signal.price,
                atr: snapshot.atr,
            },
            decision,
        })
    }

    async fn submit(&self, symbol: &str, candidate: Candidate) -> SymbolOutcome {
        if let SizeDecision::Capped { quantity, requested } = candidate.decision {
            tracing::info!(
                symbol = %symbol,
                requested = requested,
                quantity = quantity,
                "Calculated amount exceeds the maximum allowed, adjusting to maximum"
            );
        }

        match self
            .orders
            .open_position(candidate.request, &self.settings.risk)
            .await
        {
            Ok(OpenOutcome::Opened(trade)) => {
                self.balance.invalidate();
                SymbolOutcome::Opened(trade)
            }
            Ok(OpenOutcome::AlreadyActive { symbol: active }) => {
                SymbolOutcome::AlreadyActive { active }
            }
            Err(OrderError::Bracket(e)) => {
                tracing::warn!(symbol = %symbol, "Bracket rejected: {}", e);
                SymbolOutcome::BracketRejected(e)
            }
            Err(OrderError::EntryFailed { source, .. }) => {
                self.balance.invalidate();
                SymbolOutcome::EntryFailed(source)
            }
            Err(OrderError::Unprotected { source, .. }) => {
                self.balance.invalidate();
                SymbolOutcome::Unprotected(source)
            }
        }
    }
}
