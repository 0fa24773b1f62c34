use anyhow::Context;
use bracketbot::api::{retry_fixed, MarketGateway, MexcClient, PaperGateway, RetryPolicy};
use bracketbot::config::EngineConfig;
use bracketbot::execution::{
    BalanceCache, Clock, CycleOutcome, OrderManager, Protection, ScanScheduler, ScanSettings,
    SystemClock,
};
use bracketbot::strategy::{CompositeStrategy, Strategy};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(
    name = "bracketbot",
    version,
    about = "Indicator-driven bracket-order trading engine for MEXC"
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to ./bracketbot.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Simulate orders in-process instead of sending them to the exchange
    #[arg(long)]
    paper: bool,

    /// Starting balance for paper trading
    #[arg(long)]
    paper_balance: Option<f64>,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.paper {
        config.exchange.paper = true;
    }
    if let Some(balance) = cli.paper_balance {
        config.exchange.paper_balance = balance;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("🚀 BracketBot starting");
    log_configuration(&config);

    let exchange = Arc::new(MexcClient::new(&config.exchange).context("Failed to build MEXC client")?);
    let gateway: Arc<dyn MarketGateway> = if config.exchange.paper {
        Arc::new(PaperGateway::new(exchange, config.exchange.paper_balance))
    } else {
        exchange
    };

    // Startup connectivity: retried, then fatal
    let policy = RetryPolicy::default();
    retry_fixed(policy, "Exchange ping", || gateway.ping())
        .await
        .context("Exchange unreachable")?;
    let balance = retry_fixed(policy, "Balance check", || gateway.fetch_balance())
        .await
        .context("Could not read account balance")?;
    tracing::info!("✅ Connected to exchange, balance: ${:.2}", balance);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = ScanSettings::from_config(&config);

    let balance_cache = Arc::new(BalanceCache::new(
        gateway.clone(),
        clock.clone(),
        config.balance_freshness(),
        settings.call_timeout,
    ));
    let orders = Arc::new(OrderManager::new(
        gateway.clone(),
        clock,
        settings.call_timeout,
    ));

    match orders.reconcile(&config.watch_list, &config.risk).await {
        Ok(outcome) => tracing::info!("Startup reconciliation: {:?}", outcome),
        Err(e) => tracing::warn!("Startup reconciliation failed, assuming flat: {}", e),
    }

    let strategy: Arc<dyn Strategy> = Arc::new(CompositeStrategy::new(
        config.indicators.clone(),
        config.signals.clone(),
    ));

    let scheduler = Arc::new(ScanScheduler::new(
        gateway,
        strategy,
        balance_cache,
        orders.clone(),
        settings,
    ));

    if cli.once {
        let report = scheduler.run_cycle().await;
        for (symbol, outcome) in &report.symbols {
            tracing::info!(symbol = %symbol, "{:?}", outcome);
        }
        tracing::info!("Cycle outcome: {:?}", report.outcome);
        return match report.outcome {
            CycleOutcome::Unprotected { symbol } => {
                anyhow::bail!("{} position left without a protective order", symbol)
            }
            _ => Ok(()),
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scan_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run(shutdown_rx).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down after the current step...");
            let _ = shutdown_tx.send(true);
        }
        result = &mut scan_task => {
            tracing::error!("Scan loop exited unexpectedly: {:?}", result);
            anyhow::bail!("scan loop exited");
        }
    }

    scan_task.await.context("Scan loop panicked")?;

    if let Some(trade) = orders.active_trade() {
        if trade.protection == Protection::Unprotected {
            tracing::error!(
                symbol = %trade.symbol,
                quantity = trade.quantity,
                "🚨 Exiting with an UNPROTECTED position, place a stop manually"
            );
        } else {
            tracing::info!(symbol = %trade.symbol, "Exiting with an open bracketed trade");
        }
    }

    tracing::info!("👋 BracketBot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bracketbot=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_configuration(config: &EngineConfig) {
    tracing::info!("📊 Configuration:");
    tracing::info!(
        "  Mode: {}",
        if config.exchange.paper { "paper" } else { "live" }
    );
    tracing::info!("  Symbols: {}", config.watch_list.join(", "));
    tracing::info!("  Timeframe: {} ({} bars)", config.timeframe, config.bar_limit);
    tracing::info!(
        "  RSI: {} ({}/{})",
        config.indicators.rsi_period,
        config.signals.rsi_oversold,
        config.signals.rsi_overbought
    );
    tracing::info!(
        "  MA cross: {}/{}",
        config.indicators.short_ma_period,
        config.indicators.long_ma_period
    );
    tracing::info!("  Leverage: {}x", config.risk.leverage);
    tracing::info!("  Stops: {:?}", config.risk.stop_policy());
    tracing::info!("  Sizing: {:?}", config.risk.sizing);
    tracing::info!("  Cadence: {:?}", config.schedule.cadence());
}
