use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api::mexc::MEXC_API_BASE;
use crate::error::ConfigError;
use crate::execution::scheduler::Cadence;
use crate::indicators::IndicatorConfig;
use crate::risk::{SizingMode, StopPolicy};
use crate::strategy::signals::timeframe_secs;
use crate::strategy::SignalConfig;

pub use crate::risk::RiskParameters;

pub const ENV_PREFIX: &str = "BRACKETBOT";
const DEFAULT_CONFIG_FILE: &str = "bracketbot";

/// Exchange connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout_secs: u64,
    pub requests_per_second: u32,
    pub recv_window_ms: u64,
    /// Route orders to the in-process paper book
    pub paper: bool,
    pub paper_balance: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: MEXC_API_BASE.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            request_timeout_secs: 10,
            requests_per_second: 10,
            recv_window_ms: 5_000,
            paper: false,
            paper_balance: 1_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CadenceKind {
    Fixed,
    VolatilityAdjusted,
}

/// Scan loop timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cadence: CadenceKind,
    pub interval_secs: u64,
    /// Lower bound for the volatility-adjusted wait
    pub floor_secs: u64,
    /// Deadline for the analysis part of one cycle
    pub cycle_timeout_secs: u64,
    /// Deadline for any single remote call
    pub call_timeout_secs: u64,
    /// While a trade is held, check whether the exchange reports it flat
    pub release_on_flat: bool,
    pub reject_gapped_series: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence: CadenceKind::Fixed,
            interval_secs: 60,
            floor_secs: 10,
            cycle_timeout_secs: 45,
            call_timeout_secs: 10,
            release_on_flat: true,
            reject_gapped_series: true,
        }
    }
}

impl ScheduleConfig {
    pub fn cadence(&self) -> Cadence {
        let base = Duration::from_secs(self.interval_secs);
        match self.cadence {
            CadenceKind::Fixed => Cadence::Fixed { interval: base },
            CadenceKind::VolatilityAdjusted => Cadence::VolatilityAdjusted {
                base,
                floor: Duration::from_secs(self.floor_secs),
            },
        }
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub exchange: ExchangeConfig,
    pub watch_list: Vec<String>,
    pub timeframe: String,
    pub bar_limit: usize,
    pub indicators: IndicatorConfig,
    pub signals: SignalConfig,
    pub risk: RiskParameters,
    pub balance_cache_secs: u64,
    pub schedule: ScheduleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            watch_list: vec!["BTC/USDT".to_string()],
            timeframe: "15m".to_string(),
            bar_limit: 300,
            indicators: IndicatorConfig::default(),
            signals: SignalConfig::default(),
            risk: RiskParameters::default(),
            balance_cache_secs: 300,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional file plus `BRACKETBOT__*` environment variables
    ///
    /// Without an explicit path, `bracketbot.{toml,yaml,json}` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch_list")
                    .try_parsing(true),
            )
            .build()?;

        let mut engine: EngineConfig = settings.try_deserialize()?;

        if engine.exchange.api_key.is_empty() {
            if let Ok(key) = std::env::var("MEXC_API_KEY") {
                engine.exchange.api_key = key;
            }
        }
        if engine.exchange.api_secret.is_empty() {
            if let Ok(secret) = std::env::var("MEXC_SECRET_KEY") {
                engine.exchange.api_secret = secret;
            }
        }

        Ok(engine)
    }

    pub fn timeframe_secs(&self) -> Option<u64> {
        timeframe_secs(&self.timeframe)
    }

    pub fn balance_freshness(&self) -> Duration {
        Duration::from_secs(self.balance_cache_secs)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.watch_list.is_empty() || self.watch_list.iter().any(|s| s.trim().is_empty()) {
            return invalid("watch_list must name at least one symbol".to_string());
        }
        if self.timeframe_secs().is_none() {
            return invalid(format!("unsupported timeframe {:?}", self.timeframe));
        }
        if !self.exchange.paper
            && (self.exchange.api_key.is_empty() || self.exchange.api_secret.is_empty())
        {
            return invalid(
                "MEXC_API_KEY and MEXC_SECRET_KEY are required unless paper trading".to_string(),
            );
        }
        if self.exchange.paper && self.exchange.paper_balance <= 0.0 {
            return invalid("paper_balance must be positive".to_string());
        }

        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.short_ma_period == 0 || ind.breakout_window == 0 {
            return invalid("indicator windows must be positive".to_string());
        }
        if ind.short_ma_period >= ind.long_ma_period {
            return invalid(format!(
                "short MA ({}) must be shorter than long MA ({})",
                ind.short_ma_period, ind.long_ma_period
            ));
        }
        if ind
            .fibonacci_ratios
            .iter()
            .any(|r| !(0.0..=1.0).contains(r))
        {
            return invalid("fibonacci ratios must lie in [0, 1]".to_string());
        }
        if self.bar_limit < ind.rsi_period + 1 {
            return invalid(format!(
                "bar_limit {} cannot cover RSI period {}",
                self.bar_limit, ind.rsi_period
            ));
        }
        if self.signals.use_ma_cross && self.bar_limit < ind.long_ma_period + 1 {
            return invalid(format!(
                "bar_limit {} cannot cover long MA {} with use_ma_cross enabled",
                self.bar_limit, ind.long_ma_period
            ));
        }

        let sig = &self.signals;
        if !(0.0..=100.0).contains(&sig.rsi_oversold)
            || !(0.0..=100.0).contains(&sig.rsi_overbought)
            || sig.rsi_oversold >= sig.rsi_overbought
        {
            return invalid(format!(
                "RSI thresholds {}/{} must satisfy 0 <= oversold < overbought <= 100",
                sig.rsi_oversold, sig.rsi_overbought
            ));
        }

        let risk = &self.risk;
        if risk.leverage == 0 {
            return invalid("leverage must be at least 1".to_string());
        }
        if risk.min_amount <= 0.0 || risk.min_amount > risk.max_amount {
            return invalid(format!(
                "order bounds {}..{} are inconsistent",
                risk.min_amount, risk.max_amount
            ));
        }
        if !(0.0..1.0).contains(&risk.entry_offset_pct) {
            return invalid("entry_offset_pct must lie in [0, 1)".to_string());
        }
        match risk.sizing {
            SizingMode::FractionOfBalance { fraction } if !(fraction > 0.0 && fraction <= 1.0) => {
                return invalid("sizing fraction must lie in (0, 1]".to_string());
            }
            SizingMode::FixedRisk { amount } if amount <= 0.0 => {
                return invalid("fixed risk amount must be positive".to_string());
            }
            _ => {}
        }
        match risk.stop_policy() {
            StopPolicy::Percentage {
                stop_loss_pct,
                take_profit_pct,
            } if !(stop_loss_pct > 0.0
                && stop_loss_pct < 1.0
                && take_profit_pct > 0.0
                && take_profit_pct < 1.0) =>
            {
                return invalid(format!(
                    "percentage stops {stop_loss_pct}/{take_profit_pct} must lie in (0, 1), raise leverage or set risk.stops"
                ));
            }
            StopPolicy::AtrMultiple {
                stop_loss_mult,
                take_profit_mult,
            } if stop_loss_mult <= 0.0 || take_profit_mult <= 0.0 => {
                return invalid("ATR multiples must be positive".to_string());
            }
            _ => {}
        }

        let schedule = &self.schedule;
        if schedule.interval_secs == 0
            || schedule.cycle_timeout_secs == 0
            || schedule.call_timeout_secs == 0
        {
            return invalid("schedule durations must be positive".to_string());
        }

        Ok(())
    }
}
