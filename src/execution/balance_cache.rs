use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use super::clock::Clock;
use crate::api::MarketGateway;
use crate::error::{with_timeout, GatewayError};

/// Last balance read from the exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedBalance {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Time-bounded cache over `fetch_balance`
///
/// Reads within the freshness window never touch the exchange. Expired or
/// missing entries trigger exactly one refresh even under concurrent reads;
/// a failed refresh is reported to the caller and the old entry is kept, but
/// never served once stale.
pub struct BalanceCache {
    gateway: Arc<dyn MarketGateway>,
    clock: Arc<dyn Clock>,
    freshness: Duration,
    call_timeout: Duration,
    cached: RwLock<Option<CachedBalance>>,
    refresh: Mutex<()>,
}

impl BalanceCache {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        clock: Arc<dyn Clock>,
        freshness: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            clock,
            freshness,
            call_timeout,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub async fn get_balance(&self) -> Result<f64, GatewayError> {
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }

        let _guard = self.refresh.lock().await;

        // Another task may have refreshed while we waited
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }

        let value = with_timeout(self.call_timeout, self.gateway.fetch_balance())
            .await
            .map_err(|e| {
                tracing::warn!("Balance refresh failed: {}", e);
                e
            })?;

        let entry = CachedBalance {
            value,
            fetched_at: self.clock.now(),
        };
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(entry);
        }

        tracing::debug!(balance = value, "Balance refreshed");
        Ok(value)
    }

    /// Force a refresh on the next read
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
    }

    /// Current entry regardless of age
    pub fn cached(&self) -> Option<CachedBalance> {
        self.cached.read().ok().and_then(|cached| *cached)
    }

    fn fresh_value(&self) -> Option<f64> {
        let entry = self.cached()?;
        let age = self.clock.now() - entry.fetched_at;
        let window = chrono::Duration::from_std(self.freshness).ok()?;

        if age <= window {
            Some(entry.value)
        } else {
            None
        }
    }
}
