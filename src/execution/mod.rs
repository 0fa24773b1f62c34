// Order lifecycle, balance caching and the scan loop
pub mod balance_cache;
pub mod clock;
pub mod order_manager;
pub mod scheduler;

pub use balance_cache::{BalanceCache, CachedBalance};
pub use clock::{Clock, ManualClock, SystemClock};
pub use order_manager::{
    ActiveTrade, EntryRequest, FailureKind, LifecycleState, OpenOutcome, OrderError,
    OrderManager, Protection, ReconcileOutcome, TradeOrigin,
};
pub use scheduler::{Cadence, CycleOutcome, CycleReport, ScanScheduler, ScanSettings, SymbolOutcome};
