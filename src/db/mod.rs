//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool lifecycle (initialize, health, reconnect, drain)
//! - Guarded single-statement execution
//! - Transactions with deadlock retry
//! - Parameter binding and row decoding per backend
//! - Per-statement performance tracking
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub(crate) mod params;
pub mod pool;
pub mod retry;
pub mod stats;
pub mod transaction;
pub mod types;

pub use connection::DbConnection;
pub use executor::{Outcome, QueryExecutor};
pub use pool::{ConnectAttempt, DbPool, HealthReport, PoolManager, PoolState, PoolStats};
pub use retry::{Backoff, DeadlockRetry, RetryDecision};
pub use stats::{PerformanceCollector, QuerySample, QueryStats, StatementStats};
pub use transaction::{
    IsolationLevel, TransactionCoordinator, TransactionOptions, TxConnection, TxFuture,
};
