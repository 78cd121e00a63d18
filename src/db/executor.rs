//! Guarded statement execution.
//!
//! Every statement runs through a [`StatementGuard`]:
//! - the pool is initialized on first use
//! - acquisition is bounded by the pool's acquire timeout
//! - execution is bounded by the statement timeout
//! - slow statements are logged without their parameter values
//! - driver errors are classified, and connection loss is reported to the pool
//! - a sample is recorded in the performance collector
//!
//! A connection that timed out or lost its link is closed instead of being
//! returned to the pool.

use crate::config::ExecutorSettings;
use crate::db::connection::DbConnection;
use crate::db::pool::PoolManager;
use crate::db::stats::{PerformanceCollector, QuerySample, QueryStats};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, JsonRow, QueryParam, WriteOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Statement text is cut to this many characters in log events.
pub const LOG_STATEMENT_CHARS: usize = 200;

/// How a guarded operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Timeout,
    Retryable,
    Fatal,
}

impl Outcome {
    pub fn of<T>(result: &DbResult<T>) -> Self {
        match result {
            Ok(_) => Outcome::Ok,
            Err(DbError::Timeout { .. }) => Outcome::Timeout,
            Err(e) if e.is_retryable() => Outcome::Retryable,
            Err(_) => Outcome::Fatal,
        }
    }
}

/// Cut a statement for logging, on a character boundary.
pub fn truncate_statement(sql: &str) -> String {
    let mut chars = sql.chars();
    let head: String = chars.by_ref().take(LOG_STATEMENT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Timeout, logging, classification and stats for single statements.
///
/// Shared by [`QueryExecutor`] and transaction connections.
#[derive(Debug, Clone)]
pub(crate) struct StatementGuard {
    pool: Arc<PoolManager>,
    settings: ExecutorSettings,
    collector: Arc<dyn PerformanceCollector>,
}

impl StatementGuard {
    pub(crate) fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Run one statement future under the statement timeout.
    pub(crate) async fn run<T, Fut>(&self, sql: &str, param_count: usize, statement: Fut) -> DbResult<T>
    where
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let timeout = self.settings.statement_timeout;
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, statement).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.classify(e)),
            Err(_) => Err(DbError::timeout("statement execution", timeout)),
        };
        let elapsed = started.elapsed();
        let slow = elapsed >= self.settings.slow_threshold;

        if slow {
            warn!(
                statement = %truncate_statement(sql),
                elapsed_ms = elapsed.as_millis() as u64,
                param_count,
                "Slow database operation"
            );
        }
        if let Err(e) = &result {
            debug!(
                statement = %truncate_statement(sql),
                elapsed_ms = elapsed.as_millis() as u64,
                outcome = ?Outcome::of(&result),
                error = %e,
                "Database operation failed"
            );
        }

        self.collector.record(&QuerySample {
            statement: sql,
            elapsed,
            success: result.is_ok(),
            slow,
        });
        result
    }

    /// Map a driver error into the taxonomy. A broken link mid-operation is
    /// reported as connection loss and the pool is told to reconnect.
    fn classify(&self, err: sqlx::Error) -> DbError {
        match DbError::from(err) {
            DbError::Connection { message, .. } | DbError::ConnectionLost { message } => {
                self.pool.mark_connection_lost();
                DbError::connection_lost(message)
            }
            other => other,
        }
    }
}

/// Whether a connection must be closed after a statement failed this way.
pub(crate) fn must_discard(error: &DbError) -> bool {
    matches!(
        error,
        DbError::Timeout { .. } | DbError::ConnectionLost { .. }
    )
}

/// Return `conn` to the pool, or close it in the background when `result`
/// left it unusable. A timed-out statement may still be running on it.
pub(crate) fn release<T>(conn: DbConnection, result: &DbResult<T>) {
    match result {
        Err(e) if must_discard(e) => {
            tokio::spawn(conn.close());
        }
        _ => drop(conn),
    }
}

/// Single-statement entry point over a [`PoolManager`].
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    guard: StatementGuard,
}

impl QueryExecutor {
    /// Create an executor recording into a fresh [`QueryStats`].
    pub fn new(pool: Arc<PoolManager>, settings: ExecutorSettings) -> Self {
        Self::with_collector(pool, settings, Arc::new(QueryStats::new()))
    }

    pub fn with_collector(
        pool: Arc<PoolManager>,
        settings: ExecutorSettings,
        collector: Arc<dyn PerformanceCollector>,
    ) -> Self {
        Self {
            guard: StatementGuard {
                pool,
                settings,
                collector,
            },
        }
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        self.guard.pool()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.guard.pool.db_type()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.guard.settings
    }

    pub(crate) fn guard(&self) -> &StatementGuard {
        &self.guard
    }

    /// Initialize the pool if needed and check out a connection.
    pub(crate) async fn acquire(&self) -> DbResult<DbConnection> {
        let pool = self.guard.pool();
        pool.initialize().await?;
        pool.acquire().await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let mut conn = self.acquire().await?;
        let result = self
            .guard
            .run(sql, params.len(), conn.fetch_all(sql, params))
            .await;
        release(conn, &result);
        result
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        let mut conn = self.acquire().await?;
        let result = self
            .guard
            .run(sql, params.len(), conn.fetch_optional(sql, params))
            .await;
        release(conn, &result);
        result
    }

    /// Run a single-integer query such as `SELECT COUNT(*) ...`.
    pub async fn fetch_count(&self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let mut conn = self.acquire().await?;
        let result = self
            .guard
            .run(sql, params.len(), conn.fetch_count(sql, params))
            .await;
        release(conn, &result);
        result
    }

    /// Execute a write statement (INSERT, UPDATE, DELETE).
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<WriteOutcome> {
        let mut conn = self.acquire().await?;
        let result = self
            .guard
            .run(sql, params.len(), conn.execute(sql, params))
            .await;
        release(conn, &result);
        result
    }
}
