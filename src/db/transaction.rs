//! Transaction coordination.
//!
//! [`TransactionCoordinator::run`] executes a unit-of-work callback between
//! `BEGIN` and `COMMIT` on one dedicated connection. A failing callback is
//! rolled back; deadlocks are retried on a fresh connection following
//! [`DeadlockRetry`].
//!
//! Transactions are driven with explicit statements so that the isolation
//! level can be applied per backend:
//!
//! | Backend    | Begin                                                      |
//! |------------|------------------------------------------------------------|
//! | MySQL      | `SET TRANSACTION ISOLATION LEVEL ...` + `START TRANSACTION` |
//! | PostgreSQL | `BEGIN ISOLATION LEVEL ...`                                 |
//! | SQLite     | `BEGIN DEFERRED` / `IMMEDIATE` / `EXCLUSIVE`                |

use crate::config::{DEFAULT_MAX_DEADLOCK_RETRIES, DEFAULT_TRANSACTION_TIMEOUT_SECS};
use crate::db::connection::DbConnection;
use crate::db::executor::{QueryExecutor, StatementGuard, must_discard};
use crate::db::retry::{DeadlockRetry, RetryDecision};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, JsonRow, QueryParam, WriteOutcome};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Statements that open a transaction on `db` at `isolation`.
///
/// SQLite has no isolation levels; stronger levels take the write lock
/// earlier instead.
pub fn begin_statements(db: DatabaseType, isolation: Option<IsolationLevel>) -> Vec<String> {
    match (db, isolation) {
        (DatabaseType::MySQL, None) => vec!["START TRANSACTION".to_string()],
        (DatabaseType::MySQL, Some(level)) => vec![
            format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
            "START TRANSACTION".to_string(),
        ],
        (DatabaseType::PostgreSQL, None) => vec!["BEGIN".to_string()],
        (DatabaseType::PostgreSQL, Some(level)) => {
            vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())]
        }
        (DatabaseType::SQLite, None)
        | (DatabaseType::SQLite, Some(IsolationLevel::ReadUncommitted))
        | (DatabaseType::SQLite, Some(IsolationLevel::ReadCommitted)) => {
            vec!["BEGIN DEFERRED".to_string()]
        }
        (DatabaseType::SQLite, Some(IsolationLevel::RepeatableRead)) => {
            vec!["BEGIN IMMEDIATE".to_string()]
        }
        (DatabaseType::SQLite, Some(IsolationLevel::Serializable)) => {
            vec!["BEGIN EXCLUSIVE".to_string()]
        }
    }
}

/// Per-transaction options.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    /// `None` uses the server default
    pub isolation: Option<IsolationLevel>,
    /// Bound on the callback of one attempt
    pub timeout: Duration,
    pub retry_on_deadlock: bool,
    pub max_retries: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: None,
            timeout: Duration::from_secs(DEFAULT_TRANSACTION_TIMEOUT_SECS),
            retry_on_deadlock: true,
            max_retries: DEFAULT_MAX_DEADLOCK_RETRIES,
        }
    }
}

impl TransactionOptions {
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry_on_deadlock = false;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The connection handed to a transaction callback.
///
/// Statements get the executor's timeout, classification, slow logging and
/// stats.
#[derive(Debug)]
pub struct TxConnection {
    conn: DbConnection,
    guard: StatementGuard,
}

impl TxConnection {
    pub fn db_type(&self) -> DatabaseType {
        self.conn.db_type()
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        self.guard
            .run(sql, params.len(), self.conn.fetch_all(sql, params))
            .await
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        self.guard
            .run(sql, params.len(), self.conn.fetch_optional(sql, params))
            .await
    }

    pub async fn fetch_count(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        self.guard
            .run(sql, params.len(), self.conn.fetch_count(sql, params))
            .await
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<WriteOutcome> {
        self.guard
            .run(sql, params.len(), self.conn.execute(sql, params))
            .await
    }

    async fn control(&mut self, sql: &str) -> DbResult<()> {
        self.guard.run(sql, 0, self.conn.execute_raw(sql)).await
    }

    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> DbResult<()> {
        for sql in begin_statements(self.db_type(), isolation) {
            self.control(&sql).await?;
        }
        Ok(())
    }

    /// Roll back after `cause`, then give the connection back or close it.
    ///
    /// Failures here are logged only; `cause` is what the caller sees.
    async fn abort(mut self, cause: &DbError) {
        if must_discard(cause) {
            // A statement may still be in flight; closing ends the transaction
            tokio::spawn(self.conn.close());
            return;
        }
        match self.control("ROLLBACK").await {
            Ok(()) => debug!(cause = %cause, "Transaction rolled back"),
            Err(e) => {
                error!(error = %e, cause = %cause, "Rollback failed; closing connection");
                tokio::spawn(self.conn.close());
            }
        }
    }
}

/// Callback type accepted by [`TransactionCoordinator::run`].
pub type TxFuture<'t, T> = BoxFuture<'t, DbResult<T>>;

/// Runs units of work inside transactions.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    executor: QueryExecutor,
    defaults: TransactionOptions,
}

impl TransactionCoordinator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self::with_defaults(executor, TransactionOptions::default())
    }

    pub fn with_defaults(executor: QueryExecutor, defaults: TransactionOptions) -> Self {
        Self { executor, defaults }
    }

    pub fn default_options(&self) -> &TransactionOptions {
        &self.defaults
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Run `callback` inside a transaction with the coordinator's defaults.
    pub async fn run_default<T, F>(&self, callback: F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TxConnection) -> TxFuture<'t, T> + Send,
        T: Send + 'static,
    {
        let options = self.defaults.clone();
        self.run(&options, callback).await
    }

    /// Run `callback` inside a transaction.
    ///
    /// The callback may be invoked more than once when deadlocks are retried,
    /// so it must not consume captured state. Returns the callback's value
    /// after a successful commit.
    ///
    /// ```ignore
    /// let total = coordinator
    ///     .run(&TransactionOptions::default(), |tx| {
    ///         Box::pin(async move {
    ///             tx.execute("UPDATE items SET stock = stock - 1 WHERE id = ?", &[7.into()]).await?;
    ///             tx.fetch_count("SELECT SUM(stock) FROM items", &[]).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, options: &TransactionOptions, mut callback: F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TxConnection) -> TxFuture<'t, T> + Send,
        T: Send + 'static,
    {
        let mut retry = DeadlockRetry::new(options.max_retries, options.retry_on_deadlock);
        let started = Instant::now();

        loop {
            let attempt = retry.begin_attempt();
            match self.attempt(options, &mut callback).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            attempts = attempt,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Transaction succeeded after deadlock retries"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => match retry.on_error(e) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            attempt,
                            max_retries = options.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Deadlock detected, retrying transaction"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Fail(e) => {
                        if matches!(e, DbError::RetriesExhausted { .. }) {
                            error!(attempts = attempt, "Transaction failed after maximum retries");
                        }
                        return Err(e);
                    }
                },
            }
        }
    }

    /// One attempt on a fresh connection.
    async fn attempt<T, F>(&self, options: &TransactionOptions, callback: &mut F) -> DbResult<T>
    where
        F: for<'t> FnMut(&'t mut TxConnection) -> TxFuture<'t, T> + Send,
        T: Send + 'static,
    {
        let conn = self.executor.acquire().await?;
        let mut tx = TxConnection {
            conn,
            guard: self.executor.guard().clone(),
        };

        if let Err(e) = tx.begin(options.isolation).await {
            tx.abort(&e).await;
            return Err(e);
        }

        let result = match tokio::time::timeout(options.timeout, callback(&mut tx)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout("transaction", options.timeout)),
        };

        match result {
            Ok(value) => match tx.control("COMMIT").await {
                Ok(()) => Ok(value),
                Err(e) => {
                    tx.abort(&e).await;
                    Err(e)
                }
            },
            Err(e) => {
                tx.abort(&e).await;
                Err(e)
            }
        }
    }
}
