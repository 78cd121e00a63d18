//! A connection checked out of the pool.
//!
//! `DbConnection` runs one statement at a time on a single backend connection.
//! Errors are raw `sqlx::Error`s; classification and timeouts are applied by
//! the executor and the transaction coordinator.

use crate::db::params::BindParams;
use crate::db::types::RowToJson;
use crate::dispatch;
use crate::models::{DatabaseType, JsonRow, QueryParam, WriteOutcome};
use sqlx::mysql::MySqlQueryResult;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgQueryResult;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{Connection, MySql, Postgres, Row, Sqlite};

/// Generated key reported in a command result.
trait GeneratedId {
    fn generated_id(&self) -> Option<i64>;
}

impl GeneratedId for MySqlQueryResult {
    fn generated_id(&self) -> Option<i64> {
        Some(self.last_insert_id() as i64)
    }
}

impl GeneratedId for PgQueryResult {
    fn generated_id(&self) -> Option<i64> {
        // Keys come back through RETURNING
        None
    }
}

impl GeneratedId for SqliteQueryResult {
    fn generated_id(&self) -> Option<i64> {
        Some(self.last_insert_rowid())
    }
}

/// A pooled connection for one backend.
///
/// Dropping it returns the connection to the pool. Use [`DbConnection::close`]
/// when the connection may be mid-statement or mid-transaction.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<JsonRow>, sqlx::Error> {
        dispatch!(self, DbConnection, conn, Db => {
            let rows = sqlx::query::<Db>(sql)
                .bind_all(params)
                .fetch_all(&mut **conn)
                .await?;
            Ok(rows.iter().map(RowToJson::to_json_row).collect())
        })
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Option<JsonRow>, sqlx::Error> {
        dispatch!(self, DbConnection, conn, Db => {
            let row = sqlx::query::<Db>(sql)
                .bind_all(params)
                .fetch_optional(&mut **conn)
                .await?;
            Ok(row.as_ref().map(RowToJson::to_json_row))
        })
    }

    /// Run a single-column integer query such as `SELECT COUNT(*) ...`.
    pub async fn fetch_count(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<i64, sqlx::Error> {
        dispatch!(self, DbConnection, conn, Db => {
            let row = sqlx::query::<Db>(sql)
                .bind_all(params)
                .fetch_one(&mut **conn)
                .await?;
            row.try_get::<i64, _>(0)
        })
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<WriteOutcome, sqlx::Error> {
        dispatch!(self, DbConnection, conn, Db => {
            let result = sqlx::query::<Db>(sql)
                .bind_all(params)
                .execute(&mut **conn)
                .await?;
            Ok(WriteOutcome {
                rows_affected: result.rows_affected(),
                last_insert_id: result.generated_id().filter(|id| *id > 0),
            })
        })
    }

    /// Run a control statement (`BEGIN`, `COMMIT`, `SET ...`) outside the
    /// prepared-statement protocol.
    pub async fn execute_raw(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        dispatch!(self, DbConnection, conn, Db => {
            sqlx::raw_sql(sql).execute(&mut **conn).await?;
            Ok(())
        })
    }

    /// Detach from the pool and close the underlying connection.
    ///
    /// The pool opens a replacement on demand.
    pub async fn close(self) {
        let result = dispatch!(self, DbConnection, conn, Db => conn.detach().close().await);
        if let Err(e) = result {
            tracing::debug!(error = %e, "Error while closing detached connection");
        }
    }
}
