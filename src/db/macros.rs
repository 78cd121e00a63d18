//! Backend dispatch macro.
//!
//! `DbPool` and `DbConnection` are enums over the three sqlx backends. The
//! macro expands one body per variant and binds a caller-named type alias to
//! the backend's `sqlx::Database` type, so the body can be written once:
//!
//! ```ignore
//! dispatch!(self, DbConnection, conn, Db => {
//!     sqlx::query::<Db>(sql).bind_all(params).execute(&mut **conn).await?
//! })
//! ```

/// Match a backend enum and run `$body` with `$inner` bound to the variant's
/// payload and `$db` aliased to its `sqlx::Database` type.
#[macro_export]
macro_rules! dispatch {
    ($value:expr, $enum:ident, $inner:ident, $db:ident => $body:expr) => {
        match $value {
            $crate::db::$enum::MySql($inner) => {
                #[allow(dead_code)]
                type $db = ::sqlx::MySql;
                $body
            }
            $crate::db::$enum::Postgres($inner) => {
                #[allow(dead_code)]
                type $db = ::sqlx::Postgres;
                $body
            }
            $crate::db::$enum::SQLite($inner) => {
                #[allow(dead_code)]
                type $db = ::sqlx::Sqlite;
                $body
            }
        }
    };
}

pub use dispatch;

#[cfg(test)]
mod tests {
    use crate::db::DbPool;
    use crate::models::DatabaseType;

    fn backend_name(pool: &DbPool) -> &'static str {
        dispatch!(pool, DbPool, _p, Db => <Db as sqlx::Database>::NAME)
    }

    #[tokio::test]
    async fn test_dispatch_binds_backend_type() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy("sqlite::memory:")
            .unwrap();
        let pool = DbPool::SQLite(pool);
        assert_eq!(backend_name(&pool), "SQLite");
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
    }
}
