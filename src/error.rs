//! Error types for the data-access core.
//!
//! This module defines all error types using `thiserror`. Raw driver errors are
//! classified exactly once, in `From<sqlx::Error>`, into a small taxonomy:
//! fatal configuration problems, transient connectivity, lock contention,
//! validation and not-found. Upstream code matches on variants and never
//! re-parses driver codes.

use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String, suggestion: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection lost: {message}. Retry the operation")]
    ConnectionLost { message: String },

    #[error("Database initialization failed after {attempts} attempts: {message}")]
    InitializationFailed { attempts: u32, message: String },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Lock wait timeout: {message}")]
    LockTimeout { message: String },

    #[error("Deadlock detected: {message}")]
    Deadlock { message: String },

    #[error("Transaction failed after maximum retries ({attempts} attempts): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse error category used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration; expected to stop startup
    Fatal,
    /// Connectivity problem; retrying the operation later may succeed
    Transient,
    /// Lock wait timeout or deadlock
    Contention,
    /// Rejected before any statement was issued
    Validation,
    NotFound,
    Internal,
}

impl DbError {
    /// Create a configuration (fatal) error with a helpful suggestion.
    pub fn configuration(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Create an initialization failure after exhausting connect attempts.
    pub fn initialization_failed(attempts: u32, message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            attempts,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a lock wait timeout error.
    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::LockTimeout {
            message: message.into(),
        }
    }

    /// Create a deadlock error.
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::Deadlock {
            message: message.into(),
        }
    }

    /// Wrap the last error of a transaction that ran out of deadlock retries.
    pub fn retries_exhausted(attempts: u32, last_error: DbError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last_error),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach `table.operation` context to pass-through driver errors.
    ///
    /// Classified errors (deadlock, timeout, not-found, ...) are returned
    /// unchanged; their variant already carries the meaning.
    pub fn in_operation(self, table: &str, operation: &str) -> Self {
        match self {
            Self::Database {
                message,
                sql_state,
                suggestion,
            } => Self::Database {
                message: format!("{}.{}: {}", table, operation, message),
                sql_state,
                suggestion,
            },
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::ConnectionLost { .. } => Some("Retry the operation"),
            Self::LockTimeout { .. } | Self::Deadlock { .. } | Self::RetriesExhausted { .. } => {
                Some("The data is busy; retry the request shortly")
            }
            _ => None,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::InitializationFailed { .. } => ErrorKind::Fatal,
            Self::Connection { .. }
            | Self::ConnectionLost { .. }
            | Self::Timeout { .. }
            | Self::PoolClosed => ErrorKind::Transient,
            Self::LockTimeout { .. } | Self::Deadlock { .. } | Self::RetriesExhausted { .. } => {
                ErrorKind::Contention
            }
            Self::InvalidInput { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Database { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP status the presentation layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Transient | ErrorKind::Contention => 503,
            ErrorKind::Fatal | ErrorKind::Internal => 500,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionLost { .. }
                | Self::Timeout { .. }
                | Self::Deadlock { .. }
        )
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }

    /// Fatal errors stop the connect retry loop immediately.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// What a driver error code means to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverCondition {
    Deadlock,
    LockTimeout,
    UnknownDatabase,
    AccessDenied,
    ConnectionLost,
    Other,
}

/// Map a driver error to a [`DriverCondition`] using MySQL error numbers,
/// PostgreSQL SQLSTATEs and SQLite result codes.
fn classify_database_error(db_err: &dyn DatabaseError) -> DriverCondition {
    if let Some(mysql) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
        return match mysql.number() {
            1213 => DriverCondition::Deadlock,
            1205 => DriverCondition::LockTimeout,
            1049 => DriverCondition::UnknownDatabase,
            1044 | 1045 => DriverCondition::AccessDenied,
            2006 | 2013 => DriverCondition::ConnectionLost,
            _ => DriverCondition::Other,
        };
    }

    match db_err.code().as_deref() {
        // PostgreSQL
        Some("40P01") => DriverCondition::Deadlock,
        Some("55P03") => DriverCondition::LockTimeout,
        Some("3D000") => DriverCondition::UnknownDatabase,
        Some("28P01") | Some("28000") => DriverCondition::AccessDenied,
        Some("57P01") | Some("57P02") => DriverCondition::ConnectionLost,
        Some(code) if code.starts_with("08") => DriverCondition::ConnectionLost,
        // SQLite primary and extended result codes
        Some("5") | Some("6") | Some("261") | Some("262") | Some("517") => {
            DriverCondition::LockTimeout
        }
        Some("14") => DriverCondition::UnknownDatabase,
        _ => DriverCondition::Other,
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match classify_database_error(db_err.as_ref()) {
                    DriverCondition::Deadlock => DbError::deadlock(message),
                    DriverCondition::LockTimeout => DbError::lock_timeout(message),
                    DriverCondition::UnknownDatabase => DbError::configuration(
                        message,
                        "Check that the database exists and the name is spelled correctly",
                    ),
                    DriverCondition::AccessDenied => DbError::configuration(
                        message,
                        "Verify the username and password in the connection string",
                    ),
                    DriverCondition::ConnectionLost => DbError::connection_lost(message),
                    DriverCondition::Other => DbError::database(
                        message,
                        db_err.code().map(|c| c.to_string()),
                        "Check the SQL syntax and referenced objects",
                    ),
                }
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection acquisition",
                std::time::Duration::from_secs(crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS),
            ),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => {
                DbError::connection_lost("Database worker crashed")
            }
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = DbError::timeout("statement execution", Duration::from_millis(1500));
        assert_eq!(
            err.to_string(),
            "Timeout: statement execution exceeded 1500ms"
        );
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database("Syntax error", Some("42601".to_string()), "Check SQL syntax");
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(
            DbError::connection_lost("reset").suggestion(),
            Some("Retry the operation")
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::deadlock("victim").is_retryable());
        assert!(!DbError::lock_timeout("waited").is_retryable());
        assert!(!DbError::invalid_input("bad").is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DbError::configuration("no db", "create it").kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            DbError::initialization_failed(5, "refused").kind(),
            ErrorKind::Fatal
        );
        assert_eq!(DbError::PoolClosed.kind(), ErrorKind::Transient);
        assert_eq!(DbError::lock_timeout("x").kind(), ErrorKind::Contention);
        assert_eq!(
            DbError::retries_exhausted(4, DbError::deadlock("x")).kind(),
            ErrorKind::Contention
        );
        assert_eq!(DbError::invalid_input("x").kind(), ErrorKind::Validation);
        assert_eq!(
            DbError::not_found("Character", 9).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(DbError::not_found("Item", 1).http_status(), 404);
        assert_eq!(DbError::invalid_input("x").http_status(), 400);
        assert_eq!(DbError::deadlock("x").http_status(), 503);
        assert_eq!(DbError::connection_lost("x").http_status(), 503);
        assert_eq!(DbError::internal("x").http_status(), 500);
    }

    #[test]
    fn test_in_operation_adds_context_to_driver_errors_only() {
        let err = DbError::database("no such column: foo", None, "check")
            .in_operation("characters", "search");
        assert!(err.to_string().contains("characters.search: no such column"));

        let err = DbError::deadlock("victim").in_operation("characters", "update");
        assert!(err.is_deadlock());
    }

    #[test]
    fn test_retries_exhausted_keeps_source() {
        use std::error::Error as _;
        let err = DbError::retries_exhausted(4, DbError::deadlock("victim"));
        assert!(err.to_string().contains("maximum retries"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_sqlx_pool_errors() {
        assert!(matches!(
            DbError::from(sqlx::Error::PoolClosed),
            DbError::PoolClosed
        ));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::Timeout { .. }
        ));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            DbError::from(sqlx::Error::Io(io)),
            DbError::Connection { .. }
        ));
    }
}
