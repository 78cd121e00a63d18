//! lorebase
//!
//! Data-access core for a multi-language game reference service: a
//! supervised connection pool, guarded statement execution, transactions with
//! deadlock retry, and a generic repository that entity models build on.
//!
//! ```ignore
//! let config = DatabaseConfig::parse("sqlite:lore.db")?;
//! let pool = PoolManager::new(config, PoolSettings::default());
//! let executor = QueryExecutor::new(pool.clone(), ExecutorSettings::default());
//! let characters = Repository::<Character>::new(executor);
//! let page = characters.search(&["name"], "link", &PageRequest::default(), None).await?;
//! pool.close().await;
//! ```

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod models;
pub mod repository;

pub use config::{Config, DatabaseConfig, ExecutorSettings, PoolSettings};
pub use db::{PoolManager, QueryExecutor, TransactionCoordinator, TransactionOptions};
pub use error::{DbError, DbResult};
pub use repository::{Entity, PageRequest, Paginated, Repository};
