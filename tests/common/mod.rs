//! Shared setup for integration tests: a temporary SQLite database with the
//! lore schema.

#![allow(dead_code)]

use lorebase::config::{DatabaseConfig, ExecutorSettings, PoolSettings};
use lorebase::db::{PoolManager, PoolState, QueryExecutor, QueryStats};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SCHEMA: &[&str] = &[
    "CREATE TABLE characters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        name_native TEXT,
        title TEXT,
        affiliation TEXT,
        first_episode_id INTEGER,
        description TEXT
    )",
    "CREATE TABLE items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        name_native TEXT,
        category TEXT NOT NULL,
        rarity INTEGER,
        price REAL,
        description TEXT
    )",
    "CREATE TABLE episodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        name_native TEXT,
        season INTEGER NOT NULL,
        number INTEGER NOT NULL,
        air_date TEXT,
        synopsis TEXT,
        UNIQUE (season, number)
    )",
];

pub struct TestDb {
    // Keeps the database file alive
    pub dir: TempDir,
    pub pool: Arc<PoolManager>,
    pub executor: QueryExecutor,
    pub stats: Arc<QueryStats>,
}

impl TestDb {
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Pool settings with short backoff so failing connects finish quickly.
pub fn fast_settings() -> PoolSettings {
    PoolSettings {
        max_attempts: 2,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
        ..PoolSettings::default()
    }
}

pub fn sqlite_url(dir: &TempDir, query: &str) -> String {
    let path = dir.path().join("lore.db");
    if query.is_empty() {
        format!("sqlite://{}", path.display())
    } else {
        format!("sqlite://{}?{}", path.display(), query)
    }
}

/// Open a pool over a fresh database file. `query` carries extra pool
/// options, e.g. `max_connections=10`.
pub async fn open(query: &str) -> TestDb {
    open_with(query, fast_settings()).await
}

pub async fn open_with(query: &str, settings: PoolSettings) -> TestDb {
    let dir = TempDir::new().unwrap();
    let options = if query.is_empty() {
        "create_if_missing=true".to_string()
    } else {
        format!("create_if_missing=true&{}", query)
    };
    let config = DatabaseConfig::parse(&sqlite_url(&dir, &options)).unwrap();
    let pool = PoolManager::new(config, settings);
    pool.initialize().await.unwrap();

    let stats = Arc::new(QueryStats::new());
    let executor =
        QueryExecutor::with_collector(pool.clone(), ExecutorSettings::default(), stats.clone());
    TestDb {
        dir,
        pool,
        executor,
        stats,
    }
}

/// Open a pool and create the lore tables.
pub async fn setup() -> TestDb {
    let db = open("").await;
    for statement in SCHEMA {
        db.executor.execute(statement, &[]).await.unwrap();
    }
    db.stats.reset();
    db
}

/// Poll until the pool reaches `state` or `within` elapses.
pub async fn wait_for_state(pool: &PoolManager, state: PoolState, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if pool.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.state() == state
}

/// Formatted log output collected in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.0.lock().unwrap()).contains(needle)
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Capture `tracing` events on this thread until the guard drops. Tasks
/// spawned on a `#[tokio::test]` runtime run on the same thread.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
