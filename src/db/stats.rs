//! Per-statement performance tracking.
//!
//! Every guarded statement reports a [`QuerySample`] to a
//! [`PerformanceCollector`]. The in-memory [`QueryStats`] collector groups
//! samples by normalized statement text, so `WHERE id = 7` and `WHERE id = 9`
//! share one entry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Statements tracked before new shapes are ignored.
pub const MAX_TRACKED_STATEMENTS: usize = 1_000;

/// One finished statement.
#[derive(Debug, Clone, Copy)]
pub struct QuerySample<'a> {
    pub statement: &'a str,
    pub elapsed: Duration,
    pub success: bool,
    pub slow: bool,
}

/// Sink for statement samples.
pub trait PerformanceCollector: Send + Sync + std::fmt::Debug {
    fn record(&self, sample: &QuerySample<'_>);
}

#[derive(Debug, Clone)]
struct Entry {
    calls: u64,
    errors: u64,
    slow_calls: u64,
    total: Duration,
    max: Duration,
    last_seen: DateTime<Utc>,
}

/// Aggregated figures for one normalized statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementStats {
    pub statement: String,
    pub calls: u64,
    pub errors: u64,
    pub slow_calls: u64,
    pub total_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
    pub last_seen: DateTime<Utc>,
}

/// In-memory collector keyed by normalized statement.
#[derive(Debug, Default)]
pub struct QueryStats {
    entries: Mutex<HashMap<String, Entry>>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tracked statements, most total time first.
    pub fn snapshot(&self) -> Vec<StatementStats> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<StatementStats> = entries
            .iter()
            .map(|(statement, entry)| StatementStats {
                statement: statement.clone(),
                calls: entry.calls,
                errors: entry.errors,
                slow_calls: entry.slow_calls,
                total_ms: entry.total.as_millis() as u64,
                avg_ms: entry.total.as_micros() as f64 / 1000.0 / entry.calls.max(1) as f64,
                max_ms: entry.max.as_millis() as u64,
                last_seen: entry.last_seen,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_ms
                .cmp(&a.total_ms)
                .then_with(|| a.statement.cmp(&b.statement))
        });
        stats
    }

    /// Statements run at least `min_calls` times averaging at least
    /// `min_avg_ms`. These are the candidates for an index review.
    pub fn index_candidates(&self, min_calls: u64, min_avg_ms: f64) -> Vec<StatementStats> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.calls >= min_calls && s.avg_ms >= min_avg_ms)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PerformanceCollector for QueryStats {
    fn record(&self, sample: &QuerySample<'_>) {
        let key = normalize_statement(sample.statement);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&key) && entries.len() >= MAX_TRACKED_STATEMENTS {
            return;
        }
        let entry = entries.entry(key).or_insert_with(|| Entry {
            calls: 0,
            errors: 0,
            slow_calls: 0,
            total: Duration::ZERO,
            max: Duration::ZERO,
            last_seen: Utc::now(),
        });
        entry.calls += 1;
        if !sample.success {
            entry.errors += 1;
        }
        if sample.slow {
            entry.slow_calls += 1;
        }
        entry.total += sample.elapsed;
        entry.max = entry.max.max(sample.elapsed);
        entry.last_seen = Utc::now();
    }
}

/// Reduce a statement to its shape.
///
/// Literals and placeholders become `?`, whitespace collapses to single
/// spaces, and repeated value lists fold into one (`IN (?, ?, ?)` becomes
/// `IN (?)`). Text the tokenizer rejects only gets its whitespace collapsed.
pub fn normalize_statement(sql: &str) -> String {
    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => return collapse_whitespace(sql),
    };

    let mut out = String::with_capacity(sql.len());
    for token in &tokens {
        match token {
            Token::Whitespace(_) => {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            Token::Number(_, _)
            | Token::SingleQuotedString(_)
            | Token::NationalStringLiteral(_)
            | Token::HexStringLiteral(_)
            | Token::Placeholder(_) => out.push('?'),
            other => out.push_str(&other.to_string()),
        }
    }

    let mut normalized = out.trim_end().to_string();
    loop {
        let folded = normalized.replace("?, ?", "?").replace("(?), (?)", "(?)");
        if folded == normalized {
            return normalized;
        }
        normalized = folded;
    }
}

fn collapse_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(statement: &str, ms: u64, success: bool) -> QuerySample<'_> {
        QuerySample {
            statement,
            elapsed: Duration::from_millis(ms),
            success,
            slow: ms >= 1_000,
        }
    }

    #[test]
    fn test_normalize_replaces_literals() {
        assert_eq!(
            normalize_statement("SELECT * FROM characters WHERE id = 42"),
            "SELECT * FROM characters WHERE id = ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM items WHERE name = 'Master Sword'"),
            "SELECT * FROM items WHERE name = ?"
        );
        assert_eq!(
            normalize_statement("SELECT * FROM items WHERE id = $1 AND kind = $2"),
            "SELECT * FROM items WHERE id = ? AND kind = ?"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_lists() {
        assert_eq!(
            normalize_statement("SELECT id\n  FROM   episodes\tWHERE id IN (1, 2, 3)"),
            "SELECT id FROM episodes WHERE id IN (?)"
        );
        assert_eq!(
            normalize_statement("INSERT INTO items (name, kind) VALUES (?, ?), (?, ?), (?, ?)"),
            "INSERT INTO items (name, kind) VALUES (?)"
        );
    }

    #[test]
    fn test_normalize_falls_back_on_tokenizer_error() {
        assert_eq!(
            normalize_statement("SELECT 'unterminated   FROM x"),
            "SELECT 'unterminated FROM x"
        );
    }

    #[test]
    fn test_samples_grouped_by_shape() {
        let stats = QueryStats::new();
        stats.record(&sample("SELECT * FROM characters WHERE id = 1", 10, true));
        stats.record(&sample("SELECT * FROM characters WHERE id = 2", 30, true));
        stats.record(&sample("SELECT * FROM characters WHERE id = 3", 20, false));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = &snapshot[0];
        assert_eq!(entry.calls, 3);
        assert_eq!(entry.errors, 1);
        assert_eq!(entry.total_ms, 60);
        assert_eq!(entry.max_ms, 30);
        assert!((entry.avg_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_sorted_by_total_time() {
        let stats = QueryStats::new();
        stats.record(&sample("SELECT 1 FROM items", 5, true));
        stats.record(&sample("SELECT * FROM episodes", 1_500, true));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot[0].statement, "SELECT * FROM episodes");
        assert_eq!(snapshot[0].slow_calls, 1);
    }

    #[test]
    fn test_index_candidates() {
        let stats = QueryStats::new();
        for _ in 0..5 {
            stats.record(&sample("SELECT * FROM items WHERE kind = 'shield'", 120, true));
            stats.record(&sample("SELECT * FROM items WHERE id = 1", 2, true));
        }
        stats.record(&sample("SELECT * FROM episodes WHERE season = 1", 900, true));

        let candidates = stats.index_candidates(3, 50.0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].statement, "SELECT * FROM items WHERE kind = ?");
    }

    #[test]
    fn test_reset() {
        let stats = QueryStats::new();
        stats.record(&sample("SELECT 1", 1, true));
        assert!(!stats.is_empty());
        stats.reset();
        assert!(stats.is_empty());
    }
}
