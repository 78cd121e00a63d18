//! `WHERE` clause construction.
//!
//! Column names only ever come from an entity's allow-lists and are quoted
//! for the dialect. User values are always bound as parameters.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, escape_like, is_plain_identifier};

pub const MIN_SEARCH_LEN: usize = 2;
pub const MAX_SEARCH_LEN: usize = 100;

/// Equality conditions AND-ed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, QueryParam)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column = value`. A null value matches `IS NULL`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryParam)> {
        self.conditions.iter().map(|(c, v)| (c.as_str(), v))
    }
}

/// Letters outside ASCII (kanji, kana, hangul) carry a word on their own.
fn is_word_character(c: char) -> bool {
    !c.is_ascii() && c.is_alphanumeric()
}

/// Validate a search query and return it trimmed.
///
/// A single non-ASCII letter such as `剣` is accepted below the minimum length.
pub fn validate_search_query(query: &str) -> DbResult<&str> {
    let trimmed = query.trim();
    let len = trimmed.chars().count();
    if len < MIN_SEARCH_LEN && !trimmed.chars().any(is_word_character) {
        return Err(DbError::invalid_input(format!(
            "Search query must be at least {} characters",
            MIN_SEARCH_LEN
        )));
    }
    if len > MAX_SEARCH_LEN {
        return Err(DbError::invalid_input(format!(
            "Search query must be at most {} characters",
            MAX_SEARCH_LEN
        )));
    }
    if trimmed
        .chars()
        .all(|c| matches!(c, '%' | '_' | '*') || c.is_whitespace())
    {
        return Err(DbError::invalid_input(
            "Search query is too broad: it contains only wildcards",
        ));
    }
    Ok(trimmed)
}

/// Check a column against an allow-list.
pub(crate) fn allowed_column<'a>(
    column: &'a str,
    allowed: &[&str],
    purpose: &str,
) -> DbResult<&'a str> {
    if is_plain_identifier(column) && allowed.contains(&column) {
        Ok(column)
    } else {
        Err(DbError::invalid_input(format!(
            "Column '{}' cannot be used for {}",
            column, purpose
        )))
    }
}

/// Accumulates conditions and their bound values.
#[derive(Debug)]
pub(crate) struct ClauseBuilder {
    db: DatabaseType,
    conditions: Vec<String>,
    params: Vec<QueryParam>,
}

impl ClauseBuilder {
    pub(crate) fn new(db: DatabaseType) -> Self {
        Self {
            db,
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Bind `value` and return its placeholder.
    pub(crate) fn bind(&mut self, value: QueryParam) -> String {
        self.params.push(value);
        self.db.placeholder(self.params.len())
    }

    pub(crate) fn filter(&mut self, filter: &Filter, allowed: &[&str]) -> DbResult<()> {
        for (column, value) in filter.iter() {
            let column = self.db.quote_identifier(allowed_column(column, allowed, "filtering")?);
            if value.is_null() {
                self.conditions.push(format!("{} IS NULL", column));
            } else {
                let placeholder = self.bind(value.clone());
                self.conditions.push(format!("{} = {}", column, placeholder));
            }
        }
        Ok(())
    }

    /// OR-combined pattern match of `query` over `fields`.
    pub(crate) fn search(&mut self, fields: &[&str], allowed: &[&str], query: &str) -> DbResult<()> {
        if fields.is_empty() {
            return Err(DbError::invalid_input("No fields to search"));
        }
        let query = validate_search_query(query)?;
        let pattern = format!("%{}%", escape_like(query));

        let mut matches = Vec::with_capacity(fields.len());
        for field in fields {
            let column = self.db.quote_identifier(allowed_column(field, allowed, "searching")?);
            let placeholder = self.bind(QueryParam::String(pattern.clone()));
            matches.push(self.db.like_expression(&column, &placeholder));
        }
        self.conditions.push(format!("({})", matches.join(" OR ")));
        Ok(())
    }

    /// ` WHERE ...` (or nothing) and the values to bind, in placeholder order.
    pub(crate) fn finish(self) -> (String, Vec<QueryParam>) {
        let clause = if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        };
        (clause, self.params)
    }
}
