//! Generic repository.
//!
//! [`Repository<E>`] supplies CRUD, offset pagination, search, batched insert
//! and a health probe for any type implementing [`Entity`]. Entities declare
//! their table and field lists; every statement is built here from those
//! lists, so user input only ever reaches the database as bound values.

pub mod filter;
pub mod pagination;

pub use filter::{Filter, MAX_SEARCH_LEN, MIN_SEARCH_LEN, validate_search_query};
pub use pagination::{
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, PageRequest, Paginated, Pagination, SortDirection,
};

use crate::db::{QueryExecutor, TransactionCoordinator, TransactionOptions};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, JsonRow, QueryParam};
use filter::ClauseBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on rows per multi-row `INSERT`.
pub const MAX_BATCH_SIZE: usize = 500;

/// Per-entity contract consumed by [`Repository`].
///
/// Field lists are allow-lists: a column that is not listed can never appear
/// in a statement built for the entity.
pub trait Entity: DeserializeOwned + Send + Sync + 'static {
    /// Table name, unquoted
    const TABLE: &'static str;
    /// Name used in not-found errors
    const NAME: &'static str;
    const ID_COLUMN: &'static str = "id";
    /// Integer primary key; text ids that are not numbers are rejected
    const NUMERIC_ID: bool = true;
    /// Columns accepted by `create`, in insert order
    const CREATE_FIELDS: &'static [&'static str];
    /// Subset of `CREATE_FIELDS` that must be present and non-null
    const REQUIRED_FIELDS: &'static [&'static str];
    /// Columns accepted by `update`, in `SET` order
    const UPDATE_FIELDS: &'static [&'static str];
    const SEARCH_FIELDS: &'static [&'static str];
    const FILTER_FIELDS: &'static [&'static str];
    /// Accepted `sort_by` values and the column each maps to
    const SORT_COLUMNS: &'static [(&'static str, &'static str)];
    const DEFAULT_SORT: &'static str = "id";
    const MAX_PAGE_LIMIT: u32 = MAX_PAGE_LIMIT;

    /// Map a decoded row to the entity.
    fn from_row(row: JsonRow) -> DbResult<Self> {
        serde_json::from_value(JsonValue::Object(row)).map_err(|e| {
            DbError::internal(format!("Failed to map {} row: {}", Self::TABLE, e))
        })
    }

    /// Column for a requested sort key. Unknown keys fall back to
    /// [`Entity::DEFAULT_SORT`].
    fn sort_column(requested: Option<&str>) -> &'static str {
        requested
            .and_then(|key| {
                let key = key.trim();
                Self::SORT_COLUMNS
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(_, column)| *column)
            })
            .unwrap_or(Self::DEFAULT_SORT)
    }
}

/// Primary key value supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    /// Validate and convert to a bind value.
    ///
    /// Empty ids and non-positive integers are rejected. Numeric text is bound
    /// as an integer.
    pub fn to_param(&self) -> DbResult<QueryParam> {
        match self {
            Self::Int(n) if *n > 0 => Ok(QueryParam::Int(*n)),
            Self::Int(n) => Err(DbError::invalid_input(format!(
                "Invalid id {}: must be a positive integer",
                n
            ))),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DbError::invalid_input("Invalid id: must not be empty"));
                }
                match trimmed.parse::<i64>() {
                    Ok(n) => Self::Int(n).to_param(),
                    Err(_) => Ok(QueryParam::String(trimmed.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Result of [`Repository::batch_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub inserted: u64,
    /// Number of `INSERT` statements issued
    pub batches: usize,
}

/// Result of [`Repository::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// CRUD, pagination and search over one entity's table.
pub struct Repository<E> {
    executor: QueryExecutor,
    transactions: TransactionCoordinator,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            transactions: self.transactions.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(executor: QueryExecutor) -> Self {
        Self::with_options(executor, TransactionOptions::default())
    }

    /// Repository whose batch writes use `options` for their transaction.
    pub fn with_options(executor: QueryExecutor, options: TransactionOptions) -> Self {
        let transactions = TransactionCoordinator::with_defaults(executor.clone(), options);
        Self::with_coordinator(executor, transactions)
    }

    pub fn with_coordinator(executor: QueryExecutor, transactions: TransactionCoordinator) -> Self {
        Self {
            executor,
            transactions,
            _entity: PhantomData,
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.transactions
    }

    fn db(&self) -> DatabaseType {
        self.executor.db_type()
    }

    fn quote(&self, ident: &str) -> String {
        self.db().quote_identifier(ident)
    }

    fn table(&self) -> String {
        self.quote(E::TABLE)
    }

    fn context(operation: &'static str) -> impl FnOnce(DbError) -> DbError {
        move |e| e.in_operation(E::TABLE, operation)
    }

    fn id_param(id: &EntityId) -> DbResult<QueryParam> {
        match id.to_param()? {
            QueryParam::String(_) if E::NUMERIC_ID => Err(DbError::invalid_input(format!(
                "Invalid {} id '{}': must be a positive integer",
                E::NAME,
                id
            ))),
            param => Ok(param),
        }
    }

    pub async fn find_by_id(&self, id: impl Into<EntityId>) -> DbResult<E> {
        let id = id.into();
        let param = Self::id_param(&id)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            self.table(),
            self.quote(E::ID_COLUMN),
            self.db().placeholder(1)
        );
        let row = self
            .executor
            .fetch_optional(&sql, &[param])
            .await
            .map_err(Self::context("find_by_id"))?;
        match row {
            Some(row) => E::from_row(row),
            None => Err(DbError::not_found(E::NAME, id)),
        }
    }

    pub async fn find_all(&self, page: &PageRequest) -> DbResult<Paginated<E>> {
        self.paginate(ClauseBuilder::new(self.db()), page, "find_all")
            .await
    }

    /// Rows where any of `fields` contains `query`, case-insensitively.
    ///
    /// An empty `fields` searches every field in [`Entity::SEARCH_FIELDS`].
    /// `filter` further restricts the rows with equality conditions.
    pub async fn search(
        &self,
        fields: &[&str],
        query: &str,
        page: &PageRequest,
        filter: Option<&Filter>,
    ) -> DbResult<Paginated<E>> {
        let fields = if fields.is_empty() {
            E::SEARCH_FIELDS
        } else {
            fields
        };
        let mut builder = ClauseBuilder::new(self.db());
        if let Some(filter) = filter {
            builder.filter(filter, E::FILTER_FIELDS)?;
        }
        builder.search(fields, E::SEARCH_FIELDS, query)?;
        self.paginate(builder, page, "search").await
    }

    /// Rows matching every equality condition in `filter`.
    pub async fn find_where(&self, filter: &Filter, page: &PageRequest) -> DbResult<Paginated<E>> {
        let mut builder = ClauseBuilder::new(self.db());
        builder.filter(filter, E::FILTER_FIELDS)?;
        self.paginate(builder, page, "find_where").await
    }

    /// Run the count and data queries concurrently and build the envelope.
    ///
    /// The two statements use separate connections, so a concurrent write can
    /// make `total` disagree with the rows returned.
    async fn paginate(
        &self,
        builder: ClauseBuilder,
        page: &PageRequest,
        operation: &'static str,
    ) -> DbResult<Paginated<E>> {
        let (clause, params) = builder.finish();
        let limit = page.limit(E::MAX_PAGE_LIMIT);
        let offset = page.offset(E::MAX_PAGE_LIMIT);
        let sort = E::sort_column(page.sort_by.as_deref());

        let mut order = format!("{} {}", self.quote(sort), page.direction.as_sql());
        if sort != E::ID_COLUMN {
            // Stable order across pages
            order.push_str(&format!(", {} ASC", self.quote(E::ID_COLUMN)));
        }

        let table = self.table();
        let count_sql = format!("SELECT COUNT(*) FROM {}{}", table, clause);
        let data_sql = format!(
            "SELECT * FROM {}{} ORDER BY {} LIMIT {} OFFSET {}",
            table, clause, order, limit, offset
        );

        let (total, rows) = tokio::try_join!(
            self.executor.fetch_count(&count_sql, &params),
            self.executor.fetch_all(&data_sql, &params),
        )
        .map_err(Self::context(operation))?;

        let data = rows
            .into_iter()
            .map(E::from_row)
            .collect::<DbResult<Vec<_>>>()?;
        debug!(
            table = E::TABLE,
            operation,
            total,
            returned = data.len(),
            "Page loaded"
        );
        Ok(Paginated {
            data,
            pagination: Pagination::new(page.page(), limit, total.max(0) as u64),
        })
    }

    /// Insert `record` and return the stored row.
    pub async fn create(&self, record: &JsonValue) -> DbResult<E> {
        let object = validate_record::<E>(record)?;
        let columns: Vec<&str> = E::CREATE_FIELDS
            .iter()
            .copied()
            .filter(|field| object.contains_key(*field))
            .collect();
        if columns.is_empty() {
            return Err(DbError::invalid_input("Record has no creatable fields"));
        }

        let (mut sql, params) = insert_statement(self.db(), E::TABLE, &columns, &[object]);

        let id = if self.db().uses_returning_for_ids() {
            sql.push_str(&format!(" RETURNING {}", self.quote(E::ID_COLUMN)));
            let row = self
                .executor
                .fetch_optional(&sql, &params)
                .await
                .map_err(Self::context("create"))?;
            row.and_then(|row| row.get(E::ID_COLUMN).and_then(JsonValue::as_i64))
        } else {
            self.executor
                .execute(&sql, &params)
                .await
                .map_err(Self::context("create"))?
                .last_insert_id
        };

        let id = id.ok_or_else(|| {
            DbError::internal(format!("Insert into {} did not report an id", E::TABLE))
        })?;
        info!(table = E::TABLE, id, "Record created");
        self.find_by_id(id).await
    }

    /// Apply the updatable fields present in `partial` and return the row.
    pub async fn update(&self, id: impl Into<EntityId>, partial: &JsonValue) -> DbResult<E> {
        let id = id.into();
        let id_param = Self::id_param(&id)?;
        let object = partial
            .as_object()
            .ok_or_else(|| DbError::invalid_input("Update must be a JSON object"))?;

        let columns: Vec<&str> = E::UPDATE_FIELDS
            .iter()
            .copied()
            .filter(|field| object.contains_key(*field))
            .collect();
        if columns.is_empty() {
            return self.find_by_id(id).await;
        }

        let (sql, params) = update_statement::<E>(self.db(), &columns, object, id_param);

        let outcome = self
            .executor
            .execute(&sql, &params)
            .await
            .map_err(Self::context("update"))?;
        // MySQL reports zero affected rows when the values did not change
        if outcome.rows_affected == 0 && !self.exists(id.clone()).await? {
            return Err(DbError::not_found(E::NAME, id));
        }
        self.find_by_id(id).await
    }

    pub async fn delete(&self, id: impl Into<EntityId>) -> DbResult<()> {
        let id = id.into();
        let param = Self::id_param(&id)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(),
            self.quote(E::ID_COLUMN),
            self.db().placeholder(1)
        );
        let outcome = self
            .executor
            .execute(&sql, &[param])
            .await
            .map_err(Self::context("delete"))?;
        if outcome.rows_affected == 0 {
            return Err(DbError::not_found(E::NAME, id));
        }
        info!(table = E::TABLE, id = %id, "Record deleted");
        Ok(())
    }

    pub async fn exists(&self, id: impl Into<EntityId>) -> DbResult<bool> {
        let param = Self::id_param(&id.into())?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = {} LIMIT 1",
            self.table(),
            self.quote(E::ID_COLUMN),
            self.db().placeholder(1)
        );
        let row = self
            .executor
            .fetch_optional(&sql, &[param])
            .await
            .map_err(Self::context("exists"))?;
        Ok(row.is_some())
    }

    /// Insert `records` with multi-row statements of at most `batch_size`
    /// rows, all inside one transaction.
    ///
    /// Every record is validated before anything is written. Columns missing
    /// from a record are inserted as NULL.
    pub async fn batch_create(
        &self,
        records: &[JsonValue],
        batch_size: usize,
    ) -> DbResult<BatchOutcome> {
        let objects = records
            .iter()
            .map(validate_record::<E>)
            .collect::<DbResult<Vec<_>>>()?;
        if objects.is_empty() {
            return Ok(BatchOutcome {
                inserted: 0,
                batches: 0,
            });
        }

        let columns: Vec<&str> = E::CREATE_FIELDS
            .iter()
            .copied()
            .filter(|field| objects.iter().any(|o| o.contains_key(*field)))
            .collect();
        if columns.is_empty() {
            return Err(DbError::invalid_input("Records have no creatable fields"));
        }

        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let statements: Vec<(String, Vec<QueryParam>)> = objects
            .chunks(batch_size)
            .map(|chunk| insert_statement(self.db(), E::TABLE, &columns, chunk))
            .collect();

        let batches = statements.len();
        let statements = Arc::new(statements);
        let options = self.transactions.default_options().clone();
        let inserted = self
            .transactions
            .run(&options, move |tx| {
                let statements = Arc::clone(&statements);
                Box::pin(async move {
                    let mut inserted = 0;
                    for (sql, params) in statements.iter() {
                        inserted += tx.execute(sql, params).await?.rows_affected;
                    }
                    Ok(inserted)
                })
            })
            .await
            .map_err(Self::context("batch_create"))?;

        info!(table = E::TABLE, inserted, batches, "Batch inserted");
        Ok(BatchOutcome { inserted, batches })
    }

    /// Probe the entity's table under the pool's probe timeout. Never fails.
    pub async fn health_check(&self) -> HealthStatus {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", self.table());
        let timeout = self.executor.pool().settings().probe_timeout;
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.executor.fetch_optional(&sql, &[]))
            .await
        {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(DbError::timeout("health check", timeout)),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => HealthStatus {
                healthy: true,
                error: None,
                latency_ms,
            },
            Err(e) => {
                let e = e.in_operation(E::TABLE, "health_check");
                warn!(table = E::TABLE, error = %e, latency_ms, "Table health check failed");
                HealthStatus {
                    healthy: false,
                    error: Some(e.to_string()),
                    latency_ms,
                }
            }
        }
    }
}

type Record = serde_json::Map<String, JsonValue>;

/// Placeholder for `value`, or a literal `NULL`.
///
/// PostgreSQL types a bound NULL as text, which non-text columns reject.
fn value_sql(db: DatabaseType, params: &mut Vec<QueryParam>, value: Option<&JsonValue>) -> String {
    match value.map(QueryParam::from_json) {
        None | Some(QueryParam::Null) => "NULL".to_string(),
        Some(param) => {
            params.push(param);
            db.placeholder(params.len())
        }
    }
}

fn quote_list(db: DatabaseType, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| db.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Multi-row `INSERT` of `columns`; a column missing from a row is NULL.
fn insert_statement(
    db: DatabaseType,
    table: &str,
    columns: &[&str],
    rows: &[&Record],
) -> (String, Vec<QueryParam>) {
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .map(|column| value_sql(db, &mut params, row.get(*column)))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        db.quote_identifier(table),
        quote_list(db, columns),
        values.join(", ")
    );
    (sql, params)
}

fn update_statement<E: Entity>(
    db: DatabaseType,
    columns: &[&str],
    object: &Record,
    id: QueryParam,
) -> (String, Vec<QueryParam>) {
    let mut params = Vec::with_capacity(columns.len() + 1);
    let assignments: Vec<String> = columns
        .iter()
        .map(|column| {
            let value = value_sql(db, &mut params, object.get(*column));
            format!("{} = {}", db.quote_identifier(column), value)
        })
        .collect();
    params.push(id);
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        db.quote_identifier(E::TABLE),
        assignments.join(", "),
        db.quote_identifier(E::ID_COLUMN),
        db.placeholder(params.len())
    );
    (sql, params)
}

/// A record must be a JSON object with every required field present and
/// non-null.
fn validate_record<E: Entity>(record: &JsonValue) -> DbResult<&Record> {
    let object = record
        .as_object()
        .ok_or_else(|| DbError::invalid_input("Record must be a JSON object"))?;
    let missing: Vec<&str> = E::REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| object.get(*field).is_none_or(JsonValue::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }
    Ok(object)
}
