//! # Database Module
//!
//! Async database access with SQLx for PostgreSQL and SQLite.
//!
//! Every compiled [`Statement`] runs in its own transaction: acquire, begin,
//! execute, commit. Any failure rolls the transaction back and surfaces as
//! [`Error::Statement`] carrying the statement text and its arguments.
//! Handlers normally reach the database through a table-scoped [`Table`]
//! injected by the dispatcher.

use crate::error::{Error, Result};
use crate::query::{Condition, QueryCompiler, Statement};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, TypeInfo};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Pool size used when the configuration names none
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// One result row: column name → value, in column order
pub type DbRow = Map<String, Value>;

/// Database connection pool supporting multiple backends
#[derive(Debug, Clone)]
pub enum Database {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
}

impl Database {
    /// Connect to the backend named by the URL scheme
    ///
    /// `postgres://` and `postgresql://` select PostgreSQL, anything else is
    /// handed to SQLite.
    ///
    /// # Errors
    ///
    /// `Error::Database` when the pool cannot be opened.
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url, max_connections).await
        } else {
            Self::connect_sqlite(url, max_connections).await
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Arguments
    ///
    /// * `url` - Database URL (e.g., "sqlite:mydb.db" or "sqlite::memory:")
    /// * `max_connections` - Maximum pool size (default: 10)
    ///
    /// In-memory databases live inside a single connection, so their pool is
    /// pinned to one connection that is never recycled.
    ///
    /// # Errors
    ///
    /// `Error::Database` when the pool cannot be opened.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let mut options = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        } else {
            options = options.max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS));
        }

        let pool = options.connect(url).await.map_err(|e| Error::Database {
            message: format!("SQLite connection failed: {e}"),
        })?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// `Error::Database` when the pool cannot be opened.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .connect(url)
            .await
            .map_err(|e| Error::Database {
                message: format!("PostgreSQL connection failed: {e}"),
            })?;

        Ok(Self::Postgres(pool))
    }

    /// Backend name for logs
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    /// Execute raw SQL without arguments (schema setup, maintenance)
    ///
    /// Returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// `Error::Statement` when the driver rejects the SQL.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let result = match self {
            Self::Sqlite(pool) => sqlx::query(sql)
                .execute(pool)
                .await
                .map(|r| r.rows_affected()),
            Self::Postgres(pool) => sqlx::query(sql)
                .execute(pool)
                .await
                .map(|r| r.rows_affected()),
        };
        result.map_err(|e| Error::Statement {
            statement: sql.to_string(),
            args: String::new(),
            message: e.to_string(),
        })
    }

    /// Run one compiled statement inside its own transaction
    ///
    /// # Errors
    ///
    /// `Error::Statement` for any failure while acquiring, executing or
    /// committing; the transaction is rolled back first.
    pub async fn query(&self, statement: &Statement) -> Result<QueryOutput> {
        debug!(backend = self.backend(), sql = %statement.sql, "executing statement");
        let outcome = match self {
            Self::Sqlite(pool) => run_sqlite(pool, statement).await,
            Self::Postgres(pool) => run_postgres(pool, statement).await,
        };

        outcome.map_err(|e| {
            error!(
                sql = %statement.sql,
                args = %statement.args_display(),
                error = %e,
                "statement failed"
            );
            Error::Statement {
                statement: statement.sql.clone(),
                args: statement.args_display(),
                message: e.to_string(),
            }
        })
    }

    /// Accessor scoped to one table
    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> Table {
        Table {
            database: self.clone(),
            name: name.into(),
        }
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

/// Rows and column names returned by a statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    /// Result rows
    pub rows: Vec<DbRow>,
    /// Column names, in select order
    pub fields: Vec<String>,
    /// Rows touched by a write statement
    #[serde(skip)]
    pub rows_affected: u64,
}

/// Acknowledgement of a write that returns no rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Always `ok`
    pub msg: &'static str,
    /// Rows touched
    #[serde(skip)]
    pub rows_affected: u64,
}

impl Ack {
    fn new(rows_affected: u64) -> Self {
        Self {
            msg: "ok",
            rows_affected,
        }
    }
}

/// Table-scoped database accessor
#[derive(Debug, Clone)]
pub struct Table {
    database: Database,
    name: String,
}

impl Table {
    /// Table name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying database handle
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Read live rows matching any of `groups`
    ///
    /// # Errors
    ///
    /// `Error::Statement` when the statement fails.
    pub async fn fetch<S: AsRef<str>>(
        &self,
        columns: &[S],
        groups: &[Condition],
    ) -> Result<QueryOutput> {
        let statement = QueryCompiler::new(&self.name).fetch(columns, groups);
        self.database.query(&statement).await
    }

    /// Insert one entity
    ///
    /// # Errors
    ///
    /// `Error::EmptyEntity` before execution, `Error::Statement` on failure.
    pub async fn put(&self, entity: &Condition) -> Result<QueryOutput> {
        let statement = QueryCompiler::new(&self.name).put(entity)?;
        self.database.query(&statement).await
    }

    /// Soft-delete the rows matching `condition`
    ///
    /// # Errors
    ///
    /// `Error::UnsafeDelete` before execution when `condition` is empty,
    /// `Error::Statement` on failure.
    pub async fn remove(&self, condition: &Condition) -> Result<Ack> {
        let statement = QueryCompiler::new(&self.name).remove(condition)?;
        let output = self.database.query(&statement).await?;
        Ok(Ack::new(output.rows_affected))
    }

    /// Update live rows matching any of `groups`
    ///
    /// # Errors
    ///
    /// `Error::EmptyEntity` before execution, `Error::Statement` on failure.
    pub async fn update(&self, entity: &Condition, groups: &[Condition]) -> Result<Ack> {
        let statement = QueryCompiler::new(&self.name).update(entity, groups)?;
        let output = self.database.query(&statement).await?;
        Ok(Ack::new(output.rows_affected))
    }
}

/// Statement argument value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DbValue {
    /// JSON form used in result rows
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Value::from(f),
            Self::String(s) => Value::String(s),
            Self::Bool(b) => Value::Bool(b),
            Self::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<&Value> for DbValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s.clone()),
            // Nested values are stored as their JSON text.
            Value::Array(_) | Value::Object(_) => Self::String(value.to_string()),
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Rewrite `?` placeholders as `$1, $2, …`
#[must_use]
pub fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

fn returns_rows(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [DbValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            DbValue::Null => query.bind(None::<String>),
            DbValue::Int(i) => query.bind(*i),
            DbValue::Float(f) => query.bind(*f),
            DbValue::String(s) => query.bind(s.as_str()),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Bytes(bytes) => query.bind(bytes.as_slice()),
        };
    }
    query
}

fn bind_postgres<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [DbValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            DbValue::Null => query.bind(None::<String>),
            DbValue::Int(i) => query.bind(*i),
            DbValue::Float(f) => query.bind(*f),
            DbValue::String(s) => query.bind(s.as_str()),
            DbValue::Bool(b) => query.bind(*b),
            DbValue::Bytes(bytes) => query.bind(bytes.as_slice()),
        };
    }
    query
}

async fn run_sqlite(pool: &SqlitePool, statement: &Statement) -> sqlx::Result<QueryOutput> {
    let mut tx = pool.begin().await?;
    let query = bind_sqlite(sqlx::query(&statement.sql), &statement.args);

    let outcome = if returns_rows(&statement.sql) {
        match query.fetch_all(&mut *tx).await {
            Ok(rows) => {
                let fields = match rows.first() {
                    Some(row) => column_names(row),
                    None => (&mut *tx)
                        .describe(&statement.sql)
                        .await
                        .map(|described| {
                            described
                                .columns()
                                .iter()
                                .map(|column| column.name().to_string())
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                Ok(QueryOutput {
                    rows: rows.iter().map(sqlite_row_to_map).collect(),
                    fields,
                    rows_affected: 0,
                })
            }
            Err(e) => Err(e),
        }
    } else {
        query.execute(&mut *tx).await.map(|done| QueryOutput {
            rows_affected: done.rows_affected(),
            ..QueryOutput::default()
        })
    };

    match outcome {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn run_postgres(pool: &PgPool, statement: &Statement) -> sqlx::Result<QueryOutput> {
    let sql = number_placeholders(&statement.sql);
    let mut tx = pool.begin().await?;
    let query = bind_postgres(sqlx::query(&sql), &statement.args);

    let outcome = if returns_rows(&sql) {
        match query.fetch_all(&mut *tx).await {
            Ok(rows) => {
                let fields = match rows.first() {
                    Some(row) => column_names(row),
                    None => (&mut *tx)
                        .describe(&sql)
                        .await
                        .map(|described| {
                            described
                                .columns()
                                .iter()
                                .map(|column| column.name().to_string())
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                Ok(QueryOutput {
                    rows: rows.iter().map(pg_row_to_map).collect(),
                    fields,
                    rows_affected: 0,
                })
            }
            Err(e) => Err(e),
        }
    } else {
        query.execute(&mut *tx).await.map(|done| QueryOutput {
            rows_affected: done.rows_affected(),
            ..QueryOutput::default()
        })
    };

    match outcome {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

/// Convert SQLite row to a column map
fn sqlite_row_to_map(row: &SqliteRow) -> DbRow {
    let mut map = DbRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let value = match type_name {
            "INTEGER" => row
                .try_get::<i64, _>(i)
                .map(DbValue::Int)
                .unwrap_or(DbValue::Null),
            "REAL" => row
                .try_get::<f64, _>(i)
                .map(DbValue::Float)
                .unwrap_or(DbValue::Null),
            "BOOLEAN" => row
                .try_get::<bool, _>(i)
                .map(DbValue::Bool)
                .unwrap_or(DbValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(i)
                .map(DbValue::Bytes)
                .unwrap_or(DbValue::Null),
            _ => row
                .try_get::<String, _>(i)
                .map(DbValue::String)
                .unwrap_or(DbValue::Null),
        };

        map.insert(name, value.into_json());
    }

    map
}

/// Convert PostgreSQL row to a column map
fn pg_row_to_map(row: &PgRow) -> DbRow {
    let mut map = DbRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let value = match type_name {
            "INT2" => row
                .try_get::<i16, _>(i)
                .map(|v| DbValue::Int(i64::from(v)))
                .unwrap_or(DbValue::Null),
            "INT4" => row
                .try_get::<i32, _>(i)
                .map(|v| DbValue::Int(i64::from(v)))
                .unwrap_or(DbValue::Null),
            "INT8" => row
                .try_get::<i64, _>(i)
                .map(DbValue::Int)
                .unwrap_or(DbValue::Null),
            "FLOAT4" | "FLOAT8" => row
                .try_get::<f64, _>(i)
                .map(DbValue::Float)
                .unwrap_or(DbValue::Null),
            "BOOL" => row
                .try_get::<bool, _>(i)
                .map(DbValue::Bool)
                .unwrap_or(DbValue::Null),
            "BYTEA" => row
                .try_get::<Vec<u8>, _>(i)
                .map(DbValue::Bytes)
                .unwrap_or(DbValue::Null),
            _ => row
                .try_get::<String, _>(i)
                .map(DbValue::String)
                .unwrap_or(DbValue::Null),
        };

        map.insert(name, value.into_json());
    }

    map
}
