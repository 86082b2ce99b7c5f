//! Database access for script SQL capabilities.
//!
//! The backend is chosen at compile time: SQLite with the `sqlite` feature
//! (default) or PostgreSQL with `postgres`. Scripts pass JSON-shaped
//! arguments and receive rows as ordered JSON objects.

use std::path::Path;

use serde_json::{Map, Value};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::Result;

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("either the `sqlite` or the `postgres` feature must be enabled");

#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;
#[cfg(feature = "sqlite")]
type Db = sqlx::Sqlite;
#[cfg(feature = "sqlite")]
type DbRow = sqlx::sqlite::SqliteRow;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
type Db = sqlx::Postgres;
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
type DbRow = sqlx::postgres::PgRow;

type DbQuery<'q> = sqlx::query::Query<'q, Db, <Db as sqlx::Database>::Arguments<'q>>;

/// Open a connection pool for `config.url`.
#[cfg(feature = "sqlite")]
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    ensure_sqlite_dir(&config.url)?;
    info!("Opening database at {}", config.url);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Open a connection pool for `config.url`.
#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Connecting to database");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Create the parent directory of a file-backed SQLite URL.
#[cfg(feature = "sqlite")]
fn ensure_sqlite_dir(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let file = rest.split('?').next().unwrap_or_default();
    if file.is_empty() || file == ":memory:" {
        return Ok(());
    }

    if let Some(parent) = Path::new(file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn bind_value<'q>(query: DbQuery<'q>, value: &Value) -> DbQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        // Arrays and objects are stored as their JSON text.
        other => query.bind(other.to_string()),
    }
}

fn build_query<'q>(sql: &'q str, args: &[Value]) -> DbQuery<'q> {
    args.iter()
        .fold(sqlx::query::<Db>(sql), |query, arg| bind_value(query, arg))
}

/// Run a statement and return the number of affected rows.
pub async fn execute(
    pool: &DbPool,
    sql: &str,
    args: &[Value],
) -> std::result::Result<u64, sqlx::Error> {
    let result = build_query(sql, args).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Run a query and decode every row into an ordered JSON object.
pub async fn fetch_all(
    pool: &DbPool,
    sql: &str,
    args: &[Value],
) -> std::result::Result<Vec<Map<String, Value>>, sqlx::Error> {
    let rows = build_query(sql, args).fetch_all(pool).await?;
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &DbRow) -> std::result::Result<Map<String, Value>, sqlx::Error> {
    let mut out = Map::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &DbRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();

    let value = match type_name.as_str() {
        "BOOL" | "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INTEGER" | "INT8" | "BIGINT" => Value::from(row.try_get::<i64, _>(index)?),
        "INT4" | "INT" => Value::from(row.try_get::<i32, _>(index)?),
        "INT2" | "SMALLINT" => Value::from(row.try_get::<i16, _>(index)?),
        "REAL" | "FLOAT8" | "DOUBLE PRECISION" => Value::from(row.try_get::<f64, _>(index)?),
        "FLOAT4" => Value::from(row.try_get::<f32, _>(index)?),
        "BLOB" | "BYTEA" => {
            use base64::Engine;
            let bytes = row.try_get::<Vec<u8>, _>(index)?;
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
