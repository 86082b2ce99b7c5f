//! SQL statements against the attached database.

use serde_json::{Map, Value};

use super::Module;
use crate::db::{self, DbPool};
use crate::runtime::error::RuntimeError;

/// One result row: column name to value, in column order.
pub type SqlRow = Map<String, Value>;

impl Module {
    fn pool(&self) -> Result<&DbPool, RuntimeError> {
        self.db
            .as_ref()
            .ok_or_else(|| RuntimeError::unavailable("no database is configured"))
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn sql_exec(&self, query: &str, args: &[Value]) -> Result<u64, RuntimeError> {
        let pool = self.pool()?;
        db::execute(pool, query, args).await.map_err(|e| {
            tracing::error!(query, "sql_exec failed: {}", e);
            RuntimeError::internal("failed to execute query")
        })
    }

    /// Run a query and return every row.
    pub async fn sql_query(&self, query: &str, args: &[Value]) -> Result<Vec<SqlRow>, RuntimeError> {
        let pool = self.pool()?;
        db::fetch_all(pool, query, args).await.map_err(|e| {
            tracing::error!(query, "sql_query failed: {}", e);
            RuntimeError::internal("failed to run query")
        })
    }
}
