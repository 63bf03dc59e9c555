use crate::db::db_pool::DuckDbConnectionManager;
use r2d2::Pool;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failure classes the executor reports. SQL problems never surface as
/// `Err`; they become a `Failure` result so the repair loop can act on them.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorClass {
    Syntax,
    MissingObject,
    ReadOnlyViolation,
    Timeout,
    Execution,
    Internal,
}

/// Outcome of running one SQL candidate. Success carries columns and rows;
/// failure carries a message and class. Never both. Immutable once produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Failure {
        message: String,
        class: ExecutionErrorClass,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn failure(class: ExecutionErrorClass, message: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            message: message.into(),
            class,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Failure { message, .. } => Some(message),
            ExecutionResult::Success { .. } => None,
        }
    }
}

/// Runs candidate SQL against the pooled database, read-only, with a timeout.
#[derive(Clone)]
pub struct SqlExecutor {
    pool: Pool<DuckDbConnectionManager>,
    timeout: Duration,
}

impl SqlExecutor {
    pub fn new(pool: Pool<DuckDbConnectionManager>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &Pool<DuckDbConnectionManager> {
        &self.pool
    }

    /// Execute a SQL statement. Statements that could mutate state are
    /// rejected before reaching the database. A timeout is reported as a
    /// failure result, not a hang.
    pub async fn execute(&self, sql: &str) -> ExecutionResult {
        if !is_read_only(sql) {
            warn!("Rejected non-read-only statement: {}", sql);
            return ExecutionResult::failure(
                ExecutionErrorClass::ReadOnlyViolation,
                "only SELECT/WITH statements are permitted",
            );
        }

        let pool = self.pool.clone();
        let sql_owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || run_query(&pool, &sql_owned));

        // On timeout the blocking task is abandoned, not cancelled; it keeps
        // its pooled connection until DuckDB finishes the statement. The pool
        // size bounds how many abandoned statements can be in flight at once.
        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!("Query timed out after {:?}: {}", self.timeout, sql);
                ExecutionResult::failure(
                    ExecutionErrorClass::Timeout,
                    format!("query exceeded {} ms", self.timeout.as_millis()),
                )
            }
            Ok(Err(join_err)) => ExecutionResult::failure(
                ExecutionErrorClass::Internal,
                format!("query task failed: {}", join_err),
            ),
            Ok(Ok(result)) => result,
        }
    }
}

/// True when the first keyword is SELECT or WITH.
fn is_read_only(sql: &str) -> bool {
    let first = sql
        .trim_start()
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(first.as_str(), "SELECT" | "WITH")
}

fn run_query(pool: &Pool<DuckDbConnectionManager>, sql: &str) -> ExecutionResult {
    let conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            return ExecutionResult::failure(
                ExecutionErrorClass::Internal,
                format!("connection pool error: {}", e),
            )
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return ExecutionResult::failure(classify_error(&e), e.to_string()),
    };

    let column_count = stmt.column_count();
    let mut columns = Vec::with_capacity(column_count);
    for i in 0..column_count {
        match stmt.column_name(i) {
            Ok(name) => columns.push(name.to_string()),
            Err(_) => columns.push(format!("column_{}", i)),
        }
    }

    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => return ExecutionResult::failure(classify_error(&e), e.to_string()),
    };

    let mut data: Vec<Vec<Value>> = Vec::new();
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut record = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    record.push(cell_to_json(row, i));
                }
                data.push(record);
            }
            Ok(None) => break,
            Err(e) => return ExecutionResult::failure(classify_error(&e), e.to_string()),
        }
    }

    info!("Query succeeded with {} rows", data.len());
    debug!("Columns: {:?}", columns);
    ExecutionResult::Success {
        columns,
        rows: data,
    }
}

fn cell_to_json(row: &duckdb::Row<'_>, idx: usize) -> Value {
    use duckdb::types::ValueRef;
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Boolean(v)) => Value::Bool(v),
        Ok(ValueRef::TinyInt(v)) => Value::from(v),
        Ok(ValueRef::SmallInt(v)) => Value::from(v),
        Ok(ValueRef::Int(v)) => Value::from(v),
        Ok(ValueRef::BigInt(v)) => Value::from(v),
        Ok(ValueRef::UTinyInt(v)) => Value::from(v),
        Ok(ValueRef::USmallInt(v)) => Value::from(v),
        Ok(ValueRef::UInt(v)) => Value::from(v),
        Ok(ValueRef::UBigInt(v)) => Value::from(v),
        Ok(ValueRef::Float(v)) => Value::from(v),
        Ok(ValueRef::Double(v)) => Value::from(v),
        Ok(ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).into_owned()),
        // Dates, decimals and the rest render through the driver's string
        // conversion.
        _ => match row.get::<_, String>(idx) {
            Ok(v) => Value::String(v),
            Err(_) => Value::Null,
        },
    }
}

fn classify_error(err: &duckdb::Error) -> ExecutionErrorClass {
    let msg = err.to_string();
    if msg.contains("Parser Error") || msg.contains("syntax error") || msg.contains("Syntax") {
        ExecutionErrorClass::Syntax
    } else if msg.contains("does not exist")
        || msg.contains("not found")
        || msg.contains("Referenced column")
        || msg.contains("Table with name")
    {
        ExecutionErrorClass::MissingObject
    } else {
        ExecutionErrorClass::Execution
    }
}
