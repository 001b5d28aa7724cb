use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{
    required_str, ParameterKind, Tool, ToolCategory, ToolDefinition, ToolError, ToolParameter,
};

pub type SqlRow = Map<String, Value>;

/// Connection-owning query backend the database tool drives.
///
/// Callers bind values positionally (`$1`…`$n`); the backend is responsible
/// for real parameterization, never string splicing.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
        row_limit: usize,
    ) -> Result<Vec<SqlRow>, ToolError>;
}

/// Accept only statements whose first non-whitespace token is `select` or
/// `with`, and refuse anything containing a second statement.
fn check_read_only(sql: &str) -> Result<(), ToolError> {
    let trimmed = sql.trim_start();
    let first_token = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    if first_token != "select" && first_token != "with" {
        return Err(ToolError::Sandbox(
            "Only SELECT queries are allowed".into(),
        ));
    }

    // A single trailing semicolon is tolerated; anything after one is a
    // second statement.
    let trimmed_end = sql.trim_end();
    let body = trimmed_end.strip_suffix(';').unwrap_or(trimmed_end);
    if body.contains(';') {
        return Err(ToolError::Sandbox(
            "Multi-statement input is not allowed".into(),
        ));
    }
    Ok(())
}

/// Read-only SQL against the configured backend, with row cap and
/// statement timeout.
pub struct DatabaseTool {
    backend: Arc<dyn SqlBackend>,
    row_limit: usize,
    timeout: Duration,
}

impl DatabaseTool {
    pub fn new(backend: Arc<dyn SqlBackend>, row_limit: usize, timeout: Duration) -> Self {
        Self {
            backend,
            row_limit,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for DatabaseTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "database_query",
            "Execute safe, read-only SQL queries against the configured database",
            ToolCategory::Database,
        )
        .with_parameters([
            ToolParameter::new("sql", ParameterKind::String)
                .description("SELECT statement to execute; bind caller values as $1..$n"),
            ToolParameter::new("params", ParameterKind::Array)
                .description("Positional bind values for $1..$n placeholders")
                .optional(),
        ])
        .with_returns(json!({
            "rows": "List of row objects",
            "row_count": "Number of returned rows (capped)",
        }))
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let sql = required_str(args, "sql")?;
        check_read_only(sql)?;

        let params = args
            .get("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let rows = tokio::time::timeout(
            self.timeout,
            self.backend.query(sql, &params, self.row_limit),
        )
        .await
        .map_err(|_| ToolError::Timeout)??;

        Ok(json!({ "row_count": rows.len(), "rows": rows }))
    }
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use sqlx::sqlite::SqlitePool;
    use sqlx::{Column, Row, TypeInfo};

    use super::*;

    /// SQLite backend over an sqlx pool.
    pub struct SqliteBackend {
        pool: SqlitePool,
    }

    impl SqliteBackend {
        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl SqlBackend for SqliteBackend {
        async fn query(
            &self,
            sql: &str,
            params: &[Value],
            row_limit: usize,
        ) -> Result<Vec<SqlRow>, ToolError> {
            let mut query = sqlx::query(sql);
            for param in params {
                query = match param {
                    Value::Null => query.bind(None::<String>),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                    Value::Number(n) => query.bind(n.as_f64()),
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(ToolError::execution)?;

            let mut output = Vec::new();
            for row in rows.iter().take(row_limit) {
                let mut object = SqlRow::new();
                for column in row.columns() {
                    let idx = column.ordinal();
                    let value = match column.type_info().name() {
                        "INTEGER" => row
                            .try_get::<Option<i64>, _>(idx)
                            .map(|v| json!(v))
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<Option<f64>, _>(idx)
                            .map(|v| json!(v))
                            .unwrap_or(Value::Null),
                        "BOOLEAN" => row
                            .try_get::<Option<bool>, _>(idx)
                            .map(|v| json!(v))
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<Option<String>, _>(idx)
                            .map(|v| json!(v))
                            .unwrap_or(Value::Null),
                    };
                    object.insert(column.name().to_string(), value);
                }
                output.push(object);
            }
            Ok(output)
        }
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

#[cfg(test)]
mod tests {
    use super::*;

    /// Canned backend so the statement gate is testable without a database.
    struct StaticBackend {
        rows: Vec<SqlRow>,
    }

    #[async_trait]
    impl SqlBackend for StaticBackend {
        async fn query(
            &self,
            _sql: &str,
            _params: &[Value],
            row_limit: usize,
        ) -> Result<Vec<SqlRow>, ToolError> {
            Ok(self.rows.iter().take(row_limit).cloned().collect())
        }
    }

    fn tool_with_rows(count: usize, row_limit: usize) -> DatabaseTool {
        let rows = (0..count)
            .map(|i| {
                let mut row = SqlRow::new();
                row.insert("id".into(), json!(i));
                row
            })
            .collect();
        DatabaseTool::new(
            Arc::new(StaticBackend { rows }),
            row_limit,
            Duration::from_secs(5),
        )
    }

    fn sql_args(sql: &str) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("sql".into(), json!(sql));
        args
    }

    #[test]
    fn leading_whitespace_select_accepted() {
        check_read_only("  SELECT 1").unwrap();
        check_read_only("WITH t AS (SELECT 1) SELECT * FROM t").unwrap();
        check_read_only("select 1;").unwrap();
    }

    #[test]
    fn non_select_statements_rejected() {
        assert!(check_read_only("DELETE FROM users").is_err());
        assert!(check_read_only("update t set x = 1").is_err());
        assert!(check_read_only("").is_err());
    }

    #[test]
    fn multi_statement_input_rejected() {
        assert!(check_read_only("select 1; drop table x").is_err());
        assert!(check_read_only("select 1;;").is_err());
    }

    #[tokio::test]
    async fn row_cap_is_enforced() {
        let tool = tool_with_rows(10, 3);
        let output = tool.run(&sql_args("select * from t")).await.unwrap();
        assert_eq!(output["row_count"], 3);
    }

    #[tokio::test]
    async fn write_statement_is_a_sandbox_violation() {
        let tool = tool_with_rows(1, 10);
        let err = tool
            .run(&sql_args("drop table users"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }
}
