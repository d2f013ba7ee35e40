//! SQLite Driver
//!
//! Implements the DatabaseDriver trait for file-embedded SQLite databases
//! using SQLx. The connection target is a file path (created when missing),
//! `:memory:`, or a `sqlite:` URL.
//!
//! Whether a statement is a reader is decided by preparing it first: a
//! prepared statement that declares result columns yields a rowset, anything
//! else is run for its change count. Text holding more than one statement
//! is rejected before anything runs, since SQLite would otherwise execute
//! only the first one.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Statement};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement::is_batch;
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    unique_column_names, Row as QRow, TableInfo, Value,
};

/// SQLite driver implementation
pub struct SqliteDriver {
    target: String,
    conn: Option<SqliteConnection>,
}

impl SqliteDriver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conn: None,
        }
    }

    /// Builds connect options from the connection target
    fn connect_options(target: &str) -> EngineResult<SqliteConnectOptions> {
        let target = target.trim();
        let options = if target == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
        } else if target.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(target)
        } else {
            Ok(SqliteConnectOptions::new().filename(target))
        };

        options
            .map(|options| options.create_if_missing(true))
            .map_err(|e| EngineError::connection_failed(e.to_string()))
    }

    async fn session(&mut self) -> EngineResult<&mut SqliteConnection> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::internal("SQLite session missing after connect"))
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite reports the storage class of each value, so the first
    /// compatible decode wins.
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn convert_row(row: &SqliteRow, columns: &[String]) -> QRow {
        let values = (0..row.columns().len())
            .map(|idx| Self::extract_value(row, idx))
            .collect();
        QRow::from_columns(columns, values)
    }

    async fn run(&mut self, statement: &str) -> EngineResult<QueryResult> {
        if is_batch(EngineKind::Sqlite, statement) {
            return Err(EngineError::execution_error(
                "Only one statement can be executed at a time",
            ));
        }
        let conn = self.session().await?;

        let prepared = (&mut *conn)
            .prepare(statement)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;
        let columns = unique_column_names(
            prepared
                .columns()
                .iter()
                .map(|col| col.name().to_string())
                .collect(),
        );

        if !columns.is_empty() {
            let rows: Vec<SqliteRow> = sqlx::query(statement)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

            let rows = rows
                .iter()
                .map(|row| Self::convert_row(row, &columns))
                .collect();
            return Ok(QueryResult::rows(columns, rows));
        }

        let done = sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(QueryResult::status(format!(
            "Success. Changes: {}, Last ID: {}",
            done.rows_affected(),
            done.last_insert_rowid()
        )))
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> EngineResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let options = Self::connect_options(&self.target)?;
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "sqlite disconnect failed");
            }
        }
    }

    async fn execute(&mut self, statement: &str) -> QueryResult {
        self.run(statement).await.into()
    }

    async fn get_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let conn = self.session().await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| TableInfo::table(name, None))
            .collect())
    }

    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let conn = self.session().await?;

        let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?1)
            ORDER BY cid
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, not_null, default_value, pk)| ColumnInfo {
                name,
                data_type,
                nullable: not_null == 0,
                default_value,
                primary_key: pk > 0,
            })
            .collect())
    }

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>> {
        let conn = self.session().await?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'view' ORDER BY name")
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| TableInfo::view(name, None))
            .collect())
    }

    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>> {
        let conn = self.session().await?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT name, tbl_name FROM sqlite_master
            WHERE type = 'index' AND (?1 IS NULL OR tbl_name = ?1)
            ORDER BY name
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, table_name)| IndexInfo { name, table_name })
            .collect())
    }

    async fn get_ddl(&mut self, table: &str) -> EngineResult<String> {
        let conn = self.session().await?;

        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")
                .bind(table)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(row.and_then(|(sql,)| sql).unwrap_or_default())
    }

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>> {
        let conn = self.session().await?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT name, pk FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk",
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(column_name, pk)| PrimaryKeyEntry {
                column_name,
                position: pk as u32,
            })
            .collect())
    }

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>> {
        let conn = self.session().await?;

        // "to" is NULL when the reference targets the parent's primary key
        let rows: Vec<(String, String, Option<String>, String, String)> = sqlx::query_as(
            r#"
            SELECT "from", "table", "to", on_update, on_delete
            FROM pragma_foreign_key_list(?1)
            ORDER BY id, seq
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(column_name, referenced_table, referenced_column, on_update, on_delete)| {
                    ForeignKeyEntry {
                        column_name,
                        referenced_table,
                        referenced_column: referenced_column.unwrap_or_default(),
                        constraint_name: None,
                        on_update: Some(on_update),
                        on_delete: Some(on_delete),
                    }
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db").to_string_lossy().into_owned();
        (dir, path)
    }

    #[test]
    fn connect_options_accept_paths_memory_and_urls() {
        assert!(SqliteDriver::connect_options("/tmp/app.db").is_ok());
        assert!(SqliteDriver::connect_options(":memory:").is_ok());
        assert!(SqliteDriver::connect_options("sqlite://data/app.db").is_ok());
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);

        assert!(!driver.is_connected());
        driver.connect().await.expect("connect");
        driver.connect().await.expect("second connect is a no-op");
        assert!(driver.is_connected());

        driver.disconnect().await;
        driver.disconnect().await;
        assert!(!driver.is_connected());

        driver.connect().await.expect("reconnect");
        let result = driver.execute("SELECT 1").await;
        assert_eq!(result.row_set().map(|rows| rows.len()), Some(1));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn execute_connects_lazily() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);

        let result = driver.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").await;
        assert!(driver.is_connected());
        assert!(result.message().is_some());
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn unreachable_target_is_an_error_result() {
        let mut driver = SqliteDriver::new("/nonexistent-dir/definitely/missing.db");

        let result = driver.execute("SELECT 1").await;
        assert!(result.is_error());
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn reader_with_no_rows_still_reports_columns() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);
        driver.execute("CREATE TABLE empty (a INTEGER, b TEXT)").await;

        let result = driver.execute("SELECT a, b FROM empty").await;
        assert_eq!(
            result.columns(),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(result.row_set().map(|rows| rows.len()), Some(0));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn values_keep_their_storage_class() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);

        let result = driver
            .execute("SELECT 42 AS i, 1.5 AS f, 'txt' AS s, x'0102' AS b, NULL AS n")
            .await;
        let rows = result.row_set().expect("rowset");
        let row = &rows[0];
        assert_eq!(row.get("i"), Some(&Value::Int(42)));
        assert_eq!(row.get("f"), Some(&Value::Float(1.5)));
        assert_eq!(row.get("s"), Some(&Value::Text("txt".into())));
        assert_eq!(row.get("b"), Some(&Value::Bytes(vec![1, 2])));
        assert_eq!(row.get("n"), Some(&Value::Null));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn insert_reports_changes_and_last_id() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);
        driver
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")
            .await;

        let result = driver
            .execute("INSERT INTO items (label) VALUES ('a')")
            .await;
        assert_eq!(result.message(), Some("Success. Changes: 1, Last ID: 1"));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn batches_are_refused_before_running() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);

        let result = driver
            .execute("CREATE TABLE b (x); CREATE TABLE c (y)")
            .await;
        assert_eq!(
            result.error_message(),
            Some("Only one statement can be executed at a time")
        );
        assert!(driver.get_tables().await.expect("tables").is_empty());
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn trigger_bodies_run_as_one_statement() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);
        driver.execute("CREATE TABLE t (n INTEGER)").await;
        driver.execute("CREATE TABLE audit (n INTEGER)").await;

        let result = driver
            .execute(
                "CREATE TRIGGER t_audit AFTER INSERT ON t BEGIN \
                 INSERT INTO audit (n) VALUES (new.n); \
                 END",
            )
            .await;
        assert!(!result.is_error(), "{:?}", result.error_message());

        driver.execute("INSERT INTO t (n) VALUES (5)").await;
        let rows = driver.execute("SELECT n FROM audit").await;
        assert_eq!(rows.row_set().map(|rows| rows.len()), Some(1));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn odd_table_names_are_bound_not_interpolated() {
        let (_dir, path) = temp_db();
        let mut driver = SqliteDriver::new(path);
        driver
            .execute(r#"CREATE TABLE "we'ird ""name" (id INTEGER PRIMARY KEY)"#)
            .await;

        let columns = driver
            .get_columns(r#"we'ird "name"#)
            .await
            .expect("columns");
        assert_eq!(columns.len(), 1);
        assert!(columns[0].primary_key);

        let injected = driver
            .get_columns("x') UNION SELECT 1,2,3,4,5 --")
            .await
            .expect("no rows for a nonexistent table");
        assert!(injected.is_empty());
        driver.disconnect().await;
    }
}
