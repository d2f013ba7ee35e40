//! MySQL Driver
//!
//! Implements the DatabaseDriver trait for MySQL/MariaDB databases using SQLx.
//!
//! Catalog rows are decoded by position rather than by column name, so it
//! does not matter whether the server reports `TABLE_NAME` or `table_name`.
//! Some servers flag catalog text columns as binary; `catalog_text` accepts
//! both encodings.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, Statement};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement::quote_identifier;
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    unique_column_names, Row as QRow, TableInfo, Value,
};

/// MySQL driver implementation
pub struct MySqlDriver {
    target: String,
    conn: Option<MySqlConnection>,
}

impl MySqlDriver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conn: None,
        }
    }

    async fn session(&mut self) -> EngineResult<&mut MySqlConnection> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::internal("MySQL session missing after connect"))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(mysql_row: &MySqlRow, columns: &[String]) -> QRow {
        let values = mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect();

        QRow::from_columns(columns, values)
    }

    /// BIGINT UNSIGNED beyond the signed range is rendered as decimal text
    fn unsigned_value(u: u64) -> Value {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        }
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(Self::unsigned_value).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    /// Reads a catalog text column that may arrive as text or as binary
    fn catalog_text(row: &MySqlRow, idx: usize) -> EngineResult<Option<String>> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return Ok(v);
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .map_err(|e| EngineError::execution_error(e.to_string()))
    }

    fn required_text(row: &MySqlRow, idx: usize) -> EngineResult<String> {
        Ok(Self::catalog_text(row, idx)?.unwrap_or_default())
    }

    /// Reads a catalog integer column, signed or unsigned
    fn catalog_int(row: &MySqlRow, idx: usize) -> EngineResult<i64> {
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return Ok(v.unwrap_or_default() as i64);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return Ok(v.unwrap_or_default() as i64);
        }
        row.try_get::<Option<i64>, _>(idx)
            .map(Option::unwrap_or_default)
            .map_err(|e| EngineError::execution_error(e.to_string()))
    }

    async fn run(&mut self, statement: &str) -> EngineResult<QueryResult> {
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
            let mysql_rows: Vec<MySqlRow> = sqlx::query(statement)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

            let rows = mysql_rows
                .iter()
                .map(|row| Self::convert_row(row, &columns))
                .collect();
            return Ok(QueryResult::rows(columns, rows));
        }

        let result = sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(QueryResult::status(format!(
            "Success. Affected rows: {}",
            result.rows_affected()
        )))
    }

    async fn fetch_catalog(
        &mut self,
        query: &str,
        table: Option<&str>,
    ) -> EngineResult<Vec<MySqlRow>> {
        let conn = self.session().await?;
        let mut q = sqlx::query(query);
        if let Some(table) = table {
            q = q.bind(table);
        }
        q.fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> EngineResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = MySqlConnection::connect(&self.target)
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "mysql disconnect failed");
            }
        }
    }

    async fn execute(&mut self, statement: &str) -> QueryResult {
        self.run(statement).await.into()
    }

    async fn get_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT TABLE_NAME
                FROM information_schema.TABLES
                WHERE TABLE_SCHEMA = DATABASE()
                  AND TABLE_TYPE = 'BASE TABLE'
                ORDER BY TABLE_NAME
                "#,
                None,
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<TableInfo> {
                Ok(TableInfo::table(Self::required_text(row, 0)?, None))
            })
            .collect()
    }

    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY
                FROM information_schema.COLUMNS
                WHERE TABLE_SCHEMA = DATABASE()
                  AND TABLE_NAME = ?
                ORDER BY ORDINAL_POSITION
                "#,
                Some(table),
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<ColumnInfo> {
                Ok(ColumnInfo {
                    name: Self::required_text(row, 0)?,
                    data_type: Self::required_text(row, 1)?,
                    nullable: Self::required_text(row, 2)? == "YES",
                    default_value: Self::catalog_text(row, 3)?,
                    primary_key: Self::required_text(row, 4)? == "PRI",
                })
            })
            .collect()
    }

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT TABLE_NAME
                FROM information_schema.VIEWS
                WHERE TABLE_SCHEMA = DATABASE()
                ORDER BY TABLE_NAME
                "#,
                None,
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<TableInfo> {
                Ok(TableInfo::view(Self::required_text(row, 0)?, None))
            })
            .collect()
    }

    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>> {
        let query = if table.is_some() {
            r#"
            SELECT DISTINCT INDEX_NAME, TABLE_NAME
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY TABLE_NAME, INDEX_NAME
            "#
        } else {
            r#"
            SELECT DISTINCT INDEX_NAME, TABLE_NAME
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, INDEX_NAME
            "#
        };
        let rows = self.fetch_catalog(query, table).await?;

        rows.iter()
            .map(|row| -> EngineResult<IndexInfo> {
                Ok(IndexInfo {
                    name: Self::required_text(row, 0)?,
                    table_name: Self::required_text(row, 1)?,
                })
            })
            .collect()
    }

    async fn get_ddl(&mut self, table: &str) -> EngineResult<String> {
        // SHOW CREATE cannot take a bound identifier
        let query = format!("SHOW CREATE TABLE {}", quote_identifier(table, '`'));
        let rows = self.fetch_catalog(&query, None).await?;

        // Second column is "Create Table" (or "Create View")
        match rows.first() {
            Some(row) => Ok(Self::catalog_text(row, 1)?.unwrap_or_default()),
            None => Ok(String::new()),
        }
    }

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT COLUMN_NAME, ORDINAL_POSITION
                FROM information_schema.KEY_COLUMN_USAGE
                WHERE TABLE_SCHEMA = DATABASE()
                  AND TABLE_NAME = ?
                  AND CONSTRAINT_NAME = 'PRIMARY'
                ORDER BY ORDINAL_POSITION
                "#,
                Some(table),
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<PrimaryKeyEntry> {
                Ok(PrimaryKeyEntry {
                    column_name: Self::required_text(row, 0)?,
                    position: Self::catalog_int(row, 1)? as u32,
                })
            })
            .collect()
    }

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT kcu.COLUMN_NAME, kcu.REFERENCED_TABLE_NAME, kcu.REFERENCED_COLUMN_NAME,
                       kcu.CONSTRAINT_NAME, rc.UPDATE_RULE, rc.DELETE_RULE
                FROM information_schema.KEY_COLUMN_USAGE kcu
                JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
                  ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                 AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                WHERE kcu.TABLE_SCHEMA = DATABASE()
                  AND kcu.TABLE_NAME = ?
                  AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
                ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
                "#,
                Some(table),
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<ForeignKeyEntry> {
                Ok(ForeignKeyEntry {
                    column_name: Self::required_text(row, 0)?,
                    referenced_table: Self::required_text(row, 1)?,
                    referenced_column: Self::required_text(row, 2)?,
                    constraint_name: Self::catalog_text(row, 3)?,
                    on_update: Self::catalog_text(row, 4)?,
                    on_delete: Self::catalog_text(row, 5)?,
                })
            })
            .collect()
    }
}
