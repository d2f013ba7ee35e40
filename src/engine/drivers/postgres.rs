//! PostgreSQL Driver
//!
//! Implements the DatabaseDriver trait for PostgreSQL databases using SQLx.
//!
//! ## Session Handling
//!
//! A driver holds one dedicated `PgConnection`, opened from the connection
//! URL on `connect` and closed on `disconnect`. There is no pool: every
//! façade call gets its own connection.
//!
//! ## Name Resolution
//!
//! Table names may be qualified as `schema.table`. Unqualified names are
//! resolved through the session's `search_path`, the same way the server
//! would resolve them in a query.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row, Statement};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement::{command_keyword, split_qualified};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    unique_column_names, Row as QRow, TableInfo, Value,
};

/// Schema of table `$1`: explicit `$2` when given, else whatever the search path resolves to
const RESOLVED_SCHEMA: &str = r#"
    COALESCE(
        $2::text,
        (SELECT n.nspname::text
         FROM pg_class cl
         JOIN pg_namespace n ON n.oid = cl.relnamespace
         WHERE cl.oid = to_regclass(quote_ident($1)))
    )
"#;

const SYSTEM_SCHEMAS: &str = "('information_schema', 'pg_catalog', 'pg_toast')";

/// PostgreSQL driver implementation
pub struct PostgresDriver {
    target: String,
    conn: Option<PgConnection>,
}

impl PostgresDriver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conn: None,
        }
    }

    async fn session(&mut self) -> EngineResult<&mut PgConnection> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::internal("PostgreSQL session missing after connect"))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow, columns: &[String]) -> QRow {
        let values = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow::from_columns(columns, values)
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        // Integers before bool so int columns never decode as flags
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
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
        // NUMERIC keeps its exact digits
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        // Date/Time types - convert to ISO 8601 string
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
        // JSON/JSONB
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn status_message(statement: &str, rows_affected: u64) -> String {
        format!(
            "Success. {} completed. Row count: {}",
            command_keyword(EngineKind::Postgres, statement),
            rows_affected
        )
    }

    /// Key columns of a table's primary key, in key order.
    ///
    /// Constraint names are only unique per table, so the key-usage join
    /// also matches on the table name.
    fn primary_keys_query() -> String {
        format!(
            r#"
            SELECT kcu.column_name::text, kcu.ordinal_position::int4
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_name = $1
              AND tc.table_schema = {RESOLVED_SCHEMA}
            ORDER BY kcu.ordinal_position
            "#
        )
    }

    fn foreign_keys_query() -> String {
        format!(
            r#"
            SELECT
                kcu.column_name::text,
                ccu.table_name::text,
                ccu.column_name::text,
                tc.constraint_name::text,
                rc.update_rule::text,
                rc.delete_rule::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_name = ccu.constraint_name
             AND tc.table_schema = ccu.constraint_schema
            JOIN information_schema.referential_constraints rc
              ON tc.constraint_name = rc.constraint_name
             AND tc.table_schema = rc.constraint_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_name = $1
              AND tc.table_schema = {RESOLVED_SCHEMA}
            ORDER BY tc.constraint_name, kcu.ordinal_position
            "#
        )
    }

    async fn run(&mut self, statement: &str) -> EngineResult<QueryResult> {
        let conn = self.session().await?;

        // A statement that describes result columns is row-producing,
        // including INSERT ... RETURNING and empty SELECTs
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
            let pg_rows: Vec<PgRow> = sqlx::query(statement)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

            let rows = pg_rows
                .iter()
                .map(|row| Self::convert_row(row, &columns))
                .collect();
            return Ok(QueryResult::rows(columns, rows));
        }

        let result = sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(QueryResult::status(Self::status_message(
            statement,
            result.rows_affected(),
        )))
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> EngineResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = PgConnection::connect(&self.target)
            .await
            .map_err(|e| EngineError::from_connect(e.to_string()))?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "postgres disconnect failed");
            }
        }
    }

    async fn execute(&mut self, statement: &str) -> QueryResult {
        self.run(statement).await.into()
    }

    async fn get_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let conn = self.session().await?;

        let query = format!(
            r#"
            SELECT table_name::text, table_schema::text
            FROM information_schema.tables
            WHERE table_schema NOT IN {SYSTEM_SCHEMAS}
              AND table_type = 'BASE TABLE'
            ORDER BY table_schema, table_name
            "#
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, schema)| TableInfo::table(name, Some(schema)))
            .collect())
    }

    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let (schema, table) = split_qualified(table);
        let conn = self.session().await?;

        let query = format!(
            r#"
            SELECT
                c.column_name::text,
                c.data_type::text,
                c.is_nullable::text,
                c.column_default::text,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                     AND tc.table_name = kcu.table_name
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = c.table_schema
                      AND tc.table_name = c.table_name
                      AND kcu.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_name = $1
              AND c.table_schema = {RESOLVED_SCHEMA}
            ORDER BY c.ordinal_position
            "#
        );
        let rows: Vec<(String, String, String, Option<String>, bool)> = sqlx::query_as(&query)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(name, data_type, is_nullable, default_value, primary_key)| ColumnInfo {
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    default_value,
                    primary_key,
                },
            )
            .collect())
    }

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>> {
        let conn = self.session().await?;

        let query = format!(
            r#"
            SELECT table_name::text, table_schema::text
            FROM information_schema.views
            WHERE table_schema NOT IN {SYSTEM_SCHEMAS}
            ORDER BY table_schema, table_name
            "#
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, schema)| TableInfo::view(name, Some(schema)))
            .collect())
    }

    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>> {
        let conn = self.session().await?;

        let query = format!(
            r#"
            SELECT indexname::text, tablename::text
            FROM pg_indexes
            WHERE schemaname NOT IN {SYSTEM_SCHEMAS}
              AND ($1::text IS NULL OR tablename = $1)
            ORDER BY indexname
            "#
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query)
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
        Ok(format!("-- DDL for {table} (Not implemented for Postgres yet)"))
    }

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>> {
        let (schema, table) = split_qualified(table);
        let conn = self.session().await?;

        let query = Self::primary_keys_query();
        let rows: Vec<(String, i32)> = sqlx::query_as(&query)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(column_name, position)| PrimaryKeyEntry {
                column_name,
                position: position as u32,
            })
            .collect())
    }

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>> {
        let (schema, table) = split_qualified(table);
        let conn = self.session().await?;

        let query = Self::foreign_keys_query();
        let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(&query)
            .bind(table)
            .bind(schema)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    column_name,
                    referenced_table,
                    referenced_column,
                    constraint_name,
                    on_update,
                    on_delete,
                )| ForeignKeyEntry {
                    column_name,
                    referenced_table,
                    referenced_column,
                    constraint_name: Some(constraint_name),
                    on_update: Some(on_update),
                    on_delete: Some(on_delete),
                },
            )
            .collect())
    }
}
