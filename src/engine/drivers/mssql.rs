//! SQL Server Driver
//!
//! Implements the DatabaseDriver trait for Microsoft SQL Server using
//! Tiberius over a Tokio TCP stream. The connection target is an ADO.NET
//! connection string.
//!
//! TDS does not announce up front whether a batch will return a result set,
//! so statements are classified before they run. Anything that may return
//! rows (queries, `OUTPUT` clauses, procedure calls, control flow) goes
//! through `simple_query`; when no result set arrives the status reports
//! `@@ROWCOUNT`. Plain writes go through `execute` for their affected-row
//! count.

use async_trait::async_trait;
use tiberius::{Client, Config, Row as TdsRow, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement::{produces_rows, split_qualified};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    unique_column_names, Row as QRow, TableInfo, Value,
};

type MssqlClient = Client<Compat<TcpStream>>;

/// Schema of a table: explicit `@P2` when non-empty, else the login's default schema
const RESOLVED_SCHEMA: &str = "COALESCE(NULLIF(@P2, ''), SCHEMA_NAME())";

/// SQL Server driver implementation
pub struct MssqlDriver {
    target: String,
    client: Option<MssqlClient>,
}

impl MssqlDriver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            client: None,
        }
    }

    async fn open(config: Config) -> Result<MssqlClient, tiberius::error::Error> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }

    async fn session(&mut self) -> EngineResult<&mut MssqlClient> {
        if self.client.is_none() {
            self.connect().await?;
        }
        self.client
            .as_mut()
            .ok_or_else(|| EngineError::internal("SQL Server session missing after connect"))
    }

    /// Converts a Tiberius row to our universal Row type
    fn convert_row(row: &TdsRow, columns: &[String]) -> QRow {
        let values = (0..row.len())
            .map(|idx| Self::extract_value(row, idx))
            .collect();
        QRow::from_columns(columns, values)
    }

    /// Extracts a value from a Tiberius row at the given index
    ///
    /// Tiberius decoding is strict about the wire type, so each candidate is
    /// tried in turn.
    fn extract_value(row: &TdsRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<bool, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<rust_decimal::Decimal, _>(idx) {
            return v.map(|d| Value::Text(d.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<&str, _>(idx) {
            return v.map(|s| Value::Text(s.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<uuid::Uuid, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<chrono::DateTime<chrono::FixedOffset>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(idx) {
            return v
                .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<&[u8], _>(idx) {
            return v.map(|b| Value::Bytes(b.to_vec())).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn text(row: &TdsRow, idx: usize) -> EngineResult<Option<String>> {
        row.try_get::<&str, _>(idx)
            .map(|v| v.map(str::to_string))
            .map_err(|e| EngineError::execution_error(e.to_string()))
    }

    fn required_text(row: &TdsRow, idx: usize) -> EngineResult<String> {
        Ok(Self::text(row, idx)?.unwrap_or_default())
    }

    fn int(row: &TdsRow, idx: usize) -> EngineResult<i32> {
        row.try_get::<i32, _>(idx)
            .map(Option::unwrap_or_default)
            .map_err(|e| EngineError::execution_error(e.to_string()))
    }

    async fn run(&mut self, statement: &str) -> EngineResult<QueryResult> {
        let client = self.session().await?;

        if produces_rows(EngineKind::Mssql, statement) {
            let mut stream = client
                .simple_query(statement)
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

            let columns = unique_column_names(
                stream
                    .columns()
                    .await
                    .map_err(|e| EngineError::from_execute(e.to_string()))?
                    .map(|cols| cols.iter().map(|col| col.name().to_string()).collect())
                    .unwrap_or_default(),
            );

            let tds_rows = stream
                .into_first_result()
                .await
                .map_err(|e| EngineError::from_execute(e.to_string()))?;

            // Procedure calls and control flow may finish without any result set
            if columns.is_empty() {
                let affected = Self::last_row_count(client).await?;
                return Ok(QueryResult::status(format!(
                    "Success. Rows affected: {affected}"
                )));
            }

            let rows = tds_rows
                .iter()
                .map(|row| Self::convert_row(row, &columns))
                .collect();
            return Ok(QueryResult::rows(columns, rows));
        }

        let result = client
            .execute(statement, &[])
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(QueryResult::status(format!(
            "Success. Rows affected: {}",
            result.total()
        )))
    }

    /// Row count of the last statement the session ran
    async fn last_row_count(client: &mut MssqlClient) -> EngineResult<i64> {
        let row = client
            .simple_query("SELECT CAST(@@ROWCOUNT AS BIGINT)")
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?
            .into_row()
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        Ok(row
            .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0))
    }

    async fn fetch_catalog(
        &mut self,
        query: &str,
        params: &[&dyn ToSql],
    ) -> EngineResult<Vec<TdsRow>> {
        let client = self.session().await?;
        client
            .query(query, params)
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| EngineError::from_execute(e.to_string()))
    }
}

#[async_trait]
impl DatabaseDriver for MssqlDriver {
    fn kind(&self) -> EngineKind {
        EngineKind::Mssql
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> EngineResult<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let config = Config::from_ado_string(&self.target)
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        let client = match Self::open(config.clone()).await {
            Ok(client) => client,
            // Azure SQL may redirect the login to another node
            Err(tiberius::error::Error::Routing { host, port }) => {
                let mut config = config;
                config.host(&host);
                config.port(port);
                Self::open(config)
                    .await
                    .map_err(|e| EngineError::from_connect(e.to_string()))?
            }
            Err(e) => return Err(EngineError::from_connect(e.to_string())),
        };

        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                tracing::debug!(error = %e, "mssql disconnect failed");
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
                SELECT TABLE_NAME, TABLE_SCHEMA
                FROM INFORMATION_SCHEMA.TABLES
                WHERE TABLE_TYPE = 'BASE TABLE'
                ORDER BY TABLE_SCHEMA, TABLE_NAME
                "#,
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<TableInfo> {
                Ok(TableInfo::table(
                    Self::required_text(row, 0)?,
                    Self::text(row, 1)?,
                ))
            })
            .collect()
    }

    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let (schema, table) = split_qualified(table);
        let schema = schema.unwrap_or("");
        let query = format!(
            r#"
            SELECT
                c.COLUMN_NAME,
                c.DATA_TYPE,
                c.IS_NULLABLE,
                c.COLUMN_DEFAULT,
                CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PK
            FROM INFORMATION_SCHEMA.COLUMNS c
            LEFT JOIN (
                SELECT kcu.TABLE_SCHEMA, kcu.TABLE_NAME, kcu.COLUMN_NAME
                FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                  ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                 AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
            ) pk
              ON c.TABLE_SCHEMA = pk.TABLE_SCHEMA
             AND c.TABLE_NAME = pk.TABLE_NAME
             AND c.COLUMN_NAME = pk.COLUMN_NAME
            WHERE c.TABLE_NAME = @P1
              AND c.TABLE_SCHEMA = {RESOLVED_SCHEMA}
            ORDER BY c.ORDINAL_POSITION
            "#
        );
        let rows = self.fetch_catalog(&query, &[&table, &schema]).await?;

        rows.iter()
            .map(|row| -> EngineResult<ColumnInfo> {
                Ok(ColumnInfo {
                    name: Self::required_text(row, 0)?,
                    data_type: Self::required_text(row, 1)?,
                    nullable: Self::required_text(row, 2)? == "YES",
                    default_value: Self::text(row, 3)?,
                    primary_key: Self::int(row, 4)? == 1,
                })
            })
            .collect()
    }

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .fetch_catalog(
                r#"
                SELECT TABLE_NAME, TABLE_SCHEMA
                FROM INFORMATION_SCHEMA.TABLES
                WHERE TABLE_TYPE = 'VIEW'
                ORDER BY TABLE_SCHEMA, TABLE_NAME
                "#,
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| -> EngineResult<TableInfo> {
                Ok(TableInfo::view(
                    Self::required_text(row, 0)?,
                    Self::text(row, 1)?,
                ))
            })
            .collect()
    }

    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>> {
        const BASE: &str = r#"
            SELECT i.name, t.name
            FROM sys.indexes i
            JOIN sys.tables t ON i.object_id = t.object_id
            WHERE i.type > 0
        "#;

        let rows = match table {
            Some(table) => {
                let query = format!("{BASE} AND t.name = @P1 ORDER BY i.name");
                self.fetch_catalog(&query, &[&table]).await?
            }
            None => {
                let query = format!("{BASE} ORDER BY t.name, i.name");
                self.fetch_catalog(&query, &[]).await?
            }
        };

        rows.iter()
            .map(|row| -> EngineResult<IndexInfo> {
                Ok(IndexInfo {
                    name: Self::required_text(row, 0)?,
                    table_name: Self::required_text(row, 1)?,
                })
            })
            .collect()
    }

    async fn get_ddl(&mut self, _table: &str) -> EngineResult<String> {
        Ok("-- DDL generation not implemented for MSSQL".to_string())
    }

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>> {
        let (schema, table) = split_qualified(table);
        let schema = schema.unwrap_or("");
        let query = format!(
            r#"
            SELECT kcu.COLUMN_NAME, kcu.ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
              ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
             AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_NAME = @P1
              AND tc.TABLE_SCHEMA = {RESOLVED_SCHEMA}
            ORDER BY kcu.ORDINAL_POSITION
            "#
        );
        let rows = self.fetch_catalog(&query, &[&table, &schema]).await?;

        rows.iter()
            .map(|row| -> EngineResult<PrimaryKeyEntry> {
                Ok(PrimaryKeyEntry {
                    column_name: Self::required_text(row, 0)?,
                    position: Self::int(row, 1)? as u32,
                })
            })
            .collect()
    }

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>> {
        let (schema, table) = split_qualified(table);
        let schema = schema.unwrap_or("");
        let query = format!(
            r#"
            SELECT
                kcu1.COLUMN_NAME,
                kcu2.TABLE_NAME,
                kcu2.COLUMN_NAME,
                tc.CONSTRAINT_NAME,
                rc.UPDATE_RULE,
                rc.DELETE_RULE
            FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
            JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
              ON rc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
             AND rc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu1
              ON rc.CONSTRAINT_NAME = kcu1.CONSTRAINT_NAME
             AND rc.CONSTRAINT_SCHEMA = kcu1.CONSTRAINT_SCHEMA
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu2
              ON rc.UNIQUE_CONSTRAINT_NAME = kcu2.CONSTRAINT_NAME
             AND rc.UNIQUE_CONSTRAINT_SCHEMA = kcu2.CONSTRAINT_SCHEMA
             AND kcu1.ORDINAL_POSITION = kcu2.ORDINAL_POSITION
            WHERE tc.TABLE_NAME = @P1
              AND tc.TABLE_SCHEMA = {RESOLVED_SCHEMA}
            ORDER BY tc.CONSTRAINT_NAME, kcu1.ORDINAL_POSITION
            "#
        );
        let rows = self.fetch_catalog(&query, &[&table, &schema]).await?;

        rows.iter()
            .map(|row| -> EngineResult<ForeignKeyEntry> {
                Ok(ForeignKeyEntry {
                    column_name: Self::required_text(row, 0)?,
                    referenced_table: Self::required_text(row, 1)?,
                    referenced_column: Self::required_text(row, 2)?,
                    constraint_name: Self::text(row, 3)?,
                    on_update: Self::text(row, 4)?,
                    on_delete: Self::text(row, 5)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_driver_holds_no_session() {
        let driver = MssqlDriver::new("server=tcp:localhost,1433;user=sa;password=x");
        assert!(!driver.is_connected());
        assert_eq!(driver.kind(), EngineKind::Mssql);
    }

    #[test]
    fn ado_targets_parse_into_config() {
        let config = Config::from_ado_string(
            "server=tcp:db.internal,1433;user=sa;password=x;database=app;TrustServerCertificate=true",
        )
        .expect("valid ado string");
        assert_eq!(config.get_addr(), "db.internal:1433");
    }

    #[tokio::test]
    async fn malformed_target_is_an_error_result() {
        let mut driver = MssqlDriver::new("server=tcp:localhost,notaport");

        let result = driver.execute("SELECT 1").await;
        assert!(result.is_error());
        assert!(driver.get_tables().await.is_err());
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn ddl_is_a_placeholder() {
        let mut driver = MssqlDriver::new("");
        assert_eq!(
            driver.get_ddl("users").await.expect("placeholder"),
            "-- DDL generation not implemented for MSSQL"
        );
    }
}
