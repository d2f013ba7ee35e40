//! Oracle Driver
//!
//! Implements the DatabaseDriver trait for Oracle using the `oracle` crate
//! (ODPI-C). The client library is synchronous, so every call runs on the
//! blocking pool with the session moved in and handed back afterwards.
//!
//! The connection target is `user/password@connect_string`. A target without
//! credentials uses OS (external) authentication against the connect string.

use async_trait::async_trait;
use oracle::sql_type::OracleType;
use oracle::{Connection, Connector, SqlValue};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    unique_column_names, Row as QRow, TableInfo, Value,
};

/// Parsed `user/password@connect_string` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleTarget {
    pub username: String,
    pub password: String,
    pub connect_string: String,
}

impl OracleTarget {
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        match target.rsplit_once('@') {
            Some((credentials, connect)) => {
                let (username, password) = credentials.split_once('/').unwrap_or((credentials, ""));
                Self {
                    username: username.to_string(),
                    password: password.to_string(),
                    connect_string: connect.to_string(),
                }
            }
            None => Self {
                username: String::new(),
                password: String::new(),
                connect_string: target.to_string(),
            },
        }
    }

    pub fn uses_external_auth(&self) -> bool {
        self.username.is_empty()
    }

    fn open(&self) -> oracle::Result<Connection> {
        let mut connector = Connector::new(
            self.username.as_str(),
            self.password.as_str(),
            self.connect_string.as_str(),
        );
        if self.uses_external_auth() {
            connector.external_auth(true);
        }
        connector.connect()
    }
}

/// Oracle driver implementation
pub struct OracleDriver {
    target: String,
    conn: Option<Connection>,
}

impl OracleDriver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            conn: None,
        }
    }

    /// Runs `op` against the session on the blocking pool
    async fn with_session<T, F>(&mut self, op: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.conn.is_none() {
            self.connect().await?;
        }
        let conn = self
            .conn
            .take()
            .ok_or_else(|| EngineError::internal("Oracle session missing after connect"))?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| EngineError::internal(format!("oracle worker failed: {e}")))?;

        self.conn = Some(conn);
        result
    }

    /// Maps an Oracle value to the canonical value type
    fn extract_value(value: &SqlValue) -> Value {
        if value.is_null().unwrap_or(true) {
            return Value::Null;
        }

        match value.oracle_type() {
            Ok(
                OracleType::Number(..)
                | OracleType::Float(_)
                | OracleType::BinaryFloat
                | OracleType::BinaryDouble
                | OracleType::Int64
                | OracleType::UInt64,
            ) => {
                if let Ok(v) = value.get::<i64>() {
                    return Value::Int(v);
                }
                if let Ok(v) = value.get::<f64>() {
                    return Value::Float(v);
                }
            }
            Ok(OracleType::Boolean) => {
                if let Ok(v) = value.get::<bool>() {
                    return Value::Bool(v);
                }
            }
            Ok(OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB) => {
                if let Ok(v) = value.get::<Vec<u8>>() {
                    return Value::Bytes(v);
                }
            }
            _ => {}
        }

        value.get::<String>().map(Value::Text).unwrap_or(Value::Null)
    }

    fn run(conn: &Connection, sql: &str) -> EngineResult<QueryResult> {
        // Oracle rejects a trailing semicolon on plain SQL
        let sql = sql.trim().trim_end_matches(';');
        let mut stmt = conn
            .statement(sql)
            .build()
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        if stmt.is_query() {
            let result_set = stmt
                .query(&[])
                .map_err(|e| EngineError::from_execute(e.to_string()))?;
            let columns = unique_column_names(
                result_set
                    .column_info()
                    .iter()
                    .map(|info| info.name().to_string())
                    .collect(),
            );

            let mut rows = Vec::new();
            for row in result_set {
                let row = row.map_err(|e| EngineError::from_execute(e.to_string()))?;
                let values = row.sql_values().iter().map(Self::extract_value).collect();
                rows.push(QRow::from_columns(&columns, values));
            }
            return Ok(QueryResult::rows(columns, rows));
        }

        stmt.execute(&[])
            .map_err(|e| EngineError::from_execute(e.to_string()))?;
        let affected = stmt
            .row_count()
            .map_err(|e| EngineError::from_execute(e.to_string()))?;
        Ok(QueryResult::status(format!("Success. Rows affected: {affected}")))
    }

    /// Runs a catalog query and returns each row's values as optional text
    fn catalog(
        conn: &Connection,
        sql: &str,
        params: &[&dyn oracle::sql_type::ToSql],
    ) -> EngineResult<Vec<Vec<Option<String>>>> {
        let rows = conn
            .query(sql, params)
            .map_err(|e| EngineError::from_execute(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.map_err(|e| EngineError::from_execute(e.to_string()))?;
            let mut values = Vec::with_capacity(row.sql_values().len());
            for value in row.sql_values() {
                if value.is_null().unwrap_or(true) {
                    values.push(None);
                } else {
                    values.push(Some(
                        value
                            .get::<String>()
                            .map_err(|e| EngineError::execution_error(e.to_string()))?,
                    ));
                }
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn cell(row: &[Option<String>], idx: usize) -> Option<String> {
    row.get(idx).cloned().flatten()
}

fn required_cell(row: &[Option<String>], idx: usize) -> String {
    cell(row, idx).unwrap_or_default()
}

#[async_trait]
impl DatabaseDriver for OracleDriver {
    fn kind(&self) -> EngineKind {
        EngineKind::Oracle
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> EngineResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let target = OracleTarget::parse(&self.target);
        let conn = tokio::task::spawn_blocking(move || target.open())
            .await
            .map_err(|e| EngineError::internal(format!("oracle worker failed: {e}")))?
            .map_err(|e| EngineError::from_connect(e.to_string()))?;

        // Each act is a single statement with no surrounding transaction
        let mut conn = conn;
        conn.set_autocommit(true);

        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            let closed = tokio::task::spawn_blocking(move || conn.close()).await;
            match closed {
                Ok(Err(e)) => tracing::debug!(error = %e, "oracle disconnect failed"),
                Err(e) => tracing::debug!(error = %e, "oracle disconnect worker failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    async fn execute(&mut self, statement: &str) -> QueryResult {
        let statement = statement.to_string();
        self.with_session(move |conn| Self::run(conn, &statement))
            .await
            .into()
    }

    async fn get_tables(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .with_session(|conn| {
                Self::catalog(
                    conn,
                    "SELECT table_name FROM user_tables ORDER BY table_name",
                    &[],
                )
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| TableInfo::table(required_cell(row, 0), None))
            .collect())
    }

    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>> {
        let table = table.to_string();
        let rows = self
            .with_session(move |conn| {
                Self::catalog(
                    conn,
                    r#"
                    SELECT
                        c.column_name,
                        c.data_type,
                        c.nullable,
                        c.data_default,
                        CASE WHEN EXISTS (
                            SELECT 1
                            FROM user_constraints uc
                            JOIN user_cons_columns ucc
                              ON uc.constraint_name = ucc.constraint_name
                            WHERE uc.constraint_type = 'P'
                              AND uc.table_name = c.table_name
                              AND ucc.column_name = c.column_name
                        ) THEN 'Y' ELSE 'N' END AS is_pk
                    FROM user_tab_columns c
                    WHERE c.table_name = :1
                    ORDER BY c.column_id
                    "#,
                    &[&table],
                )
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: required_cell(row, 0),
                data_type: required_cell(row, 1),
                nullable: cell(row, 2).as_deref() == Some("Y"),
                default_value: cell(row, 3).map(|d| d.trim().to_string()),
                primary_key: cell(row, 4).as_deref() == Some("Y"),
            })
            .collect())
    }

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>> {
        let rows = self
            .with_session(|conn| {
                Self::catalog(
                    conn,
                    "SELECT view_name FROM user_views ORDER BY view_name",
                    &[],
                )
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| TableInfo::view(required_cell(row, 0), None))
            .collect())
    }

    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>> {
        let table = table.map(str::to_string);
        let rows = self
            .with_session(move |conn| match table {
                Some(table) => Self::catalog(
                    conn,
                    "SELECT index_name, table_name FROM user_indexes WHERE table_name = :1 ORDER BY index_name",
                    &[&table],
                ),
                None => Self::catalog(
                    conn,
                    "SELECT index_name, table_name FROM user_indexes ORDER BY table_name, index_name",
                    &[],
                ),
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| IndexInfo {
                name: required_cell(row, 0),
                table_name: required_cell(row, 1),
            })
            .collect())
    }

    async fn get_ddl(&mut self, table: &str) -> EngineResult<String> {
        let table = table.to_string();
        self.with_session(move |conn| {
            let ddl = conn.query_row_as::<String>(
                "SELECT DBMS_METADATA.GET_DDL('TABLE', :1) FROM DUAL",
                &[&table],
            );
            Ok(match ddl {
                Ok(ddl) => ddl,
                Err(e) => format!("-- Failed to get DDL: {e}"),
            })
        })
        .await
    }

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>> {
        let table = table.to_string();
        let rows = self
            .with_session(move |conn| {
                Self::catalog(
                    conn,
                    r#"
                    SELECT cols.column_name, cols.position
                    FROM user_constraints cons
                    JOIN user_cons_columns cols
                      ON cons.constraint_name = cols.constraint_name
                    WHERE cons.constraint_type = 'P'
                      AND cons.table_name = :1
                    ORDER BY cols.position
                    "#,
                    &[&table],
                )
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| PrimaryKeyEntry {
                column_name: required_cell(row, 0),
                position: cell(row, 1)
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>> {
        let table = table.to_string();
        let rows = self
            .with_session(move |conn| {
                Self::catalog(
                    conn,
                    r#"
                    SELECT
                        a.column_name,
                        c_pk.table_name,
                        b.column_name,
                        c.constraint_name,
                        c.delete_rule
                    FROM user_cons_columns a
                    JOIN user_constraints c
                      ON a.constraint_name = c.constraint_name
                    JOIN user_constraints c_pk
                      ON c.r_constraint_name = c_pk.constraint_name
                    JOIN user_cons_columns b
                      ON c_pk.constraint_name = b.constraint_name
                     AND a.position = b.position
                    WHERE c.constraint_type = 'R'
                      AND a.table_name = :1
                    ORDER BY c.constraint_name, a.position
                    "#,
                    &[&table],
                )
            })
            .await?;

        // Oracle has no ON UPDATE referential actions
        Ok(rows
            .iter()
            .map(|row| ForeignKeyEntry {
                column_name: required_cell(row, 0),
                referenced_table: required_cell(row, 1),
                referenced_column: required_cell(row, 2),
                constraint_name: cell(row, 3),
                on_update: None,
                on_delete: cell(row, 4),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_and_connect_string_split() {
        let target = OracleTarget::parse("scott/tiger@//db.internal:1521/ORCLPDB1");
        assert_eq!(target.username, "scott");
        assert_eq!(target.password, "tiger");
        assert_eq!(target.connect_string, "//db.internal:1521/ORCLPDB1");
        assert!(!target.uses_external_auth());
    }

    #[test]
    fn password_may_contain_separator_characters() {
        let target = OracleTarget::parse("app/p@ss/word@ORCL");
        assert_eq!(target.username, "app");
        assert_eq!(target.password, "p@ss/word");
        assert_eq!(target.connect_string, "ORCL");
    }

    #[test]
    fn bare_connect_string_uses_external_auth() {
        let target = OracleTarget::parse("  db.internal:1521/XE ");
        assert!(target.uses_external_auth());
        assert_eq!(target.connect_string, "db.internal:1521/XE");
        assert_eq!(target.password, "");
    }

    #[test]
    fn user_without_password() {
        let target = OracleTarget::parse("scott@XE");
        assert_eq!(target.username, "scott");
        assert_eq!(target.password, "");
        assert!(!target.uses_external_auth());
    }

    #[test]
    fn new_driver_holds_no_session() {
        let driver = OracleDriver::new("scott/tiger@XE");
        assert!(!driver.is_connected());
        assert_eq!(driver.kind(), EngineKind::Oracle);
    }
}
