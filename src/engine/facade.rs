//! Façade
//!
//! One entry point per driver capability. Every call builds a fresh driver,
//! connects, performs exactly one operation and disconnects, whatever the
//! operation's outcome. Failures (and panics inside a driver) come back as
//! the error form; nothing escapes to the caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;

use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::factory::DriverFactory;
use crate::engine::types::{
    ColumnInfo, ConnectionDescriptor, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult,
    SchemaResult, TableInfo,
};

/// Metadata actions accepted by `run_metadata`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataAction {
    ListTables,
    ListColumns,
    ListViews,
    ListIndexes,
    GetDdl,
    ListPrimaryKeys,
    ListForeignKeys,
}

impl MetadataAction {
    pub const ALL: [MetadataAction; 7] = [
        MetadataAction::ListTables,
        MetadataAction::ListColumns,
        MetadataAction::ListViews,
        MetadataAction::ListIndexes,
        MetadataAction::GetDdl,
        MetadataAction::ListPrimaryKeys,
        MetadataAction::ListForeignKeys,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataAction::ListTables => "list-tables",
            MetadataAction::ListColumns => "list-columns",
            MetadataAction::ListViews => "list-views",
            MetadataAction::ListIndexes => "list-indexes",
            MetadataAction::GetDdl => "get-ddl",
            MetadataAction::ListPrimaryKeys => "list-primary-keys",
            MetadataAction::ListForeignKeys => "list-foreign-keys",
        }
    }

    /// Actions scoped to a single table. Index listing takes an optional one.
    pub fn requires_table(self) -> bool {
        matches!(
            self,
            MetadataAction::ListColumns
                | MetadataAction::GetDdl
                | MetadataAction::ListPrimaryKeys
                | MetadataAction::ListForeignKeys
        )
    }
}

impl std::fmt::Display for MetadataAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAction(pub String);

impl std::fmt::Display for InvalidAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid action: {}", self.0)
    }
}

impl std::error::Error for InvalidAction {}

impl FromStr for MetadataAction {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s.trim())
            .ok_or_else(|| InvalidAction(s.to_string()))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "driver panicked".to_string()
    }
}

/// Runs a driver operation, turning a panic into an internal error
async fn guarded<T>(op: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            tracing::error!(panic = %message, "driver operation panicked");
            Err(EngineError::internal(message))
        }
    }
}

fn log_outcome<T>(result: &EngineResult<T>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "operation failed");
    }
}

/// Runs one statement and returns its canonical result
#[instrument(
    skip(descriptor, statement),
    fields(
        engine = %descriptor.engine,
        target = %descriptor.redacted_target(),
        statement_len = statement.len()
    )
)]
pub async fn execute_query(descriptor: &ConnectionDescriptor, statement: &str) -> QueryResult {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        Ok::<_, EngineError>(driver.execute(statement).await)
    })
    .await;
    driver.disconnect().await;

    let result = QueryResult::from(result);
    if let Some(error) = result.error_message() {
        tracing::debug!(error, "statement failed");
    }
    result
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_tables(descriptor: &ConnectionDescriptor) -> SchemaResult<Vec<TableInfo>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_tables().await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_columns(
    descriptor: &ConnectionDescriptor,
    table: &str,
) -> SchemaResult<Vec<ColumnInfo>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_columns(table).await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_views(descriptor: &ConnectionDescriptor) -> SchemaResult<Vec<TableInfo>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_views().await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_indexes(
    descriptor: &ConnectionDescriptor,
    table: Option<&str>,
) -> SchemaResult<Vec<IndexInfo>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_indexes(table).await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_ddl(descriptor: &ConnectionDescriptor, table: &str) -> SchemaResult<String> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_ddl(table).await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_primary_keys(
    descriptor: &ConnectionDescriptor,
    table: &str,
) -> SchemaResult<Vec<PrimaryKeyEntry>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_primary_keys(table).await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

#[instrument(
    skip(descriptor),
    fields(engine = %descriptor.engine, target = %descriptor.redacted_target())
)]
pub async fn get_foreign_keys(
    descriptor: &ConnectionDescriptor,
    table: &str,
) -> SchemaResult<Vec<ForeignKeyEntry>> {
    let mut driver = DriverFactory::create(descriptor);
    let result = guarded(async {
        driver.connect().await?;
        driver.get_foreign_keys(table).await
    })
    .await;
    driver.disconnect().await;

    log_outcome(&result);
    result.into()
}

fn to_json<T: Serialize>(value: SchemaResult<T>) -> serde_json::Value {
    serde_json::to_value(&value)
        .unwrap_or_else(|e| json!({ "error": format!("Failed to serialize result: {e}") }))
}

/// Dispatches a metadata action and returns its JSON payload.
///
/// Fails with `MissingArgument` before touching the database when a
/// table-scoped action has no table name.
pub async fn run_metadata(
    action: MetadataAction,
    descriptor: &ConnectionDescriptor,
    table: Option<&str>,
) -> EngineResult<serde_json::Value> {
    let table = table.map(str::trim).filter(|t| !t.is_empty());
    let scoped = match (action.requires_table(), table) {
        (true, None) => return Err(EngineError::missing_argument("tableName")),
        (_, table) => table.unwrap_or_default(),
    };

    let value = match action {
        MetadataAction::ListTables => to_json(get_tables(descriptor).await),
        MetadataAction::ListColumns => to_json(get_columns(descriptor, scoped).await),
        MetadataAction::ListViews => to_json(get_views(descriptor).await),
        MetadataAction::ListIndexes => to_json(get_indexes(descriptor, table).await),
        MetadataAction::GetDdl => to_json(get_ddl(descriptor, scoped).await),
        MetadataAction::ListPrimaryKeys => to_json(get_primary_keys(descriptor, scoped).await),
        MetadataAction::ListForeignKeys => to_json(get_foreign_keys(descriptor, scoped).await),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::EngineKind;

    #[test]
    fn actions_parse_from_kebab_case() {
        for action in MetadataAction::ALL {
            assert_eq!(action.as_str().parse::<MetadataAction>(), Ok(action));
        }
        assert!("drop-everything".parse::<MetadataAction>().is_err());
        assert!("ListTables".parse::<MetadataAction>().is_err());
    }

    #[test]
    fn table_scoped_actions() {
        assert!(MetadataAction::ListColumns.requires_table());
        assert!(MetadataAction::GetDdl.requires_table());
        assert!(!MetadataAction::ListTables.requires_table());
        assert!(!MetadataAction::ListIndexes.requires_table());
    }

    #[tokio::test]
    async fn missing_table_name_is_rejected_before_connecting() {
        let descriptor = ConnectionDescriptor::new(EngineKind::Postgres, "postgres://nowhere/db");
        let err = run_metadata(MetadataAction::ListColumns, &descriptor, Some("  "))
            .await
            .expect_err("table name required");
        assert_eq!(err.to_string(), "Missing tableName");
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let explode = true;
        let result: EngineResult<()> = guarded(async move {
            if explode {
                panic!("boom");
            }
            Ok::<_, EngineError>(())
        })
        .await;
        assert_eq!(result, Err(EngineError::internal("boom")));
    }

    #[tokio::test]
    async fn connect_failure_is_the_error_form() {
        let descriptor = ConnectionDescriptor::new(EngineKind::Postgres, "not a url");
        let result = execute_query(&descriptor, "SELECT 1").await;
        assert!(result.is_error());
        assert!(!result.error_message().unwrap_or_default().is_empty());

        let tables = get_tables(&descriptor).await;
        assert!(tables.is_error());
    }
}
