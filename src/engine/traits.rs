//! DatabaseDriver trait definition
//!
//! This is the capability contract every engine implements once. A driver
//! instance owns at most one native session handle; callers never see it.

use async_trait::async_trait;

use crate::engine::error::EngineResult;
use crate::engine::types::{
    ColumnInfo, EngineKind, ForeignKeyEntry, IndexInfo, PrimaryKeyEntry, QueryResult, TableInfo,
};

/// Core trait that all database drivers must implement
///
/// Lifecycle: constructed without a session, `connect` acquires one (a no-op
/// when already connected), `execute` and the metadata getters connect
/// lazily when needed, `disconnect` releases the session and is safe to call
/// repeatedly.
#[async_trait]
pub trait DatabaseDriver: Send {
    /// Engine this driver talks to
    fn kind(&self) -> EngineKind;

    /// Returns true while a native session handle is held
    fn is_connected(&self) -> bool;

    /// Opens the native session for the driver's connection target
    async fn connect(&mut self) -> EngineResult<()>;

    /// Releases the session. Failures are logged and swallowed.
    async fn disconnect(&mut self);

    /// Runs exactly one statement
    ///
    /// Never fails: connect and execute errors come back as the error form.
    async fn execute(&mut self, statement: &str) -> QueryResult;

    /// Lists base tables, excluding system catalogs
    async fn get_tables(&mut self) -> EngineResult<Vec<TableInfo>>;

    /// Lists the columns of one table in creation order
    async fn get_columns(&mut self, table: &str) -> EngineResult<Vec<ColumnInfo>>;

    async fn get_views(&mut self) -> EngineResult<Vec<TableInfo>>;

    /// Lists indexes, optionally only those of one table
    async fn get_indexes(&mut self, table: Option<&str>) -> EngineResult<Vec<IndexInfo>>;

    /// Returns native definition text, or a placeholder comment when the
    /// engine has no convenient facility for it
    async fn get_ddl(&mut self, table: &str) -> EngineResult<String>;

    async fn get_primary_keys(&mut self, table: &str) -> EngineResult<Vec<PrimaryKeyEntry>>;

    async fn get_foreign_keys(&mut self, table: &str) -> EngineResult<Vec<ForeignKeyEntry>>;
}
