// polyquery - one interface over SQLite, PostgreSQL, MySQL, SQL Server and Oracle
// Core library

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod observability;

pub use engine::{
    facade, ConnectionDescriptor, DatabaseDriver, DriverFactory, EngineError, EngineKind,
    EngineResult, MetadataAction, QueryResult, SchemaResult,
};
