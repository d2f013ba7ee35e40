// Database Drivers
// One DatabaseDriver implementation per supported engine

pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod sqlite;

pub use mssql::MssqlDriver;
pub use mysql::MySqlDriver;
pub use oracle::OracleDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
