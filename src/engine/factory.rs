//! Driver Factory
//!
//! Maps an engine tag to a fresh, unconnected driver instance. Nothing is
//! cached: every call builds a new driver that owns its own session.

use crate::engine::drivers::{
    MssqlDriver, MySqlDriver, OracleDriver, PostgresDriver, SqliteDriver,
};
use crate::engine::error::EngineResult;
use crate::engine::traits::DatabaseDriver;
use crate::engine::types::{ConnectionDescriptor, EngineKind};

pub struct DriverFactory;

impl DriverFactory {
    /// Builds the driver for a descriptor. No connection is opened.
    pub fn create(descriptor: &ConnectionDescriptor) -> Box<dyn DatabaseDriver> {
        let target = descriptor.target.clone();
        match descriptor.engine {
            EngineKind::Sqlite => Box::new(SqliteDriver::new(target)),
            EngineKind::Postgres => Box::new(PostgresDriver::new(target)),
            EngineKind::Mysql => Box::new(MySqlDriver::new(target)),
            EngineKind::Mssql => Box::new(MssqlDriver::new(target)),
            EngineKind::Oracle => Box::new(OracleDriver::new(target)),
        }
    }

    /// Builds a driver from a raw engine tag
    pub fn from_tag(tag: &str, target: &str) -> EngineResult<Box<dyn DatabaseDriver>> {
        let descriptor = ConnectionDescriptor::parse(tag, target)?;
        Ok(Self::create(&descriptor))
    }

    pub fn supported() -> &'static [EngineKind] {
        &EngineKind::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EngineError;

    #[test]
    fn every_known_tag_builds_an_unconnected_driver() {
        for kind in DriverFactory::supported() {
            let driver = DriverFactory::from_tag(kind.tag(), "unused").expect("known tag");
            assert_eq!(driver.kind(), *kind);
            assert!(!driver.is_connected());
        }
    }

    #[test]
    fn tags_are_case_insensitive() {
        let driver = DriverFactory::from_tag(" PostgreS ", "postgres://localhost/db")
            .expect("known tag");
        assert_eq!(driver.kind(), EngineKind::Postgres);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = DriverFactory::from_tag("mongodb", "mongodb://localhost")
            .err()
            .expect("unknown tag must fail");
        assert_eq!(err, EngineError::unsupported_engine("mongodb"));
        assert_eq!(err.to_string(), "Unsupported DB type: mongodb");
    }

    #[tokio::test]
    async fn instances_are_never_shared() {
        let descriptor = ConnectionDescriptor::new(EngineKind::Sqlite, ":memory:");
        let mut first = DriverFactory::create(&descriptor);
        let second = DriverFactory::create(&descriptor);

        first.connect().await.expect("in-memory sqlite");
        assert!(first.is_connected());
        assert!(!second.is_connected());
        first.disconnect().await;
    }
}
