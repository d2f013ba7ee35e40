// Data Engine Module
// Universal abstraction layer for all database engines

pub mod drivers;
pub mod error;
pub mod facade;
pub mod factory;
pub mod statement;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use facade::MetadataAction;
pub use factory::DriverFactory;
pub use traits::DatabaseDriver;
pub use types::*;
