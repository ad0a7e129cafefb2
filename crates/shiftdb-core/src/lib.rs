pub mod driver;
pub mod engine;
pub mod fs;
pub mod migration;
pub mod snapshot;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;

pub use driver::{Connection, Driver, DriverConfig, DriverRegistry, Executor};
pub use engine::{Engine, MigrationStatus, StatusReport};
pub use fs::{MemFs, MigrationFs, OsFs};
pub use migration::{Block, BlockOptions, Migration, ParsedMigration};
pub use source::MigrationSource;
pub use store::StateStore;
