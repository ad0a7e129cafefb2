pub mod sqlite;

use shiftdb_core::{Driver, DriverRegistry};

pub use sqlite::SqliteDriver;

/// Register every driver this crate provides.
pub fn register_drivers(registry: &mut DriverRegistry) {
    for scheme in ["sqlite", "sqlite3"] {
        registry.register(scheme, |config| {
            Ok(Box::new(SqliteDriver::from_config(config)?) as Box<dyn Driver>)
        });
    }
}

/// A registry with every built-in driver.
pub fn default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    register_drivers(&mut registry);
    registry
}
