use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    /// Transport-level failure; the message is the driver's diagnostic verbatim.
    #[error("unable to connect to database: {0}")]
    Connection(String),

    #[error("failed to parse migration {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("can't rollback: no migrations have been applied")]
    NoMigrationsApplied,

    #[error("can't find migration file: {0}")]
    MigrationNotFound(String),

    /// A statement failed inside a migration transaction, which was rolled back.
    #[error("migration {file} failed: {message}")]
    Execution { file: String, message: String },

    /// A statement failed in a migration that runs with `transaction:false`.
    /// Statements executed before the failure were not undone.
    #[error("migration {file} failed outside a transaction, partial changes may remain: {message}")]
    PartialExecution { file: String, message: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The error returned when no database URL was configured.
    pub fn missing_url() -> Self {
        Error::Config(
            "invalid url, have you set your --url flag or DATABASE_URL environment variable?"
                .into(),
        )
    }

    /// The error returned when no driver is registered for a URL scheme.
    pub fn unsupported_driver(scheme: &str) -> Self {
        Error::Config(format!("unsupported driver: {scheme}"))
    }

    /// Attach the failing migration file to a driver error raised while
    /// executing its SQL.
    pub fn in_migration(self, file: &str, transactional: bool) -> Self {
        let message = match self {
            Error::Database(msg) => msg,
            other => other.to_string(),
        };
        if transactional {
            Error::Execution {
                file: file.to_string(),
                message,
            }
        } else {
            Error::PartialExecution {
                file: file.to_string(),
                message,
            }
        }
    }
}
