//! Error types for the gateway binary.
//!
//! [`GatewayError`] is the top-level error type that wraps all possible
//! failure modes during startup.

/// Top-level error for the gateway binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: meshgate_core::ConfigError,
    },

    /// Database connection or migration failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: meshgate_db::DbError,
    },

    /// Loading stored nodes failed.
    #[error("persistence error: {source}")]
    Persistence {
        /// The underlying persistence error.
        #[from]
        source: meshgate_core::PersistenceError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying server error.
        #[from]
        source: meshgate_observer::ServerError,
    },
}
