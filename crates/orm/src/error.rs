//! Error types for the ORM engine
//!
//! Every terminal builder operation returns an explicit [`OrmResult`]. Hook errors are
//! carried through untouched so callers can match on the `EventError` their observer raised.

use crate::event_error::EventError;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrmError {
    /// Invalid or incomplete configuration for a connection
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configured driver is not one of mysql, postgres, sqlite, sqlserver
    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    /// A server-based driver was configured without a usable host
    #[error("Failed to generate DSN for connection '{0}', please check the database configuration")]
    DsnGeneration(String),

    /// No configuration exists for the requested connection name
    #[error("Database connection '{0}' is not configured")]
    ConnectionNotFound(String),

    /// Opening or acquiring a physical connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Passthrough of a driver error
    #[error("Database error: {0}")]
    Database(String),

    /// Raised by the `..._or_fail` family when nothing matched
    #[error("Record not found")]
    RecordNotFound,

    /// Mutating or keyed lookup without any filter
    #[error("WHERE conditions required")]
    MissingWhereClause,

    /// Neither an explicit table nor a model table could be resolved
    #[error("Table is required")]
    TableIsRequired,

    /// `select` and `omit` were both set on one query
    #[error("Select and omit cannot be used at the same time")]
    SelectOmitConflict,

    /// The associations sentinel was mixed with named columns
    #[error("Associations cannot be selected or omitted together with other columns")]
    AssociationsConflict,

    /// A value could not be mapped onto a model
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Relation lookup or loading failed
    #[error("Relation error: {0}")]
    Relation(String),

    /// Transaction lifecycle error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A statement exceeded the deadline set with `with_timeout`
    #[error("Query timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error returned by a lifecycle hook
    #[error(transparent)]
    Event(#[from] EventError),
}

impl OrmError {
    /// True for errors that mean "nothing matched"
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrmError::RecordNotFound)
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrmError::RecordNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                OrmError::Connection(err.to_string())
            }
            other => OrmError::Database(other.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrmError {
    fn from(err: serde_yaml::Error) -> Self {
        OrmError::Configuration(err.to_string())
    }
}

// Convert from anyhow errors
impl From<anyhow::Error> for OrmError {
    fn from(err: anyhow::Error) -> Self {
        OrmError::Database(err.to_string())
    }
}

impl From<url::ParseError> for OrmError {
    fn from(err: url::ParseError) -> Self {
        OrmError::Configuration(format!("invalid DSN: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_passes_through_verbatim() {
        let hook = EventError::validation("slug is required");
        let err: OrmError = hook.clone().into();

        assert_eq!(err.to_string(), hook.to_string());
        match err {
            OrmError::Event(EventError::Validation { message, .. }) => {
                assert_eq!(message, "slug is required");
            }
            other => panic!("Expected event error, got {:?}", other),
        }
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_record_not_found() {
        let err: OrmError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dsn_error_mentions_connection() {
        let err = OrmError::DsnGeneration("mysql".to_string());
        assert!(err.to_string().contains("'mysql'"));
    }
}
