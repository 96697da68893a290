use rudb_core::DbError;
use thiserror::Error;

/// Failure while validating credentials
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// The credential store could not be reached
    #[error("credential store unavailable: {source}")]
    Connection {
        #[source]
        source: DbError,
    },

    #[error("credential lookup failed: {source}")]
    Unexpected {
        #[source]
        source: DbError,
    },
}

impl From<DbError> for CredentialsError {
    fn from(source: DbError) -> Self {
        if source.is_connection() {
            CredentialsError::Connection { source }
        } else {
            CredentialsError::Unexpected { source }
        }
    }
}

/// Failure while loading a user account
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database client error: {source}")]
    Database {
        #[from]
        source: DbError,
    },
}

impl RepositoryError {
    /// The data-access failure behind this error.
    pub fn cause(&self) -> &DbError {
        match self {
            RepositoryError::Database { source } => source,
        }
    }
}
