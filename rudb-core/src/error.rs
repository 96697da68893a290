/// Structured error types for the data-access layer.
///
/// Every failure that leaves a [`Client`](crate::Client) is one of the
/// [`DbError`] variants. Driver errors are classified once, at the executor
/// boundary; a value that is already a `DbError` travels through `?` untouched.
use std::fmt;

use thiserror::Error;

use crate::cardinality::CardinalityError;

/// Boxed cause carried by the variants that wrap driver failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Flat classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Network,
    QueryResult,
    Syntax,
    Unexpected,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Network => "network",
            ErrorKind::QueryResult => "query_result",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Unexpected => "unexpected",
            ErrorKind::Database => "database",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum DbError {
    /// Connect or probe failed, or the client is disconnected / released
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transport failure after the connection was established
    #[error("Network error: {source}")]
    Network {
        #[source]
        source: BoxError,
    },

    /// Row count violated the declared cardinality
    #[error(transparent)]
    QueryResult(#[from] CardinalityError),

    /// The server rejected the SQL text
    #[error("Syntax error: {source}")]
    Syntax {
        #[source]
        source: BoxError,
    },

    /// Any driver failure without a more specific kind
    #[error("Unexpected error: {source}")]
    Unexpected {
        #[source]
        source: BoxError,
    },

    /// Client misuse, such as opening a transaction inside another one
    #[error("Database error: {message}")]
    Database { message: String },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Create a connection error without an underlying cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping a driver failure
    pub fn connection_caused_by(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The error raised when the active handle is requested while disconnected
    pub fn not_connected() -> Self {
        Self::connection("connection not established")
    }

    pub fn released() -> Self {
        Self::connection("client has been released")
    }

    pub(crate) fn reserved_unavailable() -> Self {
        Self::connection("reserved connection is not available")
    }

    pub fn unexpected(source: impl Into<BoxError>) -> Self {
        Self::Unexpected {
            source: source.into(),
        }
    }

    /// Create a generic database (misuse) error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn nested_transaction() -> Self {
        Self::database("nested transactions are not supported")
    }

    /// Build the taxonomy value for a driver failure that was classified as `kind`.
    ///
    /// Only driver-level kinds are meaningful here; `QueryResult` and `Database`
    /// are produced by the client itself and fall back to `Unexpected`.
    pub fn from_driver(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        match kind {
            ErrorKind::Connection => Self::Connection {
                message: source.to_string(),
                source: Some(source),
            },
            ErrorKind::Network => Self::Network { source },
            ErrorKind::Syntax => Self::Syntax { source },
            ErrorKind::QueryResult | ErrorKind::Database | ErrorKind::Unexpected => {
                Self::Unexpected { source }
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection { .. } => ErrorKind::Connection,
            DbError::Network { .. } => ErrorKind::Network,
            DbError::QueryResult(_) => ErrorKind::QueryResult,
            DbError::Syntax { .. } => ErrorKind::Syntax,
            DbError::Unexpected { .. } => ErrorKind::Unexpected,
            DbError::Database { .. } => ErrorKind::Database,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}
