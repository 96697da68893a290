//! PostgreSQL access layer with row-cardinality contracts and scoped
//! transactions.
//!
//! Every query declares how many rows it expects; a mismatch is a
//! [`DbError::QueryResult`]. [`Client::transaction`] runs a callback on a
//! single reserved connection between `BEGIN` and `COMMIT`/`ROLLBACK`.

pub mod cardinality;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod memory;
pub mod param;
pub mod postgres;
pub mod transaction;

pub use cardinality::{Cardinality, CardinalityError};
pub use client::{Client, PROBE_SQL};
pub use config::{config_dir, load_dotenv, ConfigError, DatabaseConfig};
pub use driver::{Driver, FromDbRow};
pub use error::{BoxError, DbError, ErrorKind, Result};
pub use memory::{MemoryClient, MemoryDriver, MemoryError, MemoryRow};
pub use param::Param;
pub use postgres::{JsonRow, PgClient, PgDriver};
pub use transaction::TransactionPhase;
