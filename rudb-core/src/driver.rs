//! Driver seam between the client and a concrete database library.
//!
//! A [`Driver`] knows how to build a pool, run a statement on the pool or on
//! a single reserved connection, and sort its own failures into an
//! [`ErrorKind`]. Everything else (connected state, cardinality, transaction
//! protocol) lives in the client and is shared by every driver.

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::error::{BoxError, ErrorKind};
use crate::param::Param;

#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Shared, cheaply clonable pool handle
    type Pool: Clone + Send + Sync + 'static;
    /// A single connection checked out of the pool
    type Connection: Send + 'static;
    type Row: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Build a pool for `config`. Must not hang past the connection timeout.
    async fn open(&self, config: &DatabaseConfig) -> Result<Self::Pool, Self::Error>;

    async fn fetch_pool(
        &self,
        pool: &Self::Pool,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<Self::Row>, Self::Error>;

    async fn fetch_reserved(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<Self::Row>, Self::Error>;

    /// Check a connection out of the pool for exclusive use.
    async fn reserve(&self, pool: &Self::Pool) -> Result<Self::Connection, Self::Error>;

    /// Hand a reserved connection back to the pool.
    fn release(&self, conn: Self::Connection);

    /// Drop a reserved connection without returning it to the pool.
    ///
    /// Used when the connection may still hold an open transaction.
    fn discard(&self, conn: Self::Connection);

    /// Close the pool; later checkouts fail.
    async fn close(&self, pool: &Self::Pool);

    /// Start closing the pool from a context that cannot await (a `Drop`).
    fn close_detached(&self, pool: Self::Pool);

    fn classify(&self, error: &Self::Error) -> ErrorKind;
}

/// Decode one driver row into a caller type.
pub trait FromDbRow<R>: Sized {
    fn from_db_row(row: &R) -> Result<Self, BoxError>;
}
