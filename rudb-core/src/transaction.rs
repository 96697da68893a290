//! Scoped transactions on a reserved connection.
//!
//! `Idle → Beginning → InTransaction → (Committing | RollingBack) → Idle`
//!
//! While a transaction is active every query issued through the client runs
//! on the reserved connection, in order. Leaving the scope always restores
//! pool-backed execution, including when the callback fails, panics or the
//! transaction future is dropped.

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::driver::Driver;
use crate::error::{DbError, Result};

pub const BEGIN_SQL: &str = "BEGIN";
pub const COMMIT_SQL: &str = "COMMIT";
pub const ROLLBACK_SQL: &str = "ROLLBACK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Idle,
    /// Waiting for a connection to be reserved; queries still use the pool
    Beginning,
    InTransaction,
    Committing,
    RollingBack,
}

impl TransactionPhase {
    /// Whether queries route to the reserved connection in this phase.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            TransactionPhase::InTransaction | TransactionPhase::Committing | TransactionPhase::RollingBack
        )
    }
}

/// Restores the client to pool-backed execution when dropped.
///
/// `finish` returns the connection to the pool. Dropping the scope without
/// finishing discards the connection instead, since it may still hold an
/// open transaction. Either way, a pool released while the transaction ran
/// is closed on the way out.
struct TransactionScope<'c, D: Driver> {
    client: &'c Client<D>,
    pool: D::Pool,
    settled: bool,
}

impl<'c, D: Driver> TransactionScope<'c, D> {
    fn new(client: &'c Client<D>, pool: D::Pool) -> Self {
        Self {
            client,
            pool,
            settled: false,
        }
    }

    async fn install(&mut self, conn: D::Connection) {
        let stale = self.client.reserved.lock().await.replace(conn);
        if let Some(stale) = stale {
            warn!("discarding a reserved connection left behind by an abandoned transaction");
            self.client.driver.discard(stale);
        }
        self.enter(TransactionPhase::InTransaction);
    }

    fn enter(&self, phase: TransactionPhase) {
        self.client.state().phase = phase;
        debug!(?phase, "transaction phase");
    }

    async fn finish(mut self) {
        let conn = self.client.reserved.lock().await.take();
        self.enter(TransactionPhase::Idle);
        if let Some(conn) = conn {
            self.client.driver.release(conn);
        }
        if self.client.is_released() {
            self.client.driver.close(&self.pool).await;
            info!("connection pool released after the transaction ended");
        }
        self.settled = true;
    }
}

impl<D: Driver> Drop for TransactionScope<'_, D> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let conn = match self.client.reserved.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                warn!("reserved connection still borrowed while leaving a transaction");
                None
            }
        };
        self.enter(TransactionPhase::Idle);
        if let Some(conn) = conn {
            self.client.driver.discard(conn);
        }
        if self.client.is_released() {
            self.client.driver.close_detached(self.pool.clone());
        }
    }
}

impl<D: Driver> Client<D> {
    /// Run `work` inside a transaction on a reserved connection.
    ///
    /// `work` receives this same client; its queries run on the reserved
    /// connection. `Ok` commits and returns the value. `Err` rolls back and
    /// returns the callback's error unchanged; a failed rollback is only
    /// logged. Calling `transaction` while one is already in progress fails
    /// with [`DbError::Database`] and issues no SQL.
    ///
    /// ```no_run
    /// # use rudb_core::{params, DbError, PgClient};
    /// # async fn example(client: &PgClient) -> Result<(), DbError> {
    /// client
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.query_none("insert into ru.user(id, name) values($1, $2)", &params![1, "John"])
    ///                 .await?;
    ///             tx.query_none("update ru.user set name = $1 where id = $2", &params!["Jane", 1])
    ///                 .await?;
    ///             Ok::<_, DbError>(())
    ///         })
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c Client<D>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DbError>,
    {
        let pool = self.begin_scope()?;
        let mut scope = TransactionScope::new(self, pool.clone());

        let conn = self
            .driver
            .reserve(&pool)
            .await
            .map_err(|e| self.driver_error(e))?;
        scope.install(conn).await;
        self.control(BEGIN_SQL).await?;

        match work(self).await {
            Ok(value) => {
                scope.enter(TransactionPhase::Committing);
                self.control(COMMIT_SQL).await?;
                scope.finish().await;
                Ok(value)
            }
            Err(err) => {
                scope.enter(TransactionPhase::RollingBack);
                match self.control(ROLLBACK_SQL).await {
                    Ok(()) => scope.finish().await,
                    // the scope discards the connection on drop
                    Err(rollback) => warn!(error = %rollback, "rollback failed"),
                }
                Err(err)
            }
        }
    }

    /// Claim the transaction slot: `Idle → Beginning`.
    fn begin_scope(&self) -> Result<D::Pool> {
        let mut state = self.state();
        if state.phase != TransactionPhase::Idle {
            return Err(DbError::nested_transaction());
        }
        if !state.connected {
            return Err(if state.released {
                DbError::released()
            } else {
                DbError::not_connected()
            });
        }
        let pool = state.pool.clone().ok_or_else(DbError::not_connected)?;
        state.phase = TransactionPhase::Beginning;
        debug!(phase = ?state.phase, "transaction phase");
        Ok(pool)
    }

    /// Issue a transaction-control statement on the reserved connection.
    async fn control(&self, sql: &'static str) -> Result<()> {
        if self.config().debug {
            tracing::info!(target: "rudb::query", handle = "reserved", "{}", sql);
        }
        let mut slot = self.reserved.lock().await;
        let conn = (*slot).as_mut().ok_or_else(DbError::reserved_unavailable)?;
        self.driver
            .fetch_reserved(conn, sql, &[])
            .await
            .map(drop)
            .map_err(|e| self.driver_error(e))
    }
}
