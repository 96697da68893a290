//! Connection manager and query executor.
//!
//! A [`Client`] starts disconnected. `connect` builds and probes a pool;
//! every query then runs against the [`ExecutionTarget`] selected at call
//! time: the shared pool, or the reserved connection while a transaction is
//! in progress (see [`Client::transaction`]).

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::cardinality::{Cardinality, CardinalityError};
use crate::config::DatabaseConfig;
use crate::driver::{Driver, FromDbRow};
use crate::error::{DbError, Result};
use crate::param::Param;
use crate::transaction::TransactionPhase;

/// Liveness probe issued by [`Client::connect`].
pub const PROBE_SQL: &str = "select 1";

pub(crate) struct ClientState<P> {
    pub(crate) pool: Option<P>,
    pub(crate) connected: bool,
    pub(crate) released: bool,
    pub(crate) phase: TransactionPhase,
    pub(crate) affected_rows: u64,
}

/// Pooled database client with cardinality-checked queries.
pub struct Client<D: Driver> {
    pub(crate) driver: D,
    config: DatabaseConfig,
    uri: String,
    pub(crate) state: Mutex<ClientState<D::Pool>>,
    /// Connection owned by the transaction in progress, if any
    pub(crate) reserved: tokio::sync::Mutex<Option<D::Connection>>,
}

/// Handle a single query executes against.
pub(crate) enum ExecutionTarget<'a, D: Driver> {
    Pool(D::Pool),
    Reserved(tokio::sync::MutexGuard<'a, Option<D::Connection>>),
}

impl<'a, D: Driver> ExecutionTarget<'a, D> {
    fn label(&self) -> &'static str {
        match self {
            ExecutionTarget::Pool(_) => "pool",
            ExecutionTarget::Reserved(_) => "reserved",
        }
    }

    async fn fetch(&mut self, driver: &D, sql: &str, params: &[Param]) -> Result<Vec<D::Row>> {
        let fetched = match self {
            ExecutionTarget::Pool(pool) => driver.fetch_pool(pool, sql, params).await,
            ExecutionTarget::Reserved(slot) => match (**slot).as_mut() {
                Some(conn) => driver.fetch_reserved(conn, sql, params).await,
                None => return Err(DbError::reserved_unavailable()),
            },
        };
        fetched.map_err(|e| DbError::from_driver(driver.classify(&e), e))
    }
}

impl<D: Driver> Client<D> {
    /// Create a disconnected client. The connection URI is fixed here.
    pub fn new(driver: D, config: DatabaseConfig) -> Self {
        let uri = config.connection_uri();
        Self {
            driver,
            config,
            uri,
            state: Mutex::new(ClientState {
                pool: None,
                connected: false,
                released: false,
                phase: TransactionPhase::Idle,
                affected_rows: 0,
            }),
            reserved: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn connection_uri(&self) -> &str {
        &self.uri
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_not_connected(&self) -> bool {
        !self.is_connected()
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    pub fn is_transactional(&self) -> bool {
        self.state().phase.is_transactional()
    }

    pub fn transaction_phase(&self) -> TransactionPhase {
        self.state().phase
    }

    /// Row count of the most recently completed query.
    pub fn affected_rows(&self) -> u64 {
        self.state().affected_rows
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ClientState<D::Pool>> {
        // State updates are single assignments, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn driver_error(&self, error: D::Error) -> DbError {
        DbError::from_driver(self.driver.classify(&error), error)
    }

    /// Build a pool and probe it.
    ///
    /// Any failure leaves the client disconnected and is reported as
    /// [`DbError::Connection`]. A previous pool is closed once the new one
    /// is live.
    pub async fn connect(&self) -> Result<()> {
        {
            let state = self.state();
            if state.released {
                return Err(DbError::released());
            }
            if state.phase != TransactionPhase::Idle {
                return Err(DbError::database(
                    "cannot reconnect while a transaction is in progress",
                ));
            }
        }

        let pool = match self.driver.open(&self.config).await {
            Ok(pool) => pool,
            Err(e) => {
                self.mark_disconnected();
                warn!(uri = %self.config.redacted_uri(), error = %e, "failed to create pool");
                return Err(DbError::connection_caused_by(
                    "failed to create connection pool",
                    e,
                ));
            }
        };

        if let Err(e) = self.probe(&pool).await {
            self.driver.close(&pool).await;
            self.mark_disconnected();
            warn!(uri = %self.config.redacted_uri(), error = %e, "liveness probe failed");
            return Err(e);
        }

        let previous = {
            let mut state = self.state();
            if state.released {
                None
            } else {
                state.connected = true;
                Some(state.pool.replace(pool.clone()))
            }
        };

        match previous {
            // released while the pool was being built
            None => {
                self.driver.close(&pool).await;
                Err(DbError::released())
            }
            Some(previous) => {
                if let Some(previous) = previous {
                    self.driver.close(&previous).await;
                }
                info!(uri = %self.config.redacted_uri(), "connected");
                Ok(())
            }
        }
    }

    async fn probe(&self, pool: &D::Pool) -> Result<()> {
        let rows = self
            .driver
            .fetch_pool(pool, PROBE_SQL, &[])
            .await
            .map_err(|e| DbError::connection_caused_by("liveness probe failed", e))?;
        Cardinality::One
            .validate(rows.len())
            .map_err(|e| DbError::connection_caused_by("liveness probe failed", e))
    }

    fn mark_disconnected(&self) {
        let mut state = self.state();
        state.connected = false;
        state.affected_rows = 0;
    }

    /// Mark the client disconnected. The pool stays open; idempotent.
    pub fn disconnect(&self) {
        self.mark_disconnected();
        debug!("disconnected");
    }

    /// Disconnect and close the pool. Terminal; calling it again is a no-op.
    ///
    /// During a transaction the pool is closed when the transaction ends, so
    /// the reserved connection can still roll back.
    pub async fn release(&self) {
        self.disconnect();

        let (pool, phase) = {
            let mut state = self.state();
            if state.released {
                return;
            }
            state.released = true;
            (state.pool.take(), state.phase)
        };

        match pool {
            Some(pool) if phase == TransactionPhase::Idle => {
                self.driver.close(&pool).await;
                info!("connection pool released");
            }
            Some(_) => debug!(?phase, "released during a transaction; pool closes when it ends"),
            None => debug!("released a client that never connected"),
        }
    }

    /// Select the active handle. Fails synchronously when disconnected.
    pub(crate) async fn target(&self) -> Result<ExecutionTarget<'_, D>> {
        let pool = {
            let state = self.state();
            if !state.connected {
                return Err(if state.released {
                    DbError::released()
                } else {
                    DbError::not_connected()
                });
            }
            if state.phase.is_transactional() {
                None
            } else {
                Some(state.pool.clone().ok_or_else(DbError::not_connected)?)
            }
        };

        match pool {
            Some(pool) => Ok(ExecutionTarget::Pool(pool)),
            None => {
                let slot = self.reserved.lock().await;
                if slot.is_none() {
                    return Err(DbError::reserved_unavailable());
                }
                Ok(ExecutionTarget::Reserved(slot))
            }
        }
    }

    async fn run(&self, sql: &str, params: &[Param], expect: Cardinality) -> Result<Vec<D::Row>> {
        let mut handle = self.target().await?;

        if self.config.debug {
            info!(
                target: "rudb::query",
                handle = handle.label(),
                %expect,
                ?params,
                "{}",
                sql
            );
        }

        let rows = handle.fetch(&self.driver, sql, params).await?;
        drop(handle);

        self.state().affected_rows = rows.len() as u64;
        expect.validate(rows.len())?;
        Ok(rows)
    }

    fn decode<T: FromDbRow<D::Row>>(row: &D::Row) -> Result<T> {
        T::from_db_row(row).map_err(DbError::unexpected)
    }

    /// Run `sql` and check the result against `expect`.
    pub async fn query<T>(&self, sql: &str, params: &[Param], expect: Cardinality) -> Result<Vec<T>>
    where
        T: FromDbRow<D::Row>,
    {
        let rows = self.run(sql, params, expect).await?;
        rows.iter().map(Self::decode).collect()
    }

    /// Expect no rows.
    pub async fn query_none(&self, sql: &str, params: &[Param]) -> Result<()> {
        self.run(sql, params, Cardinality::None).await.map(drop)
    }

    /// Expect exactly one row.
    pub async fn query_one<T>(&self, sql: &str, params: &[Param]) -> Result<T>
    where
        T: FromDbRow<D::Row>,
    {
        let rows = self.run(sql, params, Cardinality::One).await?;
        match rows.first() {
            Some(row) => Self::decode(row),
            None => Err(CardinalityError {
                expected: Cardinality::One,
                received: 0,
            }
            .into()),
        }
    }

    /// Expect zero or one row; zero rows is `Ok(None)`.
    pub async fn query_one_or_none<T>(&self, sql: &str, params: &[Param]) -> Result<Option<T>>
    where
        T: FromDbRow<D::Row>,
    {
        let rows = self.run(sql, params, Cardinality::OneOrNone).await?;
        rows.first().map(Self::decode).transpose()
    }

    /// Expect at least one row.
    pub async fn query_one_or_many<T>(&self, sql: &str, params: &[Param]) -> Result<Vec<T>>
    where
        T: FromDbRow<D::Row>,
    {
        self.query(sql, params, Cardinality::OneOrMany).await
    }

    /// Any number of rows, including none.
    pub async fn query_any<T>(&self, sql: &str, params: &[Param]) -> Result<Vec<T>>
    where
        T: FromDbRow<D::Row>,
    {
        self.query(sql, params, Cardinality::Any).await
    }
}
