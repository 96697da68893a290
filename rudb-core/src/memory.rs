//! Scripted in-process driver.
//!
//! `MemoryDriver` answers statements from a table of canned responses and
//! keeps a log of everything it executed. It models just enough of a server
//! to test the client without one:
//!
//! - statements on the pool are visible immediately;
//! - statements on a reserved connection between `BEGIN` and `COMMIT` become
//!   visible on `COMMIT` and are dropped on `ROLLBACK` or when the connection
//!   is discarded;
//! - a failing statement has no effect.
//!
//! Unscripted statements return no rows, except the liveness probe
//! `select 1`, which returns one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::{Client, PROBE_SQL};
use crate::config::DatabaseConfig;
use crate::driver::{Driver, FromDbRow};
use crate::error::{BoxError, ErrorKind};
use crate::param::Param;

/// Client over the scripted driver
pub type MemoryClient = Client<MemoryDriver>;

/// A row is a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow(pub Value);

impl<T: DeserializeOwned> FromDbRow<MemoryRow> for T {
    fn from_db_row(row: &MemoryRow) -> Result<Self, BoxError> {
        serde_json::from_value(row.0.clone()).map_err(Into::into)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MemoryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MemoryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Where a statement ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    Pool,
    Connection(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    pub handle: Handle,
}

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Value>),
    Fail(ErrorKind, String),
}

#[derive(Default)]
struct Backend {
    responses: HashMap<String, Response>,
    refuse_open: Option<String>,
    pools_opened: usize,
    pools_closed: usize,
    next_connection: u64,
    checked_out: usize,
    discarded: usize,
    executed: Vec<Statement>,
    committed: Vec<Statement>,
    /// Open transactions, keyed by connection id
    pending: HashMap<u64, Vec<Statement>>,
}

impl Backend {
    fn execute(&mut self, handle: Handle, sql: &str, params: &[Param]) -> Result<Vec<MemoryRow>, MemoryError> {
        let statement = Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
            handle,
        };
        self.executed.push(statement.clone());

        let response = self.responses.get(sql).cloned();
        if let Some(Response::Fail(kind, message)) = response {
            return Err(MemoryError::new(kind, message));
        }

        if let Handle::Connection(id) = handle {
            match sql.trim().to_ascii_uppercase().as_str() {
                "BEGIN" => {
                    self.pending.insert(id, Vec::new());
                    return Ok(Vec::new());
                }
                "COMMIT" => {
                    let work = self.pending.remove(&id).unwrap_or_default();
                    self.committed.extend(work);
                    return Ok(Vec::new());
                }
                "ROLLBACK" => {
                    self.pending.remove(&id);
                    return Ok(Vec::new());
                }
                _ => {}
            }
        }

        let rows = match response {
            Some(Response::Rows(rows)) => rows,
            _ if sql.trim().eq_ignore_ascii_case(PROBE_SQL) => vec![json!({ "?column?": 1 })],
            _ => Vec::new(),
        };

        match handle {
            Handle::Connection(id) if self.pending.contains_key(&id) => {
                if let Some(work) = self.pending.get_mut(&id) {
                    work.push(statement);
                }
            }
            _ => self.committed.push(statement),
        }

        Ok(rows.into_iter().map(MemoryRow).collect())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPool {
    id: usize,
    closed: Arc<AtomicBool>,
}

impl MemoryPool {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.is_closed() {
            Err(MemoryError::new(ErrorKind::Connection, "pool is closed"))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    pool: MemoryPool,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    backend: Arc<Mutex<Backend>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `sql` with `rows` (JSON objects).
    pub fn respond(&self, sql: impl Into<String>, rows: Vec<Value>) -> &Self {
        self.backend()
            .responses
            .insert(sql.into(), Response::Rows(rows));
        self
    }

    /// Fail `sql` with an error of `kind`.
    pub fn fail(&self, sql: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> &Self {
        self.backend()
            .responses
            .insert(sql.into(), Response::Fail(kind, message.into()));
        self
    }

    /// Make every later `open` fail with a connection error.
    pub fn refuse_connections(&self, message: impl Into<String>) -> &Self {
        self.backend().refuse_open = Some(message.into());
        self
    }

    pub fn accept_connections(&self) -> &Self {
        self.backend().refuse_open = None;
        self
    }

    /// Every statement the driver received, in order, including failures.
    pub fn executed(&self) -> Vec<Statement> {
        self.backend().executed.clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.backend().executed.iter().map(|s| s.sql.clone()).collect()
    }

    /// Statements whose effects are visible: autocommitted or committed.
    pub fn committed_sql(&self) -> Vec<String> {
        self.backend().committed.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn pools_opened(&self) -> usize {
        self.backend().pools_opened
    }

    /// Number of `close` calls, counted per call.
    pub fn pools_closed(&self) -> usize {
        self.backend().pools_closed
    }

    /// Connections currently reserved and not yet released or discarded.
    pub fn checked_out(&self) -> usize {
        self.backend().checked_out
    }

    pub fn discarded(&self) -> usize {
        self.backend().discarded
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Pool = MemoryPool;
    type Connection = MemoryConnection;
    type Row = MemoryRow;
    type Error = MemoryError;

    async fn open(&self, config: &DatabaseConfig) -> Result<MemoryPool, MemoryError> {
        let mut backend = self.backend();
        if let Some(message) = &backend.refuse_open {
            return Err(MemoryError::new(
                ErrorKind::Connection,
                format!("{message} ({})", config.redacted_uri()),
            ));
        }
        backend.pools_opened += 1;
        Ok(MemoryPool {
            id: backend.pools_opened,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn fetch_pool(
        &self,
        pool: &MemoryPool,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<MemoryRow>, MemoryError> {
        pool.ensure_open()?;
        self.backend().execute(Handle::Pool, sql, params)
    }

    async fn fetch_reserved(
        &self,
        conn: &mut MemoryConnection,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<MemoryRow>, MemoryError> {
        conn.pool.ensure_open()?;
        self.backend()
            .execute(Handle::Connection(conn.id), sql, params)
    }

    async fn reserve(&self, pool: &MemoryPool) -> Result<MemoryConnection, MemoryError> {
        pool.ensure_open()?;
        let mut backend = self.backend();
        backend.next_connection += 1;
        backend.checked_out += 1;
        Ok(MemoryConnection {
            id: backend.next_connection,
            pool: pool.clone(),
        })
    }

    fn release(&self, conn: MemoryConnection) {
        let mut backend = self.backend();
        backend.checked_out = backend.checked_out.saturating_sub(1);
        // returning a connection mid-transaction would leak its work
        backend.pending.remove(&conn.id);
    }

    fn discard(&self, conn: MemoryConnection) {
        let mut backend = self.backend();
        backend.checked_out = backend.checked_out.saturating_sub(1);
        backend.discarded += 1;
        backend.pending.remove(&conn.id);
    }

    async fn close(&self, pool: &MemoryPool) {
        self.close_detached(pool.clone());
    }

    fn close_detached(&self, pool: MemoryPool) {
        pool.closed.store(true, Ordering::SeqCst);
        self.backend().pools_closed += 1;
    }

    fn classify(&self, error: &MemoryError) -> ErrorKind {
        error.kind
    }
}
