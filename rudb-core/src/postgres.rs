//! PostgreSQL driver backed by sqlx.
//!
//! Uses sqlx `PgPool` with explicit connection limits and timeouts taken
//! from [`DatabaseConfig`]. Failures are sorted by SQLSTATE class.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::{Oid, PgInterval, PgTimeTz};
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgTypeInfo,
};
use sqlx::query::Query;
use sqlx::types::Decimal;
use sqlx::{Column, Decode, Encode, PgPool, Postgres, Row, Type, TypeInfo, ValueRef};
use tracing::warn;

use crate::client::Client;
use crate::config::DatabaseConfig;
use crate::driver::{Driver, FromDbRow};
use crate::error::{BoxError, ErrorKind};
use crate::param::Param;

pub const APPLICATION_NAME: &str = "rudb";

/// Client over a PostgreSQL pool
pub type PgClient = Client<PgDriver>;

impl Client<PgDriver> {
    pub fn postgres(config: DatabaseConfig) -> Self {
        Client::new(PgDriver, config)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

/// Connection options for `config`.
///
/// The schema token becomes the session `search_path`; statement and
/// idle-in-transaction timeouts are sent as session settings.
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let mut session: Vec<(&str, String)> = Vec::new();
    if let Some(schema) = &config.schema {
        session.push(("search_path", schema.clone()));
    }
    if let Some(ms) = config.statement_timeout_ms {
        session.push(("statement_timeout", ms.to_string()));
    }
    if let Some(ms) = config.idle_in_transaction_timeout_ms {
        session.push(("idle_in_transaction_session_timeout", ms.to_string()));
    }

    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .application_name(APPLICATION_NAME)
        .options(session)
}

pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections())
        .acquire_timeout(config.connection_timeout())
        .idle_timeout(config.idle_timeout())
        .test_before_acquire(config.keep_alive)
}

/// NULL sent with an unspecified type (OID 0) so the server infers it from
/// the placeholder's context.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Param],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Null => query.bind(UntypedNull),
            Param::Bool(v) => query.bind(*v),
            Param::Int(v) => query.bind(*v),
            Param::BigInt(v) => query.bind(*v),
            Param::Float(v) => query.bind(*v),
            Param::Text(v) => query.bind(v.as_str()),
            Param::Bytes(v) => query.bind(v.as_slice()),
            Param::Uuid(v) => query.bind(*v),
            Param::Timestamp(v) => query.bind(*v),
            Param::Json(v) => query.bind(sqlx::types::Json(v)),
        };
    }
    query
}

#[async_trait]
impl Driver for PgDriver {
    type Pool = PgPool;
    type Connection = PoolConnection<Postgres>;
    type Row = PgRow;
    type Error = sqlx::Error;

    async fn open(&self, config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
        pool_options(config)
            .connect_with(connect_options(config))
            .await
    }

    async fn fetch_pool(
        &self,
        pool: &PgPool,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<PgRow>, sqlx::Error> {
        bind_params(sqlx::query(sql), params).fetch_all(pool).await
    }

    async fn fetch_reserved(
        &self,
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[Param],
    ) -> Result<Vec<PgRow>, sqlx::Error> {
        bind_params(sqlx::query(sql), params)
            .fetch_all(&mut **conn)
            .await
    }

    async fn reserve(&self, pool: &PgPool) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        pool.acquire().await
    }

    fn release(&self, conn: PoolConnection<Postgres>) {
        drop(conn);
    }

    fn discard(&self, conn: PoolConnection<Postgres>) {
        // Closing the socket makes the server abort whatever is still open.
        drop(conn.detach());
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
    }

    fn close_detached(&self, pool: PgPool) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { pool.close().await });
            }
            Err(_) => warn!("no runtime to close the pool on; dropping the handle"),
        }
    }

    fn classify(&self, error: &sqlx::Error) -> ErrorKind {
        classify_error(error)
    }
}

pub fn classify_error(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| classify_sqlstate(&code))
            .unwrap_or(ErrorKind::Unexpected),
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
            ErrorKind::Network
        }
        sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => ErrorKind::Connection,
        _ => ErrorKind::Unexpected,
    }
}

/// Map a SQLSTATE code to an [`ErrorKind`].
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        // query_canceled: statement timeout or cancel request
        "57014" => ErrorKind::Network,
        // invalid_catalog_name, too_many_connections, shutdown family,
        // idle_in_transaction_session_timeout
        "3D000" | "53300" | "57P01" | "57P02" | "57P03" | "25P03" => ErrorKind::Connection,
        c if c.starts_with("08") || c.starts_with("28") => ErrorKind::Connection,
        c if c.starts_with("42") => ErrorKind::Syntax,
        _ => ErrorKind::Unexpected,
    }
}

impl<T> FromDbRow<PgRow> for T
where
    T: for<'r> sqlx::FromRow<'r, PgRow>,
{
    fn from_db_row(row: &PgRow) -> Result<Self, BoxError> {
        T::from_row(row).map_err(Into::into)
    }
}

/// Any PostgreSQL row as a JSON object keyed by column name.
///
/// NUMERIC becomes a string so no precision is lost, INTERVAL an ISO 8601
/// duration and BYTEA a `\x` hex string. Types without a JSON mapping
/// decode to a `"<unsupported TYPE>"` marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JsonRow(pub Map<String, Value>);

impl JsonRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for JsonRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mut map = Map::new();
        for column in row.columns() {
            let value = decode_column(row, column.ordinal(), column.type_info().name())?;
            map.insert(column.name().to_string(), value);
        }
        Ok(JsonRow(map))
    }
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::from(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "OID" => Value::from(row.try_get::<Oid, _>(index)?.0),
        "FLOAT4" => Value::from(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(index)?),
        "NUMERIC" => Value::from(row.try_get::<Decimal, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            Value::from(row.try_get::<String, _>(index)?)
        }
        "BYTEA" => Value::from(hex_bytes(&row.try_get::<Vec<u8>, _>(index)?)),
        "UUID" => Value::from(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "TIMESTAMPTZ" => Value::from(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::from(row.try_get::<chrono::NaiveDateTime, _>(index)?.to_string()),
        "DATE" => Value::from(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::from(row.try_get::<chrono::NaiveTime, _>(index)?.to_string()),
        "TIMETZ" => {
            let value = row.try_get::<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>, _>(index)?;
            Value::from(format!("{}{}", value.time, value.offset))
        }
        "INTERVAL" => Value::from(iso8601_interval(&row.try_get::<PgInterval, _>(index)?)),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "BOOL[]" => decode_array::<bool>(row, index, Value::from)?,
        "INT2[]" => decode_array::<i16>(row, index, Value::from)?,
        "INT4[]" => decode_array::<i32>(row, index, Value::from)?,
        "INT8[]" => decode_array::<i64>(row, index, Value::from)?,
        "FLOAT4[]" => decode_array::<f32>(row, index, |v| Value::from(f64::from(v)))?,
        "FLOAT8[]" => decode_array::<f64>(row, index, Value::from)?,
        "NUMERIC[]" => decode_array::<Decimal>(row, index, |v| Value::from(v.to_string()))?,
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            decode_array::<String>(row, index, Value::from)?
        }
        "UUID[]" => decode_array::<uuid::Uuid>(row, index, |v| Value::from(v.to_string()))?,
        other => Value::from(format!("<unsupported {other}>")),
    };
    Ok(value)
}

/// One-dimensional array; NULL elements stay `null`.
fn decode_array<T>(
    row: &PgRow,
    index: usize,
    to_json: impl Fn(T) -> Value,
) -> Result<Value, sqlx::Error>
where
    Vec<Option<T>>: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    let items = row.try_get::<Vec<Option<T>>, _>(index)?;
    Ok(Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(Value::Null, &to_json))
            .collect(),
    ))
}

/// `P{months}M{days}DT{seconds}S`, keeping PostgreSQL's three separate fields.
fn iso8601_interval(interval: &PgInterval) -> String {
    let sign = if interval.microseconds < 0 { "-" } else { "" };
    let micros = interval.microseconds.unsigned_abs();
    let (whole, fraction) = (micros / 1_000_000, micros % 1_000_000);
    let seconds = if fraction == 0 {
        whole.to_string()
    } else {
        let fraction = format!("{fraction:06}");
        format!("{whole}.{}", fraction.trim_end_matches('0'))
    };
    format!("P{}M{}DT{sign}{seconds}S", interval.months, interval.days)
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
