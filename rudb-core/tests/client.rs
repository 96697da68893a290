use rudb_core::memory::Handle;
use rudb_core::{
    params, Cardinality, DatabaseConfig, DbError, ErrorKind, MemoryClient, MemoryDriver,
};
use serde::Deserialize;
use serde_json::json;

const USERS_SQL: &str = "select id, name from ru.user";

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: i64,
    name: String,
}

fn client_with(driver: &MemoryDriver) -> MemoryClient {
    let config = DatabaseConfig::new("localhost", 5432, "ru", "secret", "ru").with_schema("ru");
    MemoryClient::new(driver.clone(), config)
}

async fn connected(rows: Vec<serde_json::Value>) -> (MemoryDriver, MemoryClient) {
    let driver = MemoryDriver::new();
    driver.respond(USERS_SQL, rows);
    let client = client_with(&driver);
    client.connect().await.unwrap();
    (driver, client)
}

fn users(n: i64) -> Vec<serde_json::Value> {
    (1..=n)
        .map(|id| json!({ "id": id, "name": format!("user-{id}") }))
        .collect()
}

#[tokio::test]
async fn test_connect_probes_the_pool() {
    let driver = MemoryDriver::new();
    let client = client_with(&driver);
    assert!(client.is_not_connected());

    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(driver.pools_opened(), 1);
    assert_eq!(driver.executed_sql(), vec!["select 1"]);
}

#[tokio::test]
async fn test_connection_uri_uses_schema_as_scheme() {
    let driver = MemoryDriver::new();
    let client = client_with(&driver);
    assert_eq!(client.connection_uri(), "ru://ru:secret@localhost:5432/ru");

    let plain = MemoryClient::new(driver, DatabaseConfig::new("db", 6543, "a", "b", "c"));
    assert_eq!(plain.connection_uri(), "postgresql://a:b@db:6543/c");
}

#[tokio::test]
async fn test_refused_connection_stays_disconnected() {
    let driver = MemoryDriver::new();
    driver.refuse_connections("connection refused");
    let client = client_with(&driver);

    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(client.is_not_connected());

    driver.accept_connections();
    client.connect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_failed_probe_is_a_connection_error() {
    let driver = MemoryDriver::new();
    driver.fail("select 1", ErrorKind::Network, "server closed the connection");
    let client = client_with(&driver);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection());
    assert!(client.is_not_connected());
}

#[tokio::test]
async fn test_query_before_connect_never_reaches_driver() {
    let driver = MemoryDriver::new();
    let client = client_with(&driver);

    let err = client.query_any::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection error: connection not established");
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn test_query_none() {
    let (_, client) = connected(vec![]).await;
    client.query_none(USERS_SQL, &[]).await.unwrap();

    let (_, client) = connected(users(1)).await;
    let err = client.query_none(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryResult);
    assert_eq!(err.to_string(), "No return data was expected.");
}

#[tokio::test]
async fn test_query_one() {
    let (_, client) = connected(users(1)).await;
    let user: User = client.query_one(USERS_SQL, &[]).await.unwrap();
    assert_eq!(
        user,
        User {
            id: 1,
            name: "user-1".into()
        }
    );

    let (_, client) = connected(vec![]).await;
    let err = client.query_one::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "No data returned from the query.");

    let (_, client) = connected(users(3)).await;
    let err = client.query_one::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Multiple rows were not expected.");
}

#[tokio::test]
async fn test_query_one_or_none() {
    let (_, client) = connected(vec![]).await;
    let user = client.query_one_or_none::<User>(USERS_SQL, &[]).await.unwrap();
    assert!(user.is_none());

    let (_, client) = connected(users(1)).await;
    let user = client.query_one_or_none::<User>(USERS_SQL, &[]).await.unwrap();
    assert_eq!(user.map(|u| u.id), Some(1));

    let (_, client) = connected(users(2)).await;
    let err = client
        .query_one_or_none::<User>(USERS_SQL, &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Multiple rows were not expected.");
}

#[tokio::test]
async fn test_query_one_or_many() {
    let (_, client) = connected(vec![]).await;
    let err = client
        .query_one_or_many::<User>(USERS_SQL, &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No data returned from the query.");

    let (_, client) = connected(users(3)).await;
    let all = client.query_one_or_many::<User>(USERS_SQL, &[]).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].name, "user-3");
}

#[tokio::test]
async fn test_query_any() {
    let (_, client) = connected(vec![]).await;
    assert!(client.query_any::<User>(USERS_SQL, &[]).await.unwrap().is_empty());

    let (_, client) = connected(users(4)).await;
    assert_eq!(client.query_any::<User>(USERS_SQL, &[]).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_affected_rows_tracks_last_query() {
    let (driver, client) = connected(users(3)).await;
    assert_eq!(client.affected_rows(), 0);

    client.query_any::<User>(USERS_SQL, &[]).await.unwrap();
    assert_eq!(client.affected_rows(), 3);

    // recorded even when the cardinality check fails
    client.query_none(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(client.affected_rows(), 3);

    driver.respond("delete from ru.user", vec![]);
    client.query_none("delete from ru.user", &[]).await.unwrap();
    assert_eq!(client.affected_rows(), 0);
}

#[tokio::test]
async fn test_params_reach_the_driver() {
    let (driver, client) = connected(users(1)).await;
    client
        .query_one::<User>(USERS_SQL, &params![1, "john.doe@email.com"])
        .await
        .unwrap();

    let last = driver.executed().pop().unwrap();
    assert_eq!(last.sql, USERS_SQL);
    assert_eq!(last.params, params![1, "john.doe@email.com"]);
    assert_eq!(last.handle, Handle::Pool);
}

#[tokio::test]
async fn test_driver_errors_are_classified() {
    let (driver, client) = connected(vec![]).await;
    driver
        .fail("selec 1", ErrorKind::Syntax, "syntax error at or near \"selec\"")
        .fail("select pg_sleep(60)", ErrorKind::Network, "canceling statement")
        .fail("insert dup", ErrorKind::Unexpected, "duplicate key value");

    let err = client.query_none("selec 1", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Syntax { .. }));

    let err = client.query_none("select pg_sleep(60)", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Network { .. }));

    let err = client.query_none("insert dup", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Unexpected { .. }));
    assert!(err.to_string().contains("duplicate key value"));
}

#[tokio::test]
async fn test_undecodable_row_is_unexpected() {
    let (_, client) = connected(vec![json!({ "id": "not-a-number", "name": "x" })]).await;
    let err = client.query_one::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unexpected);
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let (driver, client) = connected(users(3)).await;
    client.query_any::<User>(USERS_SQL, &[]).await.unwrap();
    assert_eq!(client.affected_rows(), 3);

    client.disconnect();
    assert_eq!(client.affected_rows(), 0);
    client.disconnect();
    assert!(client.is_not_connected());
    let err = client.query_any::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert!(err.is_connection());

    client.connect().await.unwrap();
    assert_eq!(driver.pools_opened(), 2);
    // the pool kept across disconnect is closed once its successor is live
    assert_eq!(driver.pools_closed(), 1);
    assert_eq!(client.query_any::<User>(USERS_SQL, &[]).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_release_is_terminal() {
    let (driver, client) = connected(users(1)).await;

    client.release().await;
    assert!(client.is_released());
    assert_eq!(driver.pools_closed(), 1);
    assert!(client.is_not_connected());

    let err = client.query_any::<User>(USERS_SQL, &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection error: client has been released");

    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection());

    // second release is a no-op
    client.release().await;
    assert_eq!(driver.pools_closed(), 1);
}

#[tokio::test]
async fn test_release_without_connect() {
    let driver = MemoryDriver::new();
    let client = client_with(&driver);
    client.release().await;
    assert!(client.is_released());
    assert_eq!(driver.pools_opened(), 0);
}

#[tokio::test]
async fn test_generic_query_with_declared_cardinality() {
    let (_, client) = connected(users(2)).await;
    let rows: Vec<serde_json::Value> = client
        .query(USERS_SQL, &[], Cardinality::OneOrMany)
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], "user-1");

    let err = client
        .query::<serde_json::Value>(USERS_SQL, &[], Cardinality::One)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryResult);
}

#[tokio::test]
async fn test_debug_logging_does_not_change_results() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let driver = MemoryDriver::new();
    driver.respond(USERS_SQL, users(2));
    let config = DatabaseConfig::new("localhost", 5432, "ru", "secret", "ru").with_debug(true);
    let client = MemoryClient::new(driver, config);
    client.connect().await.unwrap();

    let all = client.query_any::<User>(USERS_SQL, &params![1]).await.unwrap();
    assert_eq!(all.len(), 2);
}
