use async_trait::async_trait;
use rudb_core::{params, Client, Driver, FromDbRow};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

pub const USER_BY_EMAIL_SQL: &str = "select id,name,email from ru.user where email=$1";

/// Account record from `ru.user`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(id: i32, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }
}

#[async_trait]
pub trait LoadUser {
    /// `Ok(None)` when no account uses `email`.
    async fn load_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
}

/// User repository
pub struct UserAccountRepository<'a, D: Driver> {
    client: &'a Client<D>,
}

impl<'a, D: Driver> UserAccountRepository<'a, D> {
    pub fn new(client: &'a Client<D>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a, D> LoadUser for UserAccountRepository<'a, D>
where
    D: Driver,
    User: FromDbRow<D::Row>,
{
    async fn load_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = self
            .client
            .query_one_or_none(USER_BY_EMAIL_SQL, &params![email])
            .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudb_core::{DatabaseConfig, DbError, ErrorKind, MemoryClient, MemoryDriver};
    use serde_json::json;

    async fn connected(driver: &MemoryDriver) -> MemoryClient {
        let client = MemoryClient::new(driver.clone(), DatabaseConfig::default());
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_load_existing_user() {
        let driver = MemoryDriver::new();
        driver.respond(
            USER_BY_EMAIL_SQL,
            vec![json!({ "id": 1, "name": "John Doe", "email": "john.doe@email.com" })],
        );
        let client = connected(&driver).await;
        let repo = UserAccountRepository::new(&client);

        let user = repo.load_by_email("john.doe@email.com").await.unwrap();
        assert_eq!(user, Some(User::new(1, "John Doe", "john.doe@email.com")));
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let driver = MemoryDriver::new();
        let client = connected(&driver).await;
        let repo = UserAccountRepository::new(&client);

        assert_eq!(repo.load_by_email("nobody@email.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_carries_cause() {
        let driver = MemoryDriver::new();
        driver.fail(USER_BY_EMAIL_SQL, ErrorKind::Syntax, "relation \"ru.user\" does not exist");
        let client = connected(&driver).await;
        let repo = UserAccountRepository::new(&client);

        let err = repo.load_by_email("john.doe@email.com").await.unwrap_err();
        assert!(matches!(err.cause(), DbError::Syntax { .. }));
    }

    #[tokio::test]
    async fn test_disconnected_client() {
        let driver = MemoryDriver::new();
        let client = MemoryClient::new(driver, DatabaseConfig::default());
        let repo = UserAccountRepository::new(&client);

        let err = repo.load_by_email("john.doe@email.com").await.unwrap_err();
        assert!(err.cause().is_connection());
    }
}
