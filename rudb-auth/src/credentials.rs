use async_trait::async_trait;
use rudb_core::{params, Client, Driver, FromDbRow};
use serde::Deserialize;
use tracing::debug;

use crate::error::CredentialsError;

pub const PASSWORD_BY_EMAIL_SQL: &str = "select password from ru.user where email=$1";

#[async_trait]
pub trait UserCredentialsValidator {
    /// `Ok(true)` only when `email` exists and its stored password matches.
    async fn sign_in(&self, email: &str, password: &str) -> Result<bool, CredentialsError>;
}

/// Row shape of [`PASSWORD_BY_EMAIL_SQL`]
#[derive(Debug, sqlx::FromRow, Deserialize)]
pub struct PasswordRecord {
    pub password: String,
}

/// Compares the supplied password with the one stored in `ru.user`.
pub struct DatabaseUserCredentials<'a, D: Driver> {
    client: &'a Client<D>,
}

impl<'a, D: Driver> DatabaseUserCredentials<'a, D> {
    pub fn new(client: &'a Client<D>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a, D> UserCredentialsValidator for DatabaseUserCredentials<'a, D>
where
    D: Driver,
    PasswordRecord: FromDbRow<D::Row>,
{
    async fn sign_in(&self, email: &str, password: &str) -> Result<bool, CredentialsError> {
        let record: Option<PasswordRecord> = self
            .client
            .query_one_or_none(PASSWORD_BY_EMAIL_SQL, &params![email])
            .await?;

        match record {
            Some(record) => Ok(record.password == password),
            None => {
                debug!(email, "no account for e-mail");
                Ok(false)
            }
        }
    }
}
