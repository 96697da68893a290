//! Sign-in collaborators backed by the `ru.user` table.
//!
//! - [`DatabaseUserCredentials`] checks an e-mail/password pair
//! - [`UserAccountRepository`] loads the account behind an e-mail
//!
//! Both borrow a connected [`rudb_core::Client`] and translate its errors
//! into their own types.

pub mod credentials;
pub mod error;
pub mod user_account;

pub use credentials::{DatabaseUserCredentials, UserCredentialsValidator};
pub use error::{CredentialsError, RepositoryError};
pub use user_account::{LoadUser, User, UserAccountRepository};
