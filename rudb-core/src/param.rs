//! Positional bind parameters passed verbatim to the driver.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One positional parameter (`$1`, `$2`, ...).
///
/// [`Param::Null`] carries no type; the server infers it from where the
/// placeholder is used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Param {
    pub fn is_null(&self) -> bool {
        matches!(self, Param::Null)
    }

    /// Parse a CLI-style literal: `null`, booleans, integers, finite floats,
    /// otherwise text. Quote with single quotes to force text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
            return Param::Text(trimmed[1..trimmed.len() - 1].to_string());
        }
        match trimmed {
            "null" | "NULL" => Param::Null,
            "true" => Param::Bool(true),
            "false" => Param::Bool(false),
            _ => {
                if let Ok(v) = trimmed.parse::<i32>() {
                    Param::Int(v)
                } else if let Ok(v) = trimmed.parse::<i64>() {
                    Param::BigInt(v)
                } else if let Some(v) = trimmed.parse::<f64>().ok().filter(|v| v.is_finite()) {
                    Param::Float(v)
                } else {
                    Param::Text(raw.to_string())
                }
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(value: $ty) -> Self {
                    Param::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Param::Text(value.clone())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Param::Null, Into::into)
    }
}

/// Build a `Vec<Param>` from heterogeneous values.
///
/// ```
/// use rudb_core::{params, Param};
///
/// let params = params![1, "john.doe@email.com", None::<i64>];
/// assert_eq!(params[1], Param::Text("john.doe@email.com".into()));
/// assert!(params[2].is_null());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Param>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Param::from($value)),+]
    };
}
