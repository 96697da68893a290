//! Row-cardinality contracts checked after every query.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How many rows a query is allowed to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly zero rows
    None,
    /// Exactly one row
    One,
    /// Zero or one row
    OneOrNone,
    /// At least one row
    OneOrMany,
    /// Any number of rows, including zero
    Any,
}

impl Cardinality {
    pub const ALL: [Cardinality; 5] = [
        Cardinality::None,
        Cardinality::One,
        Cardinality::OneOrNone,
        Cardinality::OneOrMany,
        Cardinality::Any,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::None => "none",
            Cardinality::One => "one",
            Cardinality::OneOrNone => "one-or-none",
            Cardinality::OneOrMany => "one-or-many",
            Cardinality::Any => "any",
        }
    }

    pub fn accepts(&self, rows: usize) -> bool {
        match self {
            Cardinality::None => rows == 0,
            Cardinality::One => rows == 1,
            Cardinality::OneOrNone => rows <= 1,
            Cardinality::OneOrMany => rows >= 1,
            Cardinality::Any => true,
        }
    }

    /// Check `rows` against this expectation.
    pub fn validate(self, rows: usize) -> Result<(), CardinalityError> {
        if self.accepts(rows) {
            Ok(())
        } else {
            Err(CardinalityError {
                expected: self,
                received: rows,
            })
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the five names of [`Cardinality::as_str`], ignoring case.
impl FromStr for Cardinality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cardinality::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown cardinality '{s}' (expected none, one, one-or-none, one-or-many or any)"
                )
            })
    }
}

/// A result whose row count broke its [`Cardinality`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", self.describe())]
pub struct CardinalityError {
    pub expected: Cardinality,
    pub received: usize,
}

impl CardinalityError {
    pub fn describe(&self) -> &'static str {
        match (self.expected, self.received) {
            (Cardinality::None, _) => "No return data was expected.",
            (_, 0) => "No data returned from the query.",
            _ => "Multiple rows were not expected.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table() {
        use Cardinality::*;
        let cases = [
            (None, [true, false, false, false]),
            (One, [false, true, false, false]),
            (OneOrNone, [true, true, false, false]),
            (OneOrMany, [false, true, true, true]),
            (Any, [true, true, true, true]),
        ];

        for (expectation, accepted) in cases {
            for (rows, ok) in [0usize, 1, 2, 5].into_iter().zip(accepted) {
                assert_eq!(
                    expectation.validate(rows).is_ok(),
                    ok,
                    "{expectation} with {rows} rows"
                );
            }
        }
    }

    #[test]
    fn test_messages() {
        let msg = |c: Cardinality, n| c.validate(n).unwrap_err().to_string();

        assert_eq!(msg(Cardinality::None, 1), "No return data was expected.");
        assert_eq!(msg(Cardinality::One, 0), "No data returned from the query.");
        assert_eq!(msg(Cardinality::One, 3), "Multiple rows were not expected.");
        assert_eq!(msg(Cardinality::OneOrNone, 2), "Multiple rows were not expected.");
        assert_eq!(msg(Cardinality::OneOrMany, 0), "No data returned from the query.");
    }

    #[test]
    fn test_parse() {
        assert_eq!("ONE-OR-MANY".parse::<Cardinality>(), Ok(Cardinality::OneOrMany));
        for unknown in ["several", "many", "oneornone", "oneormany", "one_or_none"] {
            assert!(unknown.parse::<Cardinality>().is_err(), "{unknown}");
        }
        for c in Cardinality::ALL {
            assert_eq!(c.as_str().parse::<Cardinality>(), Ok(c));
        }
    }
}
