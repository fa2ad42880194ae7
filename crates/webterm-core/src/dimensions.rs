//! Terminal dimensions and request-input validation.
//!
//! Query parameters arrive as raw strings; everything here turns them into
//! typed values or a [`TermError::Validation`] carrying the message that is
//! returned to the client verbatim.

use crate::error::{TermError, TermResult};
use serde::{Deserialize, Serialize};

/// Size of a terminal in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Dimensions {
    /// Build dimensions, rejecting zero in either axis.
    pub fn new(cols: u16, rows: u16) -> TermResult<Self> {
        if cols == 0 {
            return Err(positive_integer("cols"));
        }
        if rows == 0 {
            return Err(positive_integer("rows"));
        }
        Ok(Self { cols, rows })
    }

    /// Parse `cols` and `rows` query parameters.
    ///
    /// Both must be present and parse as integers in `1..=65535`.
    pub fn parse(cols: Option<&str>, rows: Option<&str>) -> TermResult<Self> {
        let (cols, rows) = match (cols, rows) {
            (Some(c), Some(r)) if !c.is_empty() && !r.is_empty() => (c, r),
            _ => {
                return Err(TermError::Validation(
                    "`cols` and `rows` are required".into(),
                ))
            }
        };

        let cols = parse_axis("cols", cols)?;
        let rows = parse_axis("rows", rows)?;
        Self::new(cols, rows)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

fn parse_axis(name: &str, value: &str) -> TermResult<u16> {
    value.trim().parse::<u16>().map_err(|_| positive_integer(name))
}

fn positive_integer(name: &str) -> TermError {
    TermError::Validation(format!("`{name}` must be parsable as a positive integer"))
}

/// Parse a session identifier from a path segment.
pub fn parse_session_id(raw: &str) -> TermResult<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| TermError::Validation("`pid` must be parsable as integer".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: TermError) -> String {
        match err {
            TermError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn parses_valid_pair() {
        let dims = Dimensions::parse(Some("80"), Some("24")).unwrap();
        assert_eq!(dims, Dimensions { cols: 80, rows: 24 });
        assert_eq!(dims.to_string(), "80x24");
    }

    #[test]
    fn missing_values_are_required() {
        for (c, r) in [(None, Some("24")), (Some("80"), None), (Some(""), Some("24"))] {
            let err = Dimensions::parse(c, r).unwrap_err();
            assert_eq!(message(err), "`cols` and `rows` are required");
        }
    }

    #[test]
    fn rejects_non_numeric_cols() {
        let err = Dimensions::parse(Some("x"), Some("24")).unwrap_err();
        assert_eq!(message(err), "`cols` must be parsable as a positive integer");
    }

    #[test]
    fn rejects_zero_negative_and_overflowing_rows() {
        for rows in ["0", "-3", "70000"] {
            let err = Dimensions::parse(Some("80"), Some(rows)).unwrap_err();
            assert_eq!(message(err), "`rows` must be parsable as a positive integer");
        }
    }

    #[test]
    fn session_id_must_be_integer() {
        assert_eq!(parse_session_id("4242").unwrap(), 4242);
        let err = parse_session_id("abc").unwrap_err();
        assert_eq!(message(err), "`pid` must be parsable as integer");
    }

    #[test]
    fn dimensions_serialize_as_object() {
        let json = serde_json::to_string(&Dimensions { cols: 100, rows: 40 }).unwrap();
        assert_eq!(json, r#"{"cols":100,"rows":40}"#);
    }
}
