//! Quoting primitives. Every identifier and every literal spliced into statement text
//! passes through this module.

use crate::{errors::LabelGraphError, types::SqlValue};

const DELIMITER: char = '"';

/// Wraps `name` in double quotes for direct interpolation into a statement.
///
/// A `"` inside the name is accepted only when already doubled (`""`); a lone
/// delimiter, an empty name or a NUL character is rejected.
pub fn quote_identifier(name: &str) -> Result<String, LabelGraphError> {
    if name.is_empty() {
        return Err(LabelGraphError::invalid_identifier(name, "identifier is empty"));
    }
    if name.contains('\0') {
        return Err(LabelGraphError::invalid_identifier(name, "identifier contains NUL"));
    }
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == DELIMITER {
            if chars.peek() == Some(&DELIMITER) {
                chars.next();
            } else {
                return Err(LabelGraphError::invalid_identifier(
                    name,
                    "unescaped quote delimiter",
                ));
            }
        }
    }
    Ok(format!("{DELIMITER}{name}{DELIMITER}"))
}

/// Renders a value as a SQL literal, for the few places (DDL defaults, backfills)
/// where the backend cannot bind a parameter.
pub fn escape_literal(value: &SqlValue) -> Result<String, LabelGraphError> {
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Integer(i) => Ok(i.to_string()),
        SqlValue::Real(f) => {
            if !f.is_finite() {
                return Err(LabelGraphError::invalid_literal(format!("non-finite real {f}")));
            }
            // Debug keeps a decimal point so SQLite reads the literal back as REAL.
            Ok(format!("{f:?}"))
        }
        SqlValue::Text(s) => {
            if s.contains('\0') {
                return Err(LabelGraphError::invalid_literal("text literal contains NUL"));
            }
            Ok(format!("'{}'", s.replace('\'', "''")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn identifiers_are_always_wrapped() {
        assert_eq!(quote_identifier("Person").unwrap(), "\"Person\"");
        assert_eq!(quote_identifier("first name").unwrap(), "\"first name\"");
        assert_eq!(quote_identifier("a\"\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn lone_delimiters_are_rejected() {
        for bad in ["a\"b", "\"", "x\"\"\"", "", "nul\0"] {
            let err = quote_identifier(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{bad:?}");
        }
    }

    #[test]
    fn literals_escape_quotes() {
        let text = |s: &str| escape_literal(&SqlValue::Text(s.to_string()));
        assert_eq!(text("O'Brien").unwrap(), "'O''Brien'");
        assert_eq!(escape_literal(&SqlValue::Integer(-7)).unwrap(), "-7");
        assert_eq!(escape_literal(&SqlValue::Real(2.0)).unwrap(), "2.0");
        assert_eq!(escape_literal(&SqlValue::Null).unwrap(), "NULL");
        assert!(escape_literal(&SqlValue::Real(f64::NAN)).is_err());
        assert!(text("a\0b").is_err());
    }
}
