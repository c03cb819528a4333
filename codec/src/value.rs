//! Column values and their canonical SQL literal form.
//!
//! Every value read from a table crosses into the dump as a [`SqlValue`], a
//! closed enum over SQLite's five storage classes. Formatting is total and
//! type-stable: the same value always renders to the same literal, and the
//! literal parses back into the same storage class.

use std::fmt;

use rusqlite::types::ValueRef;

use crate::error::FilterError;

/// An owned SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL value.
    Null,
    /// 64-bit signed integer (SQLite INTEGER).
    Integer(i64),
    /// 64-bit IEEE floating point (SQLite REAL).
    Real(f64),
    /// UTF-8 string (SQLite TEXT).
    Text(String),
    /// Raw bytes (SQLite BLOB).
    Blob(Vec<u8>),
}

impl<'a> TryFrom<ValueRef<'a>> for SqlValue {
    type Error = FilterError;

    fn try_from(value: ValueRef<'a>) -> Result<Self, Self::Error> {
        match value {
            ValueRef::Null => Ok(SqlValue::Null),
            ValueRef::Integer(i) => Ok(SqlValue::Integer(i)),
            ValueRef::Real(f) => Ok(SqlValue::Real(f)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| SqlValue::Text(s.to_string()))
                .map_err(|e| {
                    FilterError::Serialization(format!("TEXT value is not valid UTF-8: {e}"))
                }),
            ValueRef::Blob(bytes) => Ok(SqlValue::Blob(bytes.to_vec())),
        }
    }
}

impl SqlValue {
    /// Renders the value as an SQL literal.
    ///
    /// With `float_precision` set, REAL values are rounded to that many
    /// fractional digits before trailing zeros are trimmed.
    pub fn to_literal(&self, float_precision: Option<u32>) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => format_real(*f, float_precision),
            SqlValue::Text(s) => quote_text(s),
            SqlValue::Blob(bytes) => format_blob(bytes),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal(None))
    }
}

/// Formats a REAL so that it always reads back as REAL.
///
/// The shortest round-trip representation is used unless a precision is
/// requested. The output always contains `.` or an exponent, so SQLite never
/// re-parses it as an INTEGER.
pub(crate) fn format_real(value: f64, precision: Option<u32>) -> String {
    if value.is_nan() {
        // SQLite stores NaN as NULL; nothing else can reach here.
        return "NULL".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "1e999" } else { "-1e999" }.to_string();
    }

    match precision {
        Some(digits) => {
            let fixed = format!("{value:.prec$}", prec = digits as usize);
            let trimmed = if fixed.contains('.') {
                fixed.trim_end_matches('0').trim_end_matches('.')
            } else {
                fixed.as_str()
            };
            if trimmed.contains('.') {
                trimmed.to_string()
            } else {
                format!("{trimmed}.0")
            }
        }
        None => format!("{value:?}"),
    }
}

pub(crate) fn quote_text(text: &str) -> String {
    if text.contains('\0') {
        // The engine stops reading SQL at a NUL byte; send the bytes as hex.
        return format!("CAST({} AS TEXT)", format_blob(text.as_bytes()));
    }
    format!("'{}'", text.replace('\'', "''"))
}

fn format_blob(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("X'");
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\'');
    out
}

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_integers() {
        assert_eq!(SqlValue::Null.to_literal(None), "NULL");
        assert_eq!(SqlValue::Integer(0).to_literal(None), "0");
        assert_eq!(SqlValue::Integer(-42).to_literal(None), "-42");
        assert_eq!(
            SqlValue::Integer(1_000_000).to_literal(None),
            "1000000"
        );
        assert_eq!(
            SqlValue::Integer(i64::MIN).to_literal(None),
            "-9223372036854775808"
        );
    }

    #[test]
    fn test_real_keeps_decimal_point() {
        assert_eq!(SqlValue::Real(1.0).to_literal(None), "1.0");
        assert_eq!(SqlValue::Real(0.1).to_literal(None), "0.1");
        assert_eq!(SqlValue::Real(-2.5).to_literal(None), "-2.5");
        assert_eq!(SqlValue::Real(1e300).to_literal(None), "1e300");
    }

    #[test]
    fn test_real_infinities() {
        assert_eq!(SqlValue::Real(f64::INFINITY).to_literal(None), "1e999");
        assert_eq!(SqlValue::Real(f64::NEG_INFINITY).to_literal(None), "-1e999");
    }

    #[test]
    fn test_real_with_precision() {
        assert_eq!(format_real(3.14159265, Some(3)), "3.142");
        assert_eq!(format_real(2.50000, Some(4)), "2.5");
        assert_eq!(format_real(2.0, Some(4)), "2.0");
        assert_eq!(format_real(0.00001, Some(2)), "0.0");
        assert_eq!(format_real(7.0, Some(0)), "7.0");
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(SqlValue::Text("plain".into()).to_literal(None), "'plain'");
        assert_eq!(SqlValue::Text("it's".into()).to_literal(None), "'it''s'");
        assert_eq!(
            SqlValue::Text("a;\nb".into()).to_literal(None),
            "'a;\nb'"
        );
        assert_eq!(SqlValue::Text(String::new()).to_literal(None), "''");
    }

    #[test]
    fn test_text_with_nul_rendered_as_hex_cast() {
        assert_eq!(
            SqlValue::Text("a\0b".into()).to_literal(None),
            "CAST(X'610062' AS TEXT)"
        );

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let literal = SqlValue::Text("it's\0x".into()).to_literal(None);
        let back: String = conn
            .query_row(&format!("SELECT {literal}"), [], |row| row.get(0))
            .unwrap();
        assert_eq!(back, "it's\0x");
    }

    #[test]
    fn test_blob_hex() {
        assert_eq!(SqlValue::Blob(vec![]).to_literal(None), "X''");
        assert_eq!(
            SqlValue::Blob(vec![0x00, 0xab, 0xff]).to_literal(None),
            "X'00ABFF'"
        );
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(
            SqlValue::try_from(ValueRef::Text(b"hi")).unwrap(),
            SqlValue::Text("hi".into())
        );
        assert_eq!(
            SqlValue::try_from(ValueRef::Blob(&[1, 2])).unwrap(),
            SqlValue::Blob(vec![1, 2])
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_serialization_error() {
        let err = SqlValue::try_from(ValueRef::Text(&[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, FilterError::Serialization(_)));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
