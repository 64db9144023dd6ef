//! Column type mapping and identifier checks.
//!
//! Callers describe tables with the Postgres type names the neurobooth
//! schema has always used (`SERIAL`, `VARCHAR (255)`, `text[]`, ...). This
//! module is the single place where those names are mapped onto the
//! declared types stored by the embedded engine.

use super::StoreError;

/// Declarative mapping from caller type names to declared column types.
///
/// Entries are matched case-insensitively against the whole type name.
/// Anything not listed is kept as written (upper-cased), which is valid for
/// `VARCHAR (n)`, `INTEGER`, `TIMESTAMP`, `DATE`, `REAL` and friends.
const TYPE_MAP: &[(&str, &str)] = &[
    // Auto-incrementing keys; see `is_serial`.
    ("SERIAL", "INTEGER"),
    ("BIGSERIAL", "INTEGER"),
    ("SMALLSERIAL", "INTEGER"),
    ("BOOL", "BOOLEAN"),
    ("CHARACTER VARYING", "VARCHAR"),
    ("JSONB", "JSON"),
    ("TIMESTAMPTZ", "TIMESTAMP"),
];

/// Postgres auto-incrementing key types.
const SERIAL_TYPES: &[&str] = &["SERIAL", "BIGSERIAL", "SMALLSERIAL"];

/// Returns `true` for the auto-incrementing key types.
///
/// A lone key column of such a type is declared
/// `INTEGER PRIMARY KEY AUTOINCREMENT` so deleted ids are never handed out
/// again.
pub fn is_serial(dtype: &str) -> bool {
    let upper = dtype.trim().to_ascii_uppercase();
    SERIAL_TYPES.contains(&upper.as_str())
}

/// Declared type used for array columns (`text[]`); values are JSON arrays.
pub const ARRAY_TYPE: &str = "JSON";

/// Maps a caller-supplied column type onto the declared type of the column.
///
/// # Errors
///
/// Returns [`StoreError::Schema`] if the type is empty or contains characters
/// that cannot appear in a column type.
pub fn sqlite_type(dtype: &str) -> Result<String, StoreError> {
    let normalized = dtype.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(StoreError::schema("column type must not be empty"));
    }
    if let Some(element) = normalized.strip_suffix("[]") {
        check_type_chars(element, dtype)?;
        return Ok(ARRAY_TYPE.to_string());
    }
    check_type_chars(&normalized, dtype)?;

    let upper = normalized.to_ascii_uppercase();
    let mapped = TYPE_MAP
        .iter()
        .find(|(from, _)| *from == upper)
        .map_or(upper.clone(), |(_, to)| (*to).to_string());
    Ok(mapped)
}

fn check_type_chars(candidate: &str, original: &str) -> Result<(), StoreError> {
    let ok = !candidate.trim().is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    if ok {
        Ok(())
    } else {
        Err(StoreError::schema(format!("invalid column type: {original:?}")))
    }
}

/// Returns `true` if `name` may be interpolated as a table or column name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks an identifier against the allow-list.
///
/// # Errors
///
/// Returns [`StoreError::Validation`] naming `kind` if the identifier is
/// rejected.
pub fn check_identifier(kind: &str, name: &str) -> Result<(), StoreError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(StoreError::validation(format!("invalid {kind} name: {name:?}")))
    }
}

/// Quotes a validated identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_maps_to_integer() {
        assert_eq!(sqlite_type("SERIAL").unwrap(), "INTEGER");
        assert_eq!(sqlite_type("serial").unwrap(), "INTEGER");
        assert!(is_serial("bigserial"));
        assert!(is_serial(" SERIAL "));
        assert!(!is_serial("INTEGER"));
    }

    #[test]
    fn test_array_maps_to_json() {
        assert_eq!(sqlite_type("text[]").unwrap(), ARRAY_TYPE);
        assert_eq!(sqlite_type("VARCHAR (255)[]").unwrap(), ARRAY_TYPE);
    }

    #[test]
    fn test_varchar_keeps_length() {
        assert_eq!(sqlite_type("VARCHAR (255)").unwrap(), "VARCHAR (255)");
        assert_eq!(sqlite_type("varchar   (10)").unwrap(), "VARCHAR (10)");
    }

    #[test]
    fn test_rejects_injection_in_type() {
        assert!(matches!(
            sqlite_type("TEXT); DROP TABLE x; --"),
            Err(StoreError::Schema(_))
        ));
        assert!(sqlite_type("").is_err());
        assert!(sqlite_type("[]").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("log_file"));
        assert!(is_identifier("_private2"));
        assert!(is_identifier("Age"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("x\"; --"));
        assert!(!is_identifier(""));
    }
}
