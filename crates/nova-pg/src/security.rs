//! Identifier handling and SQL injection prevention.
//!
//! Provides:
//! - Strict identifier validation for names nova-pg generates itself (cursors)
//! - Quoting for caller-supplied schema, table, and column names
//! - [`TableName`], the qualified `schema.table` target of bulk loads and DDL

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Longest identifier PostgreSQL keeps without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a strict SQL identifier (cursor names).
///
/// - Must not be empty
/// - At most [`MAX_IDENTIFIER_LEN`] bytes
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use nova_pg::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("nova_cursor_1").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::validation("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "SQL identifier too long: {} bytes (max {MAX_IDENTIFIER_LEN})",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::validation(format!(
                "invalid SQL identifier '{name}': must start with a letter or underscore"
            )));
        }
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::validation(format!(
            "invalid SQL identifier '{name}': contains invalid character '{c}'"
        )));
    }

    Ok(())
}

/// Validate a caller-supplied name that will be emitted quoted.
///
/// Quoting makes any character safe except NUL, which PostgreSQL rejects
/// outright. Length is capped the same way the server caps it.
pub fn validate_quoted_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::validation("identifier cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::validation(format!(
            "identifier '{name}' too long: {} bytes (max {MAX_IDENTIFIER_LEN})",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(Error::validation(format!(
            "identifier '{}' contains a NUL byte",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// Quote an identifier with double quotes, doubling embedded quotes.
///
/// ```
/// use nova_pg::security::quote_identifier;
///
/// assert_eq!(quote_identifier("prices"), "\"prices\"");
/// assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Build from separate parts.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> crate::Result<Self> {
        let schema = schema.into();
        let table = table.into();
        validate_quoted_identifier(&schema)?;
        validate_quoted_identifier(&table)?;
        Ok(Self { schema, table })
    }

    /// Parse `schema.table`. Unqualified names are rejected.
    pub fn parse(qualified: &str) -> crate::Result<Self> {
        match qualified.split_once('.') {
            Some((schema, table)) if !table.contains('.') => Self::new(schema, table),
            _ => Err(Error::validation(format!(
                "table name '{qualified}' must be qualified as schema.table"
            ))),
        }
    }

    /// Schema part.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table part.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`, ready to splice into SQL.
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}
