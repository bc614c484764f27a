//! Schema and table provisioning.
//!
//! Existence probes against the system catalogs plus `CREATE SCHEMA` and
//! `CREATE TABLE` issuance. Column types are named with the portable
//! dtype vocabulary datasets are described in (`int`, `float`, `str`, ...).

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::error::{Error, Result};
use crate::security::{quote_identifier, validate_quoted_identifier, TableName};
use crate::session::Handle;
use crate::types::Value;

/// Column type accepted by [`create_table`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `int` -> BIGINT
    Int,
    /// `float` -> DOUBLE PRECISION
    Float,
    /// `decimal` -> NUMERIC
    Decimal,
    /// `bool` -> BOOLEAN
    Bool,
    /// `str` -> TEXT
    Str,
    /// `bytes` -> BYTEA
    Bytes,
    /// `datetime` -> TIMESTAMPTZ
    DateTime,
    /// `date` -> DATE
    Date,
    /// `time` -> TIME
    Time,
    /// `timedelta` -> INTERVAL
    TimeDelta,
}

impl ColumnType {
    /// PostgreSQL type emitted in DDL
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Int => "BIGINT",
            Self::Float => "DOUBLE PRECISION",
            Self::Decimal => "NUMERIC",
            Self::Bool => "BOOLEAN",
            Self::Str => "TEXT",
            Self::Bytes => "BYTEA",
            Self::DateTime => "TIMESTAMPTZ",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::TimeDelta => "INTERVAL",
        }
    }

    /// Dtype name this type is parsed from
    pub const fn dtype(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::DateTime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::TimeDelta => "timedelta",
        }
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "decimal" => Ok(Self::Decimal),
            "bool" => Ok(Self::Bool),
            "str" => Ok(Self::Str),
            "bytes" => Ok(Self::Bytes),
            "datetime" => Ok(Self::DateTime),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "timedelta" => Ok(Self::TimeDelta),
            other => Err(Error::validation(format!("unsupported dtype '{other}'"))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// A column of a table to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
}

impl ColumnDef {
    /// Build from a name and a dtype name such as `"float"`
    pub fn parse(name: impl Into<String>, dtype: &str) -> Result<Self> {
        let name = name.into();
        let column_type = dtype.parse::<ColumnType>().map_err(|_| {
            Error::validation(format!("unsupported dtype '{dtype}' for column '{name}'"))
        })?;
        validate_quoted_identifier(&name)?;
        Ok(Self { name, column_type })
    }
}

/// `CREATE TABLE "schema"."table" ("c1" TYPE, ...)`
pub fn create_table_sql(table: &TableName, columns: &[ColumnDef]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({defs})", table.quoted())
}

async fn exists(handle: &mut Handle, sql: &str, params: &[Value]) -> Result<bool> {
    let (_, row) = handle.fetch_one(sql, params).await?;
    Ok(row
        .as_ref()
        .and_then(|r| r.get(0))
        .and_then(Value::as_bool)
        .unwrap_or(false))
}

/// Whether a schema named `schema` exists
pub async fn schema_exists(handle: &mut Handle, schema: &str) -> Result<bool> {
    exists(
        handle,
        "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)",
        &[Value::from(schema)],
    )
    .await
}

/// Whether `schema.table` exists
pub async fn table_exists(handle: &mut Handle, schema: &str, table: &str) -> Result<bool> {
    exists(
        handle,
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2)",
        &[Value::from(schema), Value::from(table)],
    )
    .await
}

/// `CREATE SCHEMA IF NOT EXISTS`
pub async fn create_schema(handle: &mut Handle, schema: &str) -> Result<()> {
    validate_quoted_identifier(schema)?;
    let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema));
    handle.execute(&sql).await?;
    info!(schema, "Schema ensured");
    Ok(())
}

/// Create `table` (`schema.table`) from `(column, dtype)` pairs.
///
/// Checked in order, each a validation error: every dtype is supported,
/// the schema exists, the table does not. Only then is the DDL issued.
pub async fn create_table(handle: &mut Handle, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    let target = TableName::parse(table)?;
    if columns.is_empty() {
        return Err(Error::validation(format!("table {target} needs at least one column")));
    }
    let defs = columns
        .iter()
        .map(|(name, dtype)| ColumnDef::parse(*name, dtype))
        .collect::<Result<Vec<_>>>()?;

    if !schema_exists(handle, target.schema()).await? {
        return Err(Error::validation(format!(
            "schema '{}' does not exist",
            target.schema()
        )));
    }
    if table_exists(handle, target.schema(), target.table()).await? {
        return Err(Error::validation(format!("table '{target}' already exists")));
    }

    let sql = create_table_sql(&target, &defs);
    handle.execute(&sql).await.map_err(|e| Error::Execution {
        message: format!("error creating table '{target}'"),
        sql: Some(sql.clone()),
        source: Some(Box::new(e)),
    })?;

    info!(table = %target, columns = defs.len(), "Table created");
    Ok(())
}
