//! Bulk loading of tabular datasets via `COPY ... FROM STDIN`.
//!
//! The dataset is cut into consecutive row batches and each batch is sent
//! as its own CSV payload, strictly in order, inside the caller's session
//! transaction. The first failing batch aborts the load; nothing is
//! committed here, so whether earlier batches survive is decided by the
//! session (which rolls back on error).
//!
//! # Payload encoding
//!
//! - NULL is an empty, unquoted field; an empty string is `""`
//! - Fields containing `,` `"` CR or LF, and the literal `\.`, are quoted
//!   with inner quotes doubled
//! - Floats use `NaN`, `Infinity`, `-Infinity` for non-finite values
//! - Bytes use the `\x` hex form; temporal values are ISO-8601
//! - No header line and no row-number column

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::SecondsFormat;
use tracing::{debug, info};

use crate::dataset::{Batch, TabularDataset};
use crate::error::{Error, Result};
use crate::progress::ProgressState;
use crate::security::{quote_identifier, validate_quoted_identifier, TableName};
use crate::session::Handle;
use crate::types::Value;

/// Rows per COPY statement unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Bulk load settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLoadOptions {
    /// Maximum rows per batch; must be positive
    pub batch_size: usize,
}

impl Default for BulkLoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl BulkLoadOptions {
    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Outcome of a fully successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkLoadReport {
    /// Rows sent
    pub rows: u64,
    /// COPY statements issued
    pub batches: usize,
}

/// `COPY "schema"."table" ("c1", "c2") FROM STDIN WITH (FORMAT csv)`
pub fn copy_statement(table: &TableName, columns: &[&str]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "COPY {} ({column_list}) FROM STDIN WITH (FORMAT csv)",
        table.quoted()
    )
}

fn float_text(v: f64) -> Cow<'static, str> {
    if v.is_nan() {
        Cow::Borrowed("NaN")
    } else if v.is_infinite() {
        Cow::Borrowed(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        Cow::Owned(v.to_string())
    }
}

/// Text form of a non-NULL value
fn field_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Int16(n) => Cow::Owned(n.to_string()),
        Value::Int32(n) => Cow::Owned(n.to_string()),
        Value::Int64(n) => Cow::Owned(n.to_string()),
        Value::Float32(n) => match float_text(f64::from(*n)) {
            Cow::Owned(_) => Cow::Owned(n.to_string()),
            special => special,
        },
        Value::Float64(n) => float_text(*n),
        Value::Decimal(d) => Cow::Owned(d.to_string()),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bytes(b) => Cow::Owned(format!("\\x{}", hex::encode(b))),
        Value::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Cow::Owned(t.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(dt) => Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::DateTimeTz(dt) => Cow::Owned(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Interval(i) => Cow::Owned(i.to_string()),
        Value::Uuid(u) => Cow::Owned(u.to_string()),
        Value::Json(j) => Cow::Owned(j.to_string()),
    }
}

fn needs_quoting(field: &str) -> bool {
    field.is_empty()
        || field == "\\."
        || field.contains([',', '"', '\n', '\r'])
}

/// Append one CSV field
pub fn encode_field(value: &Value, out: &mut BytesMut) {
    if value.is_null() {
        return;
    }

    let text = field_text(value);
    if needs_quoting(&text) {
        out.put_u8(b'"');
        out.put_slice(text.replace('"', "\"\"").as_bytes());
        out.put_u8(b'"');
    } else {
        out.put_slice(text.as_bytes());
    }
}

/// Encode rows `[batch.start, batch.end)` as a CSV payload
pub fn encode_batch(dataset: &TabularDataset, batch: &Batch) -> Bytes {
    let mut buf = BytesMut::with_capacity(batch.len() * dataset.column_count() * 8);
    for row in batch.start..batch.end {
        for (i, column) in dataset.columns().iter().enumerate() {
            if i > 0 {
                buf.put_u8(b',');
            }
            encode_field(&column.values[row], &mut buf);
        }
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

/// Load `dataset` into `table` (`schema.table`) in batches of 5000 rows
pub async fn bulk_insert(
    handle: &mut Handle,
    dataset: &TabularDataset,
    table: &str,
) -> Result<BulkLoadReport> {
    bulk_insert_with(handle, dataset, table, BulkLoadOptions::default()).await
}

/// Load `dataset` into `table` (`schema.table`).
///
/// Empty datasets, a zero batch size and malformed names are rejected
/// before anything is sent. A failing batch yields [`Error::Transfer`]
/// carrying the table, the 1-based batch number and the cause; later
/// batches are not attempted.
pub async fn bulk_insert_with(
    handle: &mut Handle,
    dataset: &TabularDataset,
    table: &str,
    options: BulkLoadOptions,
) -> Result<BulkLoadReport> {
    if dataset.is_empty() {
        return Err(Error::validation("empty input: dataset has no rows to insert"));
    }
    if options.batch_size == 0 {
        return Err(Error::validation("batch size must be greater than zero"));
    }
    let target = TableName::parse(table)?;
    let columns = dataset.column_names();
    for column in &columns {
        validate_quoted_identifier(column)?;
    }

    let statement = copy_statement(&target, &columns);
    let batches = dataset.batches(options.batch_size);
    let mut progress = ProgressState::new(dataset.row_count() as u64);

    debug!(
        table = %target,
        rows = dataset.row_count(),
        batches = batches.len(),
        "Starting bulk load"
    );

    for batch in &batches {
        let payload = encode_batch(dataset, batch);
        let bytes = payload.len();

        handle
            .copy_in(&statement, payload)
            .await
            .map_err(|e| Error::transfer(target.to_string(), batch.index + 1, e))?;

        progress.advance(batch.len() as u64);
        debug!(
            table = %target,
            batch = batch.index + 1,
            rows = batch.len(),
            bytes,
            progress = %progress,
            "Copied batch"
        );
    }

    info!(
        table = %target,
        rows = progress.transferred,
        batches = batches.len(),
        "Bulk load complete"
    );

    Ok(BulkLoadReport {
        rows: progress.transferred,
        batches: batches.len(),
    })
}
