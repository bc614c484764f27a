//! Approximate table cardinality from planner statistics.
//!
//! The figure comes from `pg_class.reltuples`, is not transactionally
//! consistent and only ever sizes progress reporting.

use tracing::debug;

use crate::error::Result;
use crate::session::Handle;
use crate::types::Value;

/// Estimate reported when the catalog has nothing useful
pub const FALLBACK_ROW_ESTIMATE: u64 = 100_000;

/// Catalog lookup keyed by the unqualified relation name
pub const ROW_ESTIMATE_SQL: &str =
    "SELECT reltuples::bigint AS estimate FROM pg_class WHERE relname = $1";

/// Approximate row count of `table`.
///
/// The lookup is by unqualified name, so a same-named table in another
/// schema may answer instead. Unknown tables, never-analyzed tables
/// (`reltuples` of -1) and empty tables all yield
/// [`FALLBACK_ROW_ESTIMATE`]. Only a failing query is an error.
pub async fn estimate_rows(handle: &mut Handle, table: &str) -> Result<u64> {
    let (_, row) = handle
        .fetch_one(ROW_ESTIMATE_SQL, &[Value::from(table)])
        .await?;

    let estimate = row
        .as_ref()
        .and_then(|r| r.get(0))
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .and_then(|n| u64::try_from(n).ok());

    match estimate {
        Some(n) => {
            debug!(table, estimate = n, "Row estimate from catalog");
            Ok(n)
        }
        None => {
            debug!(table, fallback = FALLBACK_ROW_ESTIMATE, "No catalog estimate, using fallback");
            Ok(FALLBACK_ROW_ESTIMATE)
        }
    }
}
