//! Chunked reads through server-side cursors.
//!
//! A query is wrapped in `DECLARE ... NO SCROLL CURSOR` and pulled with
//! `FETCH FORWARD n` until a pull comes back empty. Two entry points:
//! - [`fetch_chunked`]: pulls everything and returns one [`ResultSet`]
//! - [`stream_batches`]: hands batches to the caller one at a time
//!
//! Both keep per-pull memory bounded by the batch size; only the first
//! materializes the full result.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::estimate::estimate_rows;
use crate::progress::{ProgressObserver, ProgressState};
use crate::session::Handle;
use crate::types::{ResultSet, Row};

/// Strip trailing semicolons and whitespace; `DECLARE` takes a bare query.
fn normalize_query(query: &str) -> Result<&str> {
    let sql = query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if sql.is_empty() {
        return Err(Error::validation("query cannot be empty"));
    }
    Ok(sql)
}

fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::validation("batch size must be greater than zero"));
    }
    Ok(())
}

/// Lazy, single-pass sequence of row batches over one cursor.
///
/// Holds the session handle mutably, so no other statement can run until
/// the stream is dropped. Once exhausted or failed, it keeps returning
/// `Ok(None)`.
pub struct BatchStream<'h> {
    handle: &'h mut Handle,
    query: String,
    cursor: String,
    columns: Vec<String>,
    batch_size: usize,
    transferred: u64,
    exhausted: bool,
    cursor_open: bool,
}

impl BatchStream<'_> {
    /// Result column names, known before the first pull
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows handed out so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Whether the terminal empty pull has happened
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pull the next batch; `None` once the cursor is drained.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        if self.exhausted {
            return Ok(None);
        }

        let pulled = self
            .handle
            .transaction()
            .fetch_cursor(&self.cursor, self.batch_size)
            .await;

        let rows = match pulled {
            Ok(rows) => rows,
            Err(e) => {
                // The failed pull aborted the transaction; the cursor goes with it.
                self.exhausted = true;
                self.cursor_open = false;
                return Err(Error::fetch(&self.query, e));
            }
        };

        if rows.is_empty() {
            self.exhausted = true;
            self.close_cursor().await?;
            return Ok(None);
        }

        self.transferred += rows.len() as u64;
        Ok(Some(rows))
    }

    /// Close the cursor early. Exhausted streams are already closed.
    pub async fn close(mut self) -> Result<()> {
        self.exhausted = true;
        self.close_cursor().await
    }

    async fn close_cursor(&mut self) -> Result<()> {
        if !self.cursor_open {
            return Ok(());
        }
        self.cursor_open = false;
        self.handle
            .transaction()
            .close_cursor(&self.cursor)
            .await
            .map_err(|e| Error::fetch(&self.query, e))
    }
}

impl std::fmt::Debug for BatchStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("cursor", &self.cursor)
            .field("columns", &self.columns)
            .field("batch_size", &self.batch_size)
            .field("transferred", &self.transferred)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Declare a cursor over `query` and return a stream of its batches
pub async fn stream_batches<'h>(
    handle: &'h mut Handle,
    query: &str,
    batch_size: usize,
) -> Result<BatchStream<'h>> {
    check_batch_size(batch_size)?;
    let sql = normalize_query(query)?;

    let cursor = handle.next_cursor_name();
    let columns = handle
        .transaction()
        .declare_cursor(&cursor, sql)
        .await
        .map_err(|e| Error::fetch(query, e))?;
    debug!(cursor = %cursor, columns = columns.len(), batch_size, "Cursor declared");

    Ok(BatchStream {
        handle,
        query: query.to_string(),
        cursor,
        columns,
        batch_size,
        transferred: 0,
        exhausted: false,
        cursor_open: true,
    })
}

/// Run `query` and collect every row, pulling `batch_size` rows at a time.
///
/// Progress is measured against the catalog estimate for
/// `estimation_table`, which never limits how much is read.
pub async fn fetch_chunked(
    handle: &mut Handle,
    query: &str,
    estimation_table: &str,
    batch_size: usize,
) -> Result<ResultSet> {
    let mut ignore = |_: &ProgressState| {};
    fetch_chunked_with_progress(handle, query, estimation_table, batch_size, &mut ignore).await
}

/// [`fetch_chunked`], reporting progress to `observer` after each batch.
///
/// Any failure is returned as [`Error::Fetch`] and the rows pulled so far
/// are discarded.
pub async fn fetch_chunked_with_progress(
    handle: &mut Handle,
    query: &str,
    estimation_table: &str,
    batch_size: usize,
    observer: &mut dyn ProgressObserver,
) -> Result<ResultSet> {
    check_batch_size(batch_size)?;
    normalize_query(query)?;

    let estimate = estimate_rows(handle, estimation_table)
        .await
        .map_err(|e| Error::fetch(query, e))?;
    let mut progress = ProgressState::new(estimate);

    let mut stream = stream_batches(handle, query, batch_size).await?;
    let mut rows = Vec::new();
    while let Some(batch) = stream.next_batch().await? {
        progress.advance(batch.len() as u64);
        rows.extend(batch);
        debug!(progress = %progress, "Fetched batch");
        observer.on_batch(&progress);
    }
    let columns = stream.columns().to_vec();

    info!(rows = rows.len(), estimate, "Chunked fetch complete");
    Ok(ResultSet::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("SELECT 1;").unwrap(), "SELECT 1");
        assert_eq!(normalize_query("  SELECT 1 ; ;\n").unwrap(), "SELECT 1");
        assert!(normalize_query(" ; ").is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            check_batch_size(0),
            Err(Error::Validation { .. })
        ));
        assert!(check_batch_size(1).is_ok());
    }
}
