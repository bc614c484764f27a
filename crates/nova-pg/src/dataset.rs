//! Column-oriented tabular datasets and their batch partitioning.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::Value;

/// One named column of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name, emitted as-is in the COPY column list
    pub name: String,
    /// Values in row order
    pub values: Vec<Value>,
}

impl Column {
    /// Create a column from anything convertible into values
    pub fn new<V: Into<Value>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// An ordered sequence of equally long, uniquely named columns.
///
/// A dataset is immutable once built. It may have zero rows; loaders
/// reject that case themselves.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularDataset {
    columns: Vec<Column>,
    rows: usize,
}

impl TabularDataset {
    /// Build a dataset, rejecting ragged columns and duplicate names.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.values.len());

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name.is_empty() {
                return Err(Error::validation("column name cannot be empty"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            if column.values.len() != rows {
                return Err(Error::validation(format!(
                    "column '{}' has {} values, expected {rows}",
                    column.name,
                    column.values.len()
                )));
            }
        }

        Ok(Self { columns, rows })
    }

    /// Build a dataset from row-major data.
    pub fn from_rows<S, R>(names: &[S], rows: impl IntoIterator<Item = R>) -> Result<Self>
    where
        S: AsRef<str>,
        R: IntoIterator<Item = Value>,
    {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|n| Column {
                name: n.as_ref().to_string(),
                values: Vec::new(),
            })
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            let values: Vec<Value> = row.into_iter().collect();
            if values.len() != columns.len() {
                return Err(Error::validation(format!(
                    "row {i} has {} values, expected {}",
                    values.len(),
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(values) {
                column.values.push(value);
            }
        }

        Self::new(columns)
    }

    /// Number of rows (N)
    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Number of columns (M)
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the dataset has no rows or no columns
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.columns.is_empty()
    }

    /// Columns in declared order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in declared order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Values of row `index`, in column order
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.rows {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }

    /// Partition the rows into batches of at most `batch_size`
    pub fn batches(&self, batch_size: usize) -> Vec<Batch> {
        partition(self.rows, batch_size)
    }
}

/// A contiguous row range `[start, end)` of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of the batch in transfer order
    pub index: usize,
    /// First row (inclusive)
    pub start: usize,
    /// Last row (exclusive)
    pub end: usize,
}

impl Batch {
    /// Rows in this batch
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the batch covers no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `row_count` rows into consecutive batches of at most `batch_size`.
///
/// Yields `ceil(row_count / batch_size)` batches; only the last may be
/// short. A `batch_size` of zero is treated as one.
pub fn partition(row_count: usize, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    (0..row_count)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| Batch {
            index,
            start,
            end: (start + batch_size).min(row_count),
        })
        .collect()
}
