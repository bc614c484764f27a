//! # nova-pg
//!
//! Transactional sessions and chunked bulk transfer between in-memory
//! tabular datasets and PostgreSQL.
//!
//! ## Features
//!
//! - **Scoped sessions**: one connection, one transaction, exactly one of
//!   commit or rollback, and release on every exit path
//! - **Bulk loading**: datasets streamed in fixed-size batches through
//!   `COPY ... FROM STDIN`
//! - **Chunked reads**: server-side cursors pulled in bounded batches, either
//!   materialized or as a lazy stream
//! - **Progress accounting** against catalog row estimates
//! - **Credential files** with per-environment sections and redacted secrets
//! - **Schema provisioning**: existence probes, `CREATE SCHEMA`, `CREATE TABLE`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nova_pg::prelude::*;
//!
//! let creds = load_db_config("db_config.json", DEFAULT_ENV)?;
//! let manager = SessionManager::new(creds.to_connection_config()?);
//!
//! let dataset = TabularDataset::new(vec![
//!     Column::new("ticker", ["AAPL", "TSLA", "USO"]),
//!     Column::new("price", [350.0, 400.0, 25.0]),
//! ])?;
//!
//! let prices = manager
//!     .with_session(async |handle: &mut Handle| {
//!         bulk_insert(handle, &dataset, "market.prices").await?;
//!         fetch_chunked(handle, "SELECT * FROM market.prices", "prices", 1000).await
//!     })
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL backend via tokio-postgres, with rustls TLS

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod config;
pub mod connection;
pub mod dataset;
pub mod error;
pub mod estimate;
pub mod progress;
pub mod reader;
pub mod schema;
pub mod security;
pub mod session;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Values and rows
    pub use crate::types::{Interval, ResultSet, Row, Value};

    // Datasets
    pub use crate::dataset::{partition, Batch, Column, TabularDataset};

    // Configuration
    pub use crate::config::{load_db_config, DbCredentials, SensitiveString, SslMode, DEFAULT_ENV};

    // Connection traits and config
    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};

    // Sessions
    pub use crate::session::{Handle, Session, SessionManager, SessionState};

    // Transfer
    pub use crate::bulk::{bulk_insert, bulk_insert_with, BulkLoadOptions, BulkLoadReport};
    pub use crate::estimate::{estimate_rows, FALLBACK_ROW_ESTIMATE};
    pub use crate::progress::{ProgressObserver, ProgressState};
    pub use crate::reader::{fetch_chunked, fetch_chunked_with_progress, stream_batches, BatchStream};

    // Provisioning
    pub use crate::schema::{create_schema, create_table, schema_exists, table_exists, ColumnType};
    pub use crate::security::TableName;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgConnectionFactory;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
