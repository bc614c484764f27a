//! Transaction-scoped sessions.
//!
//! A [`Session`] wraps one physical connection and the single transaction
//! that spans its lifetime:
//!
//! ```text
//! Init -> Open -> { Committed | RolledBack } -> Closed
//! ```
//!
//! [`SessionManager::with_session`] drives that state machine around a
//! caller-supplied closure: commit when the closure succeeds, roll back when
//! it fails, and release the connection on every path.
//!
//! # Example
//!
//! ```rust,ignore
//! use nova_pg::prelude::*;
//!
//! let manager = SessionManager::new(creds.to_connection_config()?);
//! let rows = manager
//!     .with_session(async |handle: &mut Handle| {
//!         bulk_insert(handle, &dataset, "market.prices").await?;
//!         fetch_chunked(handle, "SELECT * FROM market.prices", "prices", 1000).await
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{Error, Result};
use crate::types::{ResultSet, Row, Value};

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet connected
    Init,
    /// Connected, transaction open
    Open,
    /// Transaction committed
    Committed,
    /// Transaction rolled back (explicitly, or by a failed commit)
    RolledBack,
    /// Connection released; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Open => write!(f, "open"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Statement-execution channel bound to an open session.
///
/// A handle only exists while its session's transaction is open, and
/// server-side cursors borrow it mutably, so at most one is active.
pub struct Handle {
    tx: Box<dyn Transaction>,
    cursor_seq: u32,
}

impl Handle {
    pub(crate) fn new(tx: Box<dyn Transaction>) -> Self {
        Self { tx, cursor_seq: 0 }
    }

    /// Execute a statement, returning the affected row count
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.tx.execute(sql, &[]).await
    }

    /// Execute a statement with bind parameters (`$1`, `$2`, ...)
    pub async fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.tx.execute(sql, params).await
    }

    /// Column names and the first row, if any
    pub async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<(Vec<String>, Option<Row>)> {
        let ResultSet { columns, rows } = self.tx.query(sql, params).await?;
        Ok((columns, rows.into_iter().next()))
    }

    /// Column names and every row
    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.tx.query(sql, params).await
    }

    /// Column names and at most `size` rows, pulled through a cursor
    pub async fn fetch_many(&mut self, sql: &str, size: usize) -> Result<ResultSet> {
        let name = self.next_cursor_name();
        let columns = self.tx.declare_cursor(&name, sql).await?;
        let rows = if size == 0 {
            Vec::new()
        } else {
            self.tx.fetch_cursor(&name, size).await?
        };
        self.tx.close_cursor(&name).await?;
        Ok(ResultSet::new(columns, rows))
    }

    /// Stream one `COPY ... FROM STDIN` payload
    pub async fn copy_in(&mut self, statement: &str, payload: Bytes) -> Result<u64> {
        self.tx.copy_in(statement, payload).await
    }

    pub(crate) fn next_cursor_name(&mut self) -> String {
        self.cursor_seq += 1;
        format!("nova_cursor_{}", self.cursor_seq)
    }

    pub(crate) fn transaction(&self) -> &dyn Transaction {
        self.tx.as_ref()
    }

    fn into_transaction(self) -> Box<dyn Transaction> {
        self.tx
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("cursor_seq", &self.cursor_seq)
            .finish_non_exhaustive()
    }
}

/// One connection and the transaction spanning its lifetime.
///
/// Finalize with [`commit`](Self::commit) or [`rollback`](Self::rollback),
/// then [`close`](Self::close). A session dropped while still open logs a
/// warning; closing the socket makes the server discard the transaction.
pub struct Session {
    state: SessionState,
    connection: Option<Box<dyn Connection>>,
    handle: Option<Handle>,
}

impl Session {
    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The statement handle; only available while the session is open
    pub fn handle(&mut self) -> Result<&mut Handle> {
        let state = self.state;
        self.handle
            .as_mut()
            .ok_or_else(|| Error::transaction(format!("session is {state}, no handle available")))
    }

    /// Commit the transaction.
    ///
    /// A failed COMMIT leaves the server transaction aborted, so the
    /// session moves to `RolledBack` either way.
    pub async fn commit(&mut self) -> Result<()> {
        let tx = self.take_transaction("commit")?;
        match tx.commit().await {
            Ok(()) => {
                self.state = SessionState::Committed;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::RolledBack;
                Err(e)
            }
        }
    }

    /// Roll back the transaction
    pub async fn rollback(&mut self) -> Result<()> {
        let tx = self.take_transaction("roll back")?;
        self.state = SessionState::RolledBack;
        tx.rollback().await
    }

    /// Release the connection. Must follow `commit` or `rollback`.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Open {
            return Err(Error::transaction("cannot close an open session; commit or roll back first"));
        }
        self.state = SessionState::Closed;
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    fn take_transaction(&mut self, action: &str) -> Result<Box<dyn Transaction>> {
        if self.state != SessionState::Open {
            return Err(Error::transaction(format!(
                "cannot {action}: session is {}",
                self.state
            )));
        }
        self.handle
            .take()
            .map(Handle::into_transaction)
            .ok_or_else(|| Error::transaction(format!("cannot {action}: no transaction")))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            warn!("Session dropped without commit or rollback; transaction discarded");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Opens sessions against one configured connection target.
///
/// The manager holds no connection itself; every session gets its own.
#[derive(Clone)]
pub struct SessionManager {
    config: ConnectionConfig,
    factory: Arc<dyn ConnectionFactory>,
}

impl SessionManager {
    /// Manager backed by PostgreSQL
    #[cfg(feature = "postgres")]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_factory(config, Arc::new(crate::postgres::PgConnectionFactory))
    }

    /// Manager backed by a custom connection factory
    pub fn with_factory(config: ConnectionConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { config, factory }
    }

    /// Connection settings in use
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect and begin a transaction.
    ///
    /// Connection failures surface unchanged as [`Error::Connection`].
    pub async fn open(&self) -> Result<Session> {
        let connection = self.factory.connect(&self.config).await?;

        let tx = match connection.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to release connection after BEGIN failed");
                }
                return Err(e);
            }
        };

        debug!("Session opened");
        Ok(Session {
            state: SessionState::Open,
            connection: Some(connection),
            handle: Some(Handle::new(tx)),
        })
    }

    /// Run `work` inside a fresh session.
    ///
    /// On success the transaction is committed and `work`'s value returned.
    /// On failure it is rolled back and the original error returned as-is.
    /// The connection is released on every path; rollback and release
    /// failures are logged and never replace the error being returned.
    ///
    /// If `work` swallows a failed statement and still returns `Ok`, the
    /// server has already aborted the transaction. The commit then rolls
    /// back instead and fails with a [`Error::Transaction`], so the session
    /// ends `RolledBack` and nothing is reported as committed. A statement
    /// whose failure was undone with `ROLLBACK TO SAVEPOINT` does not count.
    pub async fn with_session<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: AsyncFnOnce(&mut Handle) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut session = self.open().await?;

        let outcome = match session.handle() {
            Ok(handle) => work(handle).await,
            Err(e) => Err(E::from(e)),
        };

        let result = match outcome {
            Ok(value) => session.commit().await.map(|()| value).map_err(E::from),
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after session work failed");
                }
                Err(err)
            }
        };

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to release connection");
        }
        debug!(state = %session.state(), "Session finished");

        result
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
