//! PostgreSQL backend implementation for nova-pg
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection establishment over plain TCP or rustls
//! - Transaction control with explicit BEGIN / COMMIT / ROLLBACK
//! - `COPY ... FROM STDIN` streaming
//! - Server-side cursors for bounded-memory reads

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::SinkExt;
use rustls::ClientConfig;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{BoxError, Error, Result};
use crate::security::validate_sql_identifier;
use crate::types::{Interval, ResultSet, Row, Value};

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Untyped NULL parameter; the server infers the type from context
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, BoxError> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl ToSql for Interval {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        out.put_i64(self.microseconds);
        out.put_i32(self.days);
        out.put_i32(self.months);
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }

    to_sql_checked!();
}

/// Convert a nova Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> SqlParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Interval(i) => Box::new(*i),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            pg_value_to_value(pg_row, idx, column.type_())
                .map_err(|e| decode_error(column.name(), column.type_(), e))
        })
        .collect::<Result<Vec<_>>>()
        .map(Row::from)
}

fn decode_error(column: &str, pg_type: &Type, source: BoxError) -> Error {
    Error::Execution {
        message: format!("cannot decode column '{column}' of type {pg_type}: {source}"),
        sql: None,
        source: Some(source),
    }
}

/// Wire bytes of a value of any type; NULL still decodes as `None`
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Convert a PostgreSQL value to a nova Value
///
/// Types without a decoding rule are an error, never NULL. NUMERIC
/// values that `Decimal` cannot hold exactly (NaN, infinities, more than
/// 28 significant digits) come back as their exact text.
fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    pg_type: &Type,
) -> std::result::Result<Value, BoxError> {
    fn get<'a, T, F>(
        row: &'a tokio_postgres::Row,
        idx: usize,
        wrap: F,
    ) -> std::result::Result<Value, BoxError>
    where
        T: FromSql<'a>,
        F: FnOnce(T) -> Value,
    {
        Ok(row.try_get::<_, Option<T>>(idx)?.map_or(Value::Null, wrap))
    }

    fn decode<F>(row: &tokio_postgres::Row, idx: usize, f: F) -> std::result::Result<Value, BoxError>
    where
        F: FnOnce(&[u8]) -> std::result::Result<Value, BoxError>,
    {
        match row.try_get::<_, Option<RawValue<'_>>>(idx)? {
            Some(RawValue(raw)) => f(raw),
            None => Ok(Value::Null),
        }
    }

    match *pg_type {
        Type::BOOL => get(row, idx, Value::Bool),
        Type::INT2 => get(row, idx, Value::Int16),
        Type::INT4 => get(row, idx, Value::Int32),
        Type::INT8 => get(row, idx, Value::Int64),
        Type::OID => get(row, idx, |oid: u32| Value::Int64(i64::from(oid))),
        Type::FLOAT4 => get(row, idx, Value::Float32),
        Type::FLOAT8 => get(row, idx, Value::Float64),
        Type::NUMERIC => decode(row, idx, numeric_value),
        Type::BYTEA => get(row, idx, Value::Bytes),
        Type::DATE => get(row, idx, Value::Date),
        Type::TIME => get(row, idx, Value::Time),
        Type::TIMESTAMP => get(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx, Value::DateTimeTz),
        Type::INTERVAL => decode(row, idx, interval_value),
        Type::UUID => get(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx, Value::Json),
        ref ty if <String as FromSql<'_>>::accepts(ty) => get(row, idx, Value::String),
        ref ty if matches!(ty.kind(), Kind::Enum(_)) => decode(row, idx, |raw| {
            Ok(Value::String(std::str::from_utf8(raw)?.to_string()))
        }),
        _ => Err(format!("no decoding rule for type {pg_type}").into()),
    }
}

/// Binary INTERVAL: microseconds (i64), days (i32), months (i32)
fn interval_value(mut raw: &[u8]) -> std::result::Result<Value, BoxError> {
    if raw.len() != 16 {
        return Err(format!("invalid interval length {}", raw.len()).into());
    }
    let microseconds = raw.get_i64();
    let days = raw.get_i32();
    let months = raw.get_i32();
    Ok(Value::Interval(Interval::new(months, days, microseconds)))
}

fn numeric_value(raw: &[u8]) -> std::result::Result<Value, BoxError> {
    let text = numeric_text(raw)?;
    Ok(match Decimal::from_str_exact(&text) {
        Ok(d) => Value::Decimal(d),
        Err(_) => Value::String(text),
    })
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Exact text of a binary NUMERIC.
///
/// Layout: ndigits, weight, sign, dscale (u16 each), then `ndigits`
/// base-10000 digits; digit `i` is scaled by 10000^(weight - i).
fn numeric_text(mut raw: &[u8]) -> std::result::Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("truncated numeric header".into());
    }
    let ndigits = usize::from(raw.get_u16());
    let weight = i32::from(raw.get_i16());
    let sign = raw.get_u16();
    let dscale = usize::from(raw.get_u16());

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {other:#06x}").into()),
    }
    if raw.len() != ndigits * 2 {
        return Err("numeric digit count does not match length".into());
    }
    let digits: Vec<u16> = (0..ndigits).map(|_| raw.get_u16()).collect();
    let group = |exponent: i32| -> u16 {
        usize::try_from(weight - exponent)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(weight).to_string());
        for exponent in (0..weight).rev() {
            text.push_str(&format!("{:04}", group(exponent)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut exponent = -1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(exponent)));
            exponent -= 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

fn execution_error(e: tokio_postgres::Error, sql: &str) -> Error {
    Error::Execution {
        message: e.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(e)),
    }
}

fn transaction_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    driver: JoinHandle<()>,
}

impl PgConnection {
    /// Wrap a connected client and the task driving its socket
    pub fn new(client: tokio_postgres::Client, driver: JoinHandle<()>) -> Self {
        Self {
            client: Arc::new(client),
            driver,
        }
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        if self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }

        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(transaction_error)?;
        debug!("Transaction started");

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            statement_failed: AtomicBool::new(false),
        }))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { client, driver } = *self;
        // Dropping the last client handle makes the driver send Terminate and exit.
        drop(client);
        driver
            .await
            .map_err(|e| Error::connection_with_source("connection driver task failed", e))?;
        debug!("Connection released");
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    /// Set once any statement fails; the server may have aborted the transaction
    statement_failed: AtomicBool,
}

impl PgTransaction {
    fn record_failure(&self, e: tokio_postgres::Error, sql: &str) -> Error {
        self.statement_failed.store(true, Ordering::Relaxed);
        execution_error(e, sql)
    }

    /// Whether the server still accepts statements in this transaction.
    ///
    /// After a failed statement PostgreSQL rejects everything up to the
    /// end of the block (unless a savepoint was rolled back to) and turns
    /// COMMIT into a silent ROLLBACK.
    async fn is_aborted(&self) -> bool {
        self.statement_failed.load(Ordering::Relaxed)
            && self.client.batch_execute("SELECT 1").await.is_err()
    }

    async fn run_query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| self.record_failure(e, sql))?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let boxed_params: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = self
            .client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| self.record_failure(e, sql))?;

        let rows = pg_rows
            .iter()
            .map(pg_row_to_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(ResultSet::new(columns, rows))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.run_query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let boxed_params: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        self.client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| self.record_failure(e, sql))
    }

    async fn copy_in(&self, statement: &str, payload: Bytes) -> Result<u64> {
        let sink = self
            .client
            .copy_in::<_, Bytes>(statement)
            .await
            .map_err(|e| self.record_failure(e, statement))?;

        futures::pin_mut!(sink);

        sink.send(payload)
            .await
            .map_err(|e| self.record_failure(e, statement))?;
        sink.finish()
            .await
            .map_err(|e| self.record_failure(e, statement))
    }

    async fn declare_cursor(&self, name: &str, query: &str) -> Result<Vec<String>> {
        validate_sql_identifier(name)?;
        let statement = self
            .client
            .prepare(query)
            .await
            .map_err(|e| self.record_failure(e, query))?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let declare = format!("DECLARE {name} NO SCROLL CURSOR FOR {query}");
        self.client
            .batch_execute(&declare)
            .await
            .map_err(|e| self.record_failure(e, &declare))?;
        Ok(columns)
    }

    async fn fetch_cursor(&self, name: &str, count: usize) -> Result<Vec<Row>> {
        let sql = format!("FETCH FORWARD {count} FROM {name}");
        let pg_rows = self
            .client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| self.record_failure(e, &sql))?;
        pg_rows.iter().map(pg_row_to_row).collect()
    }

    async fn close_cursor(&self, name: &str) -> Result<()> {
        let sql = format!("CLOSE {name}");
        self.client
            .batch_execute(&sql)
            .await
            .map_err(|e| self.record_failure(e, &sql))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.is_aborted().await {
            self.client
                .batch_execute("ROLLBACK")
                .await
                .map_err(transaction_error)?;
            debug!("Aborted transaction rolled back instead of committed");
            return Err(Error::transaction(
                "transaction aborted by an earlier failed statement; rolled back, not committed",
            ));
        }

        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(transaction_error)?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(transaction_error)?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

fn spawn_driver<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection error");
        }
    })
}

fn rustls_connector() -> Result<MakeRustlsConnect> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::connection_with_source("failed to configure TLS", e))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

    Ok(MakeRustlsConnect::new(tls_config))
}

/// PostgreSQL connection factory
///
/// `sslmode=disable` connects over plain TCP; `prefer` and `require`
/// negotiate TLS against the webpki trust anchors.
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid connection target", e))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, driver) = match pg_config.get_ssl_mode() {
            SslMode::Disable => {
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| Error::connection_with_source("failed to connect", e))?;
                (client, spawn_driver(connection))
            }
            _ => {
                let (client, connection) = pg_config
                    .connect(rustls_connector()?)
                    .await
                    .map_err(|e| Error::connection_with_source("failed to connect with TLS", e))?;
                (client, spawn_driver(connection))
            }
        };

        debug!(target_url = %config.redacted_url(), "Connection established");
        Ok(Box::new(PgConnection::new(client, driver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        let _ = value_to_sql(&Value::Int32(42));
        let _ = value_to_sql(&Value::String("hello".into()));
        let _ = value_to_sql(&Value::Bool(true));
    }

    #[test]
    fn test_null_accepts_any_type() {
        assert!(<SqlNull as ToSql>::accepts(&Type::TEXT));
        assert!(<SqlNull as ToSql>::accepts(&Type::INT8));

        let mut buf = BytesMut::new();
        let is_null = SqlNull.to_sql(&Type::TEXT, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(buf.is_empty());
    }

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(digits.len() as u16);
        buf.put_i16(weight);
        buf.put_u16(sign);
        buf.put_u16(dscale);
        for d in digits {
            buf.put_u16(*d);
        }
        buf.to_vec()
    }

    #[test]
    fn test_numeric_text() {
        let cases: [(Vec<u8>, &str); 8] = [
            (numeric(1, NUMERIC_POS, 3, &[1, 2345, 6780]), "12345.678"),
            (numeric(-1, NUMERIC_POS, 4, &[12]), "0.0012"),
            (numeric(-2, NUMERIC_POS, 8, &[1]), "0.00000001"),
            (numeric(0, NUMERIC_NEG, 0, &[5]), "-5"),
            (numeric(1, NUMERIC_POS, 0, &[2]), "20000"),
            (numeric(0, NUMERIC_POS, 2, &[]), "0.00"),
            (numeric(0, NUMERIC_NAN, 0, &[]), "NaN"),
            (numeric(0, NUMERIC_NINF, 0, &[]), "-Infinity"),
        ];
        for (raw, expected) in cases {
            assert_eq!(numeric_text(&raw).unwrap(), expected);
        }
    }

    #[test]
    fn test_numeric_beyond_decimal_keeps_exact_text() {
        // 123456789012345678901234567890.5
        let raw = numeric(
            7,
            NUMERIC_POS,
            1,
            &[12, 3456, 7890, 1234, 5678, 9012, 3456, 7890, 5000],
        );
        assert_eq!(
            numeric_value(&raw).unwrap(),
            Value::String("123456789012345678901234567890.5".into())
        );

        let nan = numeric(0, NUMERIC_NAN, 0, &[]);
        assert_eq!(numeric_value(&nan).unwrap(), Value::String("NaN".into()));

        let small = numeric(0, NUMERIC_NEG, 2, &[350, 2500]);
        assert_eq!(
            numeric_value(&small).unwrap(),
            Value::Decimal("-350.25".parse().unwrap())
        );
    }

    #[test]
    fn test_malformed_numeric_rejected() {
        assert!(numeric_text(&[0, 1]).is_err());
        let mut short = numeric(0, NUMERIC_POS, 0, &[5]);
        short.pop();
        assert!(numeric_text(&short).is_err());
        assert!(numeric_text(&numeric(0, 0x1234, 0, &[])).is_err());
    }

    #[test]
    fn test_interval_wire_format() {
        let interval = Interval::new(14, -3, 7_200_000_001);
        let mut buf = BytesMut::new();
        let is_null = interval.to_sql(&Type::INTERVAL, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(buf.len(), 16);

        assert_eq!(interval_value(&buf).unwrap(), Value::Interval(interval));
        assert!(interval_value(&buf[..12]).is_err());
        assert!(<Interval as ToSql>::accepts(&Type::INTERVAL));
        assert!(!<Interval as ToSql>::accepts(&Type::INT8));
    }

    #[test]
    fn test_decode_error_names_column_and_type() {
        let err = decode_error("amount", &Type::MONEY, "no decoding rule for type money".into());
        assert_eq!(err.category(), crate::error::ErrorCategory::Execution);
        let msg = err.to_string();
        assert!(msg.contains("'amount'"));
        assert!(msg.contains("money"));
    }

    #[test]
    fn test_rustls_connector_builds() {
        assert!(rustls_connector().is_ok());
    }

    #[tokio::test]
    async fn test_connect_invalid_target_is_connection_error() {
        let err = PgConnectionFactory
            .connect(&ConnectionConfig::new("postgresql://nova@localhost:5432/db?sslmode=bogus"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
