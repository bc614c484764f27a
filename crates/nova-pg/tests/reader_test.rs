//! Tests for nova-pg chunked reads and row estimates

mod common;

use common::{init_test_logging, int_rows, MockBackend, Script};
use nova_pg::estimate::ROW_ESTIMATE_SQL;
use nova_pg::prelude::*;

// ==================== fetch_chunked Tests ====================

#[tokio::test]
async fn test_fetch_accumulates_in_delivery_order() {
    init_test_logging();
    let backend = MockBackend::new(Script::default().estimate(7).cursor(&["n"], int_rows(7)));

    let result = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            fetch_chunked(handle, "SELECT n FROM s.numbers;", "numbers", 3).await
        })
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["n"]);
    assert_eq!(result.rows, int_rows(7));

    let log = backend.log();
    // 3 + 3 + 1, then the terminal empty pull
    assert_eq!(log.fetches.len(), 4);
    assert!(log.fetches.iter().all(|(_, count)| *count == 3));
    assert_eq!(log.declared.len(), 1);
    assert_eq!(log.declared[0].1, "SELECT n FROM s.numbers");
    assert_eq!(log.closed_cursors, vec![log.declared[0].0.clone()]);
    assert_eq!(log.commits, 1);
}

#[tokio::test]
async fn test_zero_rows_still_reports_columns() {
    let backend = MockBackend::new(Script::default().cursor(&["ticker", "price"], Vec::new()));

    let result = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            fetch_chunked(handle, "SELECT ticker, price FROM s.prices WHERE false", "prices", 100)
                .await
        })
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.columns, vec!["ticker", "price"]);
    assert_eq!(backend.log().fetches.len(), 1);
}

#[tokio::test]
async fn test_estimate_does_not_limit_the_read() {
    let backend = MockBackend::new(Script::default().estimate(2).cursor(&["n"], int_rows(10)));
    let mut seen = Vec::new();

    let result = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            let mut observer =
                |p: &ProgressState| seen.push((p.transferred, p.estimate, p.fraction()));
            let query = "SELECT n FROM s.numbers";
            fetch_chunked_with_progress(handle, query, "numbers", 4, &mut observer).await
        })
        .await
        .unwrap();

    assert_eq!(result.len(), 10);
    assert_eq!(seen, vec![(4, 2, 1.0), (8, 2, 1.0), (10, 2, 1.0)]);
}

#[tokio::test]
async fn test_progress_uses_fallback_estimate() {
    let backend = MockBackend::new(Script::default().cursor(&["n"], int_rows(5)));
    let mut last = ProgressState::default();

    backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            let mut observer = |p: &ProgressState| last = *p;
            let query = "SELECT n FROM s.numbers";
            fetch_chunked_with_progress(handle, query, "numbers", 2, &mut observer).await
        })
        .await
        .unwrap();

    assert_eq!(last.transferred, 5);
    assert_eq!(last.estimate, FALLBACK_ROW_ESTIMATE);
}

#[tokio::test]
async fn test_pull_failure_discards_partial_rows() {
    init_test_logging();
    let backend = MockBackend::new(Script {
        fail_fetch_at: Some(2),
        ..Script::default().cursor(&["n"], int_rows(10))
    });

    let err = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            fetch_chunked(handle, "SELECT n FROM s.numbers", "numbers", 3).await
        })
        .await
        .unwrap_err();

    match &err {
        Error::Fetch { query, .. } => assert_eq!(query, "SELECT n FROM s.numbers"),
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(err.root().category(), ErrorCategory::Connection);

    let log = backend.log();
    assert_eq!(log.fetches.len(), 2);
    assert_eq!(log.rollbacks, 1);
    assert_eq!(log.closes, 1);
}

#[tokio::test]
async fn test_execution_failure_is_fetch_error() {
    let backend = MockBackend::new(Script {
        fail_declare: true,
        ..Default::default()
    });

    let err = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            fetch_chunked(handle, "SELECT * FROM missing", "missing", 10).await
        })
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Fetch);
    assert_eq!(err.sql(), Some("SELECT * FROM missing"));
    assert!(backend.log().fetches.is_empty());
}

#[tokio::test]
async fn test_estimate_failure_is_fetch_error() {
    let backend = MockBackend::new(Script {
        fail_query_containing: Some("pg_class".into()),
        ..Default::default()
    });

    let err = backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            fetch_chunked(handle, "SELECT 1", "anything", 10).await
        })
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Fetch);
    assert!(backend.log().declared.is_empty());
}

// ==================== stream_batches Tests ====================

#[tokio::test]
async fn test_stream_is_lazy_and_single_pass() {
    let backend = MockBackend::new(Script::default().cursor(&["n"], int_rows(5)));

    backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            let mut stream = stream_batches(handle, "SELECT n FROM s.numbers", 2).await?;
            assert_eq!(stream.columns(), ["n".to_string()]);

            let mut sizes = Vec::new();
            while let Some(batch) = stream.next_batch().await? {
                sizes.push(batch.len());
            }
            assert_eq!(sizes, vec![2, 2, 1]);
            assert_eq!(stream.transferred(), 5);
            assert!(stream.is_exhausted());

            assert!(stream.next_batch().await?.is_none());
            stream.close().await
        })
        .await
        .unwrap();

    let log = backend.log();
    assert_eq!(log.fetches.len(), 4);
    assert_eq!(log.closed_cursors.len(), 1);
}

#[tokio::test]
async fn test_stream_closed_early() {
    let backend = MockBackend::new(Script::default().cursor(&["n"], int_rows(100)));

    backend
        .manager()
        .with_session(async |handle: &mut Handle| {
            let mut stream = stream_batches(handle, "SELECT n FROM s.numbers", 10).await?;
            let first = stream.next_batch().await?.unwrap();
            assert_eq!(first.len(), 10);
            stream.close().await?;

            // The handle is usable again once the stream is gone.
            handle.execute("SELECT 1").await
        })
        .await
        .unwrap();

    let log = backend.log();
    assert_eq!(log.fetches.len(), 1);
    assert_eq!(log.closed_cursors.len(), 1);
}

#[tokio::test]
async fn test_stream_rejects_bad_arguments_locally() {
    let backend = MockBackend::new(Script::default());
    let mut session = backend.manager().open().await.unwrap();
    let before = backend.log().network_calls();

    let handle = session.handle().unwrap();
    assert!(matches!(
        stream_batches(handle, "SELECT 1", 0).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        stream_batches(handle, " ; ", 10).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        fetch_chunked(handle, "SELECT 1", "t", 0).await,
        Err(Error::Validation { .. })
    ));
    assert_eq!(backend.log().network_calls(), before);

    session.rollback().await.unwrap();
    session.close().await.unwrap();
}

// ==================== estimate_rows Tests ====================

#[tokio::test]
async fn test_estimate_from_catalog() {
    let backend = MockBackend::new(Script::default().estimate(1234));

    let estimate = backend
        .manager()
        .with_session(async |handle: &mut Handle| estimate_rows(handle, "prices").await)
        .await
        .unwrap();

    assert_eq!(estimate, 1234);
    let log = backend.log();
    assert_eq!(log.queries.len(), 1);
    assert_eq!(log.queries[0].0, ROW_ESTIMATE_SQL);
    assert_eq!(log.queries[0].1, vec![Value::from("prices")]);
}

#[tokio::test]
async fn test_estimate_fallbacks() {
    // no catalog row, never analyzed, empty table
    let scripts = [
        Script::default(),
        Script::default().estimate(-1),
        Script::default().estimate(0),
    ];

    for script in scripts {
        let backend = MockBackend::new(script);
        let estimate = backend
            .manager()
            .with_session(async |handle: &mut Handle| estimate_rows(handle, "unknown").await)
            .await
            .unwrap();
        assert_eq!(estimate, FALLBACK_ROW_ESTIMATE);
        assert_eq!(estimate, 100_000);
    }
}

#[tokio::test]
async fn test_estimate_execution_failure_raises() {
    let backend = MockBackend::new(Script {
        fail_query_containing: Some("pg_class".into()),
        ..Default::default()
    });

    let err = backend
        .manager()
        .with_session(async |handle: &mut Handle| estimate_rows(handle, "prices").await)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Execution);
}
