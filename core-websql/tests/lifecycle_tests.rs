//! Database and bridge lifecycle: open, close, BEGIN failures, idle
//! timeouts, shutdown and the event bus.

mod common;

use bridge_desktop::AppDataStorage;
use core_runtime::events::{BridgeEvent, DatabaseEvent, TransactionEvent};
use core_runtime::RowEncoding;
use common::{error_message, Harness};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Open / close
// ============================================================================

#[tokio::test]
async fn test_open_is_idempotent() {
    let mut h = Harness::new().await;
    let mut events = h.bridge.events();

    h.open("inbox").await;
    h.bridge.open("inbox", "again");
    let again = h.wait_for("again").await;

    assert!(!again.is_error);
    assert_eq!(again.payload, None);
    assert_eq!(h.bridge.open_databases(), 1);

    let files: Vec<_> = std::fs::read_dir(h.dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with("_nwebsql.db"))
        .collect();
    assert_eq!(files, vec!["inbox_nwebsql.db".to_string()]);

    let opened = events
        .try_recv()
        .expect("no open event")
        .expect("event bus lagged");
    assert_eq!(
        opened,
        BridgeEvent::Database(DatabaseEvent::Opened {
            db_name: "inbox".to_string(),
            file_name: "inbox_nwebsql.db".to_string(),
        })
    );
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_close_releases_handles() {
    let mut h = Harness::new().await;
    h.open("a").await;
    h.open("b").await;
    assert_eq!(h.bridge.open_databases(), 2);

    h.bridge.close();
    h.bridge.close();
    assert_eq!(h.bridge.open_databases(), 0);

    // Reopening after close works on a fresh handle.
    h.bridge.open("a", "reopen");
    assert!(!h.wait_for("reopen").await.is_error);
    let rows = h.query(1, "a", "SELECT 1 AS one").await;
    assert_eq!(rows, json!({"rows": [{"one": 1}]}));
}

#[tokio::test]
async fn test_open_failure_is_silent_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let not_a_dir = dir.path().join("plain-file");
    std::fs::write(&not_a_dir, b"x").unwrap();
    let storage = Arc::new(AppDataStorage::with_directory(&not_a_dir));
    let mut h = Harness::with_storage(dir, storage, |builder| builder);
    let mut events = h.bridge.events();

    h.bridge.open("d", "open");
    h.settle(Duration::from_millis(200)).await;

    assert!(h.find("open").is_none());
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        BridgeEvent::Database(DatabaseEvent::OpenFailed { ref db_name, .. }) if db_name == "d"
    ));
}

#[tokio::test]
async fn test_open_failure_reported_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let not_a_dir = dir.path().join("plain-file");
    std::fs::write(&not_a_dir, b"x").unwrap();
    let storage = Arc::new(AppDataStorage::with_directory(&not_a_dir));
    let mut h = Harness::with_storage(dir, storage, |builder| builder.report_open_errors(true));

    h.bridge.open("d", "open");
    let failed = h.wait_for("open").await;

    assert!(failed.is_error);
    assert_eq!(failed.payload.as_ref().unwrap()["type"], "error");
    assert!(!error_message(&failed).is_empty());
}

// ============================================================================
// BEGIN failures
// ============================================================================

#[tokio::test]
async fn test_begin_failure_keeps_record_queued_by_default() {
    let mut h = Harness::new().await;

    h.bridge.start_transaction(1, "never-opened", "start", "start-err");
    let err = h.wait_for("start-err").await;

    assert!(err.is_error);
    assert!(error_message(&err).contains("never-opened"));
    assert!(!h.find("start").unwrap().is_error);
    assert_eq!(h.bridge.pending_transactions(), vec![1]);
}

#[tokio::test]
async fn test_begin_failure_removal_unblocks_followers() {
    let mut h = Harness::with_config(|builder| builder.remove_on_begin_failure(true)).await;
    h.open("d").await;

    h.bridge.start_transaction(1, "never-opened", "s1", "e1");
    h.bridge.start_transaction(2, "d", "s2", "e2");
    h.bridge.execute_sql(2, "d", "SELECT 2 AS two", None, "q2", "q2-err");
    h.bridge.end_transaction(2, "d", "end2", "end2-err", true);

    let end = h.wait_for_end("s2", "e2").await;
    assert!(!end.is_error);
    assert!(h.find("e1").unwrap().is_error);
    assert_eq!(h.find("q2").unwrap().payload, Some(json!({"rows": [{"two": 2}]})));
    assert!(h.bridge.pending_transactions().is_empty());
}

#[tokio::test]
async fn test_transaction_on_closed_database_fails() {
    let mut h = Harness::with_config(|builder| builder.remove_on_begin_failure(true)).await;
    h.open("d").await;
    h.bridge.close();

    h.bridge.start_transaction(1, "d", "start", "start-err");
    let err = h.wait_for("start-err").await;
    assert_eq!(error_message(&err), "database not open: d");
    assert!(h.bridge.pending_transactions().is_empty());
}

// ============================================================================
// Idle timeout
// ============================================================================

#[tokio::test]
async fn test_idle_head_times_out_and_follower_runs() {
    let mut h = Harness::with_config(|builder| builder.idle_timeout(Duration::from_millis(200))).await;
    h.open("d").await;
    let mut events = h.bridge.events();

    h.bridge.start_transaction(1, "d", "s1", "e1");
    h.bridge.start_transaction(2, "d", "s2", "e2");
    h.bridge.execute_sql(2, "d", "SELECT 2 AS two", None, "q2", "q2-err");
    h.bridge.end_transaction(2, "d", "end2", "end2-err", true);

    let timed_out = h.wait_for("e1").await;
    assert!(timed_out.is_error);
    assert_eq!(error_message(&timed_out), "transaction timed out");

    assert!(!h.wait_for_end("s2", "e2").await.is_error);
    assert!(h.position("e1") < h.position("q2"));

    let mut saw_timeout = false;
    while let Some(Ok(event)) = events.try_recv() {
        if let BridgeEvent::Transaction(TransactionEvent::TimedOut { tx_id, .. }) = event {
            assert_eq!(tx_id, 1);
            saw_timeout = true;
        }
    }
    assert!(saw_timeout);
}

#[tokio::test]
async fn test_activity_keeps_transaction_alive() {
    let mut h = Harness::with_config(|builder| builder.idle_timeout(Duration::from_millis(300))).await;
    h.open("d").await;

    h.bridge.start_transaction(1, "d", "s1", "e1");
    for i in 0..4 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        h.bridge
            .execute_sql(1, "d", "SELECT 1", None, &format!("q{}", i), &format!("q{}-err", i));
    }
    h.bridge.end_transaction(1, "d", "end", "end-err", true);

    let end = h.wait_for_end("s1", "e1").await;
    assert!(!end.is_error);
    assert!(h.find("e1").is_none());
}

// ============================================================================
// Events, encoding, shutdown
// ============================================================================

#[tokio::test]
async fn test_transaction_events() {
    let mut h = Harness::new().await;
    h.open("d").await;
    let mut events = h.bridge.events().filter(|event| event.tx_id() == Some(7));

    h.bridge.start_transaction(7, "d", "start", "start-err");
    h.bridge.execute_sql(7, "d", "SELECT * FROM missing", None, "q", "q-err");
    h.wait_for("q-err").await;
    h.bridge.end_transaction(7, "d", "end", "end-err", false);
    h.wait_for_end("start", "start-err").await;

    let mut seen = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        seen.push(event.description().to_string());
    }
    assert_eq!(
        seen,
        vec!["Transaction begun", "Query failed", "Transaction rolled back"]
    );
}

#[tokio::test]
async fn test_text_row_encoding() {
    let mut h = Harness::with_config(|builder| builder.row_encoding(RowEncoding::Text)).await;
    h.open("d").await;

    let rows = h.query(1, "d", "SELECT 3 AS n, 0.5 AS f, NULL AS z").await;
    assert_eq!(rows, json!({"rows": [{"n": "3", "f": "0.5", "z": null}]}));
}

#[tokio::test]
async fn test_shutdown_flushes_and_stops() {
    let mut h = Harness::new().await;
    h.open("d").await;

    h.bridge.start_transaction(1, "d", "start", "start-err");
    h.bridge.execute_sql(1, "d", "SELECT 1", None, "q", "q-err");
    h.wait_for("q").await;

    h.bridge.shutdown().await;
    assert!(h.bridge.is_shut_down());
    assert!(h.bridge.pending_transactions().is_empty());
    assert_eq!(h.bridge.open_databases(), 0);

    h.bridge.execute_sql(1, "d", "SELECT 2", None, "late", "late-err");
    h.settle(Duration::from_millis(100)).await;
    assert!(h.find("late").is_none());
    assert!(h.find("late-err").is_none());
}
