//! Local Exchange Tests
//!
//! Properties that need no network:
//! - Round-trip through a local-only broadcast and the reader
//! - Empty results still produce a readable file
//! - Identifier validation
//! - Race-safe namespace creation
//! - Teardown removes only what a backend created
//! - Missing files degrade to warnings

use std::fs;
use std::sync::Arc;
use std::thread;

use aerodb_exchange::broadcast::{Broadcaster, DestinationSet};
use aerodb_exchange::connection::LocalOnly;
use aerodb_exchange::encoding::{ColumnType, CopyFormat, Row, Value};
use aerodb_exchange::namespace::{
    BackendId, DistributedTransactionId, NodeId, ResultNamespace, TransactionContext, UserId,
};
use aerodb_exchange::observability::ExchangeMetrics;
use aerodb_exchange::reader::ResultReader;
use aerodb_exchange::result_file::{is_valid_result_id, size_of, ResultId};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn context(dir: &TempDir, backend: u32) -> TransactionContext {
    TransactionContext::new(
        ResultNamespace::new(dir.path().join("result_cache")),
        UserId(10),
        BackendId(backend),
    )
}

fn transaction() -> DistributedTransactionId {
    DistributedTransactionId::new(NodeId(1), 77, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
}

fn sample_rows() -> Vec<Row> {
    vec![
        vec![
            Value::Int8(1),
            Value::Text("tab\there".into()),
            Value::Bool(true),
            Value::Float8(1.5),
        ],
        vec![Value::Int8(-7), Value::Null, Value::Bool(false), Value::Null],
        vec![
            Value::Int8(i64::MAX),
            Value::Text("back\\slash\nnewline".into()),
            Value::Null,
            Value::Float8(-0.25),
        ],
    ]
}

fn sample_schema() -> Vec<ColumnType> {
    vec![
        ColumnType::Int8,
        ColumnType::Text,
        ColumnType::Bool,
        ColumnType::Float8,
    ]
}

async fn write_local(ctx: &TransactionContext, id: &str, schema: &[ColumnType], rows: Vec<Row>) -> CopyFormat {
    let provider = LocalOnly;
    let broadcaster =
        Broadcaster::new(id, schema, DestinationSet::local_only(), ctx, &provider).unwrap();
    let format = broadcaster.format();
    let outcome = broadcaster.broadcast_rows(rows).await.unwrap();
    assert!(outcome.connections.is_empty());
    format
}

// =============================================================================
// Round-trip
// =============================================================================

#[tokio::test]
async fn test_round_trip_binary() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 1);
    let schema = sample_schema();

    let format = write_local(&ctx, "rt_binary", &schema, sample_rows()).await;
    assert_eq!(format, CopyFormat::Binary);

    let outcome = ResultReader::new(&ctx)
        .read_results(&["rt_binary"], &schema, format)
        .unwrap();
    assert_eq!(outcome.rows, sample_rows());
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn test_round_trip_text() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 1).with_binary_transfer(false);
    let schema = sample_schema();

    let format = write_local(&ctx, "rt_text", &schema, sample_rows()).await;
    assert_eq!(format, CopyFormat::Text);

    let outcome = ResultReader::new(&ctx)
        .read_results(&["rt_text"], &schema, format)
        .unwrap();
    assert_eq!(outcome.rows, sample_rows());
}

#[tokio::test]
async fn test_json_column_forces_text() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 1);
    let schema = vec![ColumnType::Int4, ColumnType::Json];
    let rows = vec![vec![
        Value::Int4(5),
        Value::Json(serde_json::json!({"k": [1, 2]})),
    ]];

    let format = write_local(&ctx, "with_json", &schema, rows.clone()).await;
    assert_eq!(format, CopyFormat::Text);

    let outcome = ResultReader::new(&ctx)
        .read_results(&["with_json"], &schema, format)
        .unwrap();
    assert_eq!(outcome.rows, rows);
}

#[tokio::test]
async fn test_zero_rows_round_trip() {
    let dir = TempDir::new().unwrap();

    for binary in [true, false] {
        let ctx = context(&dir, 1).with_binary_transfer(binary);
        let schema = vec![ColumnType::Int4];
        let format = write_local(&ctx, "empty", &schema, Vec::new()).await;

        // The file exists even though no rows arrived
        let size = size_of(ctx.namespace(), &ctx.scope(), "empty").unwrap();
        assert!(size.is_some());

        let outcome = ResultReader::new(&ctx)
            .read_results(&["empty"], &schema, format)
            .unwrap();
        assert!(outcome.rows.is_empty());
        assert!(outcome.warnings.is_empty());
    }
}

// =============================================================================
// Identifier validation
// =============================================================================

#[test]
fn test_identifier_validation() {
    assert!(is_valid_result_id(""));
    assert!(is_valid_result_id("a"));
    assert!(is_valid_result_id(&"x".repeat(255)));
    assert!(is_valid_result_id("repartition_3_from_102008_to_1"));
    assert!(is_valid_result_id("With-Dash_09"));

    for bad in ["../etc", "a b", "a.b", "a/b", "\u{e9}", "semi;colon"] {
        assert!(!is_valid_result_id(bad), "{} should be invalid", bad);
        let err = ResultId::new(bad).unwrap_err();
        assert_eq!(err.code().code(), "AERO_RESULT_ID_INVALID");
    }
}

#[tokio::test]
async fn test_invalid_identifier_rejected_without_io() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 1);
    let provider = LocalOnly;

    let result = Broadcaster::new(
        "bad/id",
        &[ColumnType::Int4],
        DestinationSet::local_only(),
        &ctx,
        &provider,
    );
    assert!(result.is_err());
    assert!(!dir.path().join("result_cache").exists());
}

// =============================================================================
// Namespace lifecycle
// =============================================================================

#[test]
fn test_concurrent_namespace_creation() {
    let dir = TempDir::new().unwrap();
    let metrics = Arc::new(ExchangeMetrics::new());

    let mut contexts: Vec<TransactionContext> = (0..8)
        .map(|backend| {
            let mut ctx = context(&dir, 100 + backend).with_metrics(Arc::clone(&metrics));
            ctx.assign_distributed_transaction(transaction()).unwrap();
            ctx
        })
        .collect();

    let paths: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = contexts
            .iter()
            .map(|ctx| s.spawn(move || ctx.ensure_namespace().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(paths.windows(2).all(|w| w[0] == w[1]));
    assert!(paths[0].is_dir());

    // Exactly one backend owns the directory
    let owners = contexts
        .iter()
        .filter(|ctx| ctx.registered_namespaces() == 1)
        .count();
    assert_eq!(owners, 1);
    assert_eq!(metrics.snapshot().namespaces_created, 1);

    for ctx in contexts.iter_mut() {
        ctx.end_transaction();
    }
    assert!(!paths[0].exists());
}

#[tokio::test]
async fn test_teardown_removes_only_own_namespace() {
    let dir = TempDir::new().unwrap();
    let mut first = context(&dir, 1);
    let second = context(&dir, 2);

    write_local(&first, "mine", &[ColumnType::Int4], vec![vec![Value::Int4(1)]]).await;
    write_local(&second, "theirs", &[ColumnType::Int4], vec![vec![Value::Int4(2)]]).await;

    let mine = first.namespace().resolve(&first.scope());
    let theirs = second.namespace().resolve(&second.scope());

    let summary = first.end_transaction();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.failed, 0);
    assert!(!mine.exists());
    assert!(theirs.join("theirs.data").exists());

    // Nothing left to remove
    let again = first.end_transaction();
    assert_eq!(again.removed, 0);

    // No rename leftovers
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("result_cache"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".removed-by-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_drop_tears_down_namespace() {
    let dir = TempDir::new().unwrap();
    let path = {
        let ctx = context(&dir, 3);
        write_local(&ctx, "scoped", &[ColumnType::Int4], Vec::new()).await;
        let path = ctx.namespace().resolve(&ctx.scope());
        assert!(path.is_dir());
        path
    };
    assert!(!path.exists());
}

#[test]
fn test_teardown_tolerates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let mut ctx = context(&dir, 4);
    let path = ctx.ensure_namespace().unwrap();
    fs::remove_dir_all(&path).unwrap();

    let summary = ctx.end_transaction();
    assert_eq!(summary.failed, 0);
}

// =============================================================================
// Missing-file tolerance
// =============================================================================

#[tokio::test]
async fn test_missing_file_is_warning_not_error() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, 1);
    let schema = vec![ColumnType::Int4];
    let format = write_local(&ctx, "present", &schema, vec![vec![Value::Int4(9)]]).await;

    let outcome = ResultReader::new(&ctx)
        .read_results(&["missing", "present"], &schema, format)
        .unwrap();

    assert_eq!(outcome.rows, vec![vec![Value::Int4(9)]]);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("missing"));
    assert!(outcome.warnings[0].contains("parallel process"));
}
