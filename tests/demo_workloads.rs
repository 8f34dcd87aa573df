use docstress::testing::InMemoryBackend;
use docstress::{MetricsRegistry, MetricsReport, Workload};
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

fn demo(name: &str) -> Workload {
    let path = format!("{}/demos/{name}", env!("CARGO_MANIFEST_DIR"));
    Workload::from_file(&path).unwrap_or_else(|e| panic!("{path}: {e}"))
}

#[test]
fn test_crud_demo_compiles() {
    let workload = demo("crud.yml");
    assert_eq!(workload.instance_count(), 5);
    assert_eq!(workload.phase_count(), 3);
    // The reader is unbounded in phase 1 and sits out the others
    assert_eq!(workload.blocking_per_phase(), vec![4, 4, 4]);
}

#[test]
fn test_multi_collection_update_demo_compiles() {
    let workload = demo("multi_collection_update.yml");
    assert_eq!(workload.instance_count(), 8);
    assert_eq!(workload.blocking_per_phase(), vec![8]);
}

#[test]
fn test_bulk_write_in_transaction_demo_compiles() {
    let workload = demo("bulk_write_in_transaction.yml");
    assert_eq!(workload.instance_count(), 2);
    assert_eq!(workload.phase_count(), 2);
}

#[test]
fn test_missing_workload_file() {
    assert!(Workload::from_file("/nonexistent/workload.yml").is_err());
}

#[tokio::test]
async fn test_bulk_write_in_transaction_demo_runs() {
    let workload = demo("bulk_write_in_transaction.yml");
    let backend = InMemoryBackend::new();
    let metrics = MetricsRegistry::new();

    let summary = workload
        .run(&backend, &metrics, CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(metrics.counter_total("insertedDocuments"), 200);
}

#[tokio::test]
async fn test_metrics_report_round_trips_through_json() {
    let workload = Workload::from_yaml(
        r#"
Database: test
Collection: c
Actors:
- Name: Writer
  Type: CrudActor
  Threads: 2
  Phases:
  - Repeat: 5
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
"#,
    )
    .unwrap();
    let backend = InMemoryBackend::new();
    let metrics = MetricsRegistry::new();
    workload
        .run(&backend, &metrics, CancellationToken::new())
        .await
        .unwrap();

    let mut file = NamedTempFile::new().unwrap();
    let report = metrics.snapshot();
    file.write_all(serde_json::to_string_pretty(&report).unwrap().as_bytes())
        .unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let parsed: MetricsReport = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed.total_operations(), 10);
    assert_eq!(parsed.total_failures(), 0);
    let inserted: u64 = parsed
        .counters
        .iter()
        .filter(|c| c.name == "insertedDocuments")
        .map(|c| c.value)
        .sum();
    assert_eq!(inserted, 10);
    assert!(parsed.timers.iter().all(|t| t.name == "insertOne"));
}
