//! End-to-end workload runs against the in-memory backend.

use docstress::testing::InMemoryBackend;
use docstress::{ActorError, ActorIdentity, MetricsRegistry, RunSummary, Workload};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use workload_core::{doc, BackendError, Document, Namespace, Value};

async fn run(yaml: &str, backend: &InMemoryBackend) -> (RunSummary, MetricsRegistry) {
    let workload = assert_ok!(Workload::from_yaml(yaml));
    let metrics = MetricsRegistry::new();
    let summary = assert_ok!(
        workload
            .run(backend, &metrics, CancellationToken::new())
            .await
    );
    (summary, metrics)
}

fn ns(collection: &str) -> Namespace {
    Namespace::new("test", collection)
}

fn commands(backend: &InMemoryBackend) -> Vec<String> {
    backend.calls().into_iter().map(|c| c.command).collect()
}

#[tokio::test]
async fn test_repeat_three_inserts_counts_documents() {
    let yaml = r#"
Actors:
- Name: Inserter
  Type: CrudActor
  Database: test
  Phases:
  - Repeat: 3
    Collection: c
    Operations:
    - OperationName: insertOne
      OperationCommand:
        Document: { a: 1 }
"#;
    let backend = InMemoryBackend::new();
    let (summary, metrics) = run(yaml, &backend).await;

    assert!(summary.is_success());
    assert_eq!(backend.documents(&ns("c")).len(), 3);
    assert_eq!(
        metrics.counter_value(&ActorIdentity::new("Inserter", 0), "insertedDocuments"),
        Some(3)
    );
    let report = metrics.snapshot();
    assert_eq!(report.total_operations(), 3);
    assert_eq!(report.total_failures(), 0);
}

#[tokio::test]
async fn test_repeat_runs_exactly_n_iterations_per_instance() {
    let yaml = r#"
Actors:
- Name: Counter
  Type: CrudActor
  Threads: 3
  Database: test
  Collection: c
  Phases:
  - Repeat: 7
    Operation: { OperationName: countDocuments, OperationCommand: { Filter: {} } }
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert_eq!(summary.instances, 3);
    for instance in 0..3 {
        let actor = format!("Counter.{instance}");
        let count = backend.calls().iter().filter(|c| c.actor == actor).count();
        assert_eq!(count, 7, "{actor}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_min_delay_paces_iterations() {
    let yaml = r#"
Actors:
- Name: Paced
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - Repeat: 4
    MinDelay: 50 milliseconds
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    // Four iterations leave three gaps of at least MinDelay
    assert!(summary.elapsed >= Duration::from_millis(150));
    assert!(summary.elapsed < Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_duration_bounded_phase() {
    let yaml = r#"
Actors:
- Name: Timed
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - Duration: 100 milliseconds
    MinDelay: 10 milliseconds
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert!(summary.is_success());
    // Iterations start at 0, 10, ..., 90ms
    assert_eq!(backend.documents(&ns("c")).len(), 10);
    assert!(summary.elapsed >= Duration::from_millis(100));
    assert!(summary.elapsed < Duration::from_millis(110));
}

#[tokio::test(start_paused = true)]
async fn test_repeat_and_duration_both_required() {
    let yaml = r#"
Database: test
Actors:
- Name: RepeatMetFirst
  Type: CrudActor
  Phases:
  - Repeat: 3
    Duration: 100 milliseconds
    MinDelay: 10 milliseconds
    Collection: short
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
- Name: DurationMetFirst
  Type: CrudActor
  Phases:
  - Repeat: 15
    Duration: 50 milliseconds
    MinDelay: 10 milliseconds
    Collection: long
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert!(summary.is_success());
    assert_eq!(backend.documents(&ns("short")).len(), 10);
    assert_eq!(backend.documents(&ns("long")).len(), 15);
}

#[tokio::test]
async fn test_same_seed_same_documents() {
    let yaml = r#"
Seed: 99
Actors:
- Name: Random
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - Repeat: 20
    Operation:
      OperationName: insertOne
      OperationCommand:
        Document:
          n: { ^RandomInt: { min: 0, max: 1000000 } }
          s: { ^RandomString: { length: 12 } }
"#;
    let first = InMemoryBackend::new();
    let second = InMemoryBackend::new();
    run(yaml, &first).await;
    run(yaml, &second).await;

    let docs = first.documents(&ns("c"));
    assert_eq!(docs.len(), 20);
    assert_eq!(docs, second.documents(&ns("c")));

    let third = InMemoryBackend::new();
    run(&yaml.replace("Seed: 99", "Seed: 100"), &third).await;
    assert_ne!(docs, third.documents(&ns("c")));
}

const BULK_WRITE: &str = r#"
Actors:
- Name: Bulk
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - Repeat: 1
    Operation:
      OperationName: bulkWrite
      OperationCommand:
        WriteOperations:
        - WriteCommand: insertOne
          Document: { _id: 1 }
        - WriteCommand: insertOne
          Document: { _id: 2 }
        - WriteCommand: insertOne
          Document: { _id: 3 }
        Options:
          Ordered: ORDERED
"#;

fn ids(docs: &[Document]) -> Vec<i64> {
    let mut ids: Vec<i64> = docs
        .iter()
        .filter_map(|d| d.get("_id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_ordered_bulk_write_stops_at_first_failure() {
    let backend = InMemoryBackend::new();
    backend.insert(&ns("c"), vec![doc! { "_id" => 2 }]);
    let (summary, metrics) = run(&BULK_WRITE.replace("ORDERED", "true"), &backend).await;

    // Lenient by default: the failure is recorded, the actor carries on
    assert!(summary.is_success());
    assert_eq!(ids(&backend.documents(&ns("c"))), vec![1, 2]);
    assert_eq!(metrics.counter_total("insertedDocuments"), 1);
    assert_eq!(metrics.total_failures(), 1);
}

#[tokio::test]
async fn test_unordered_bulk_write_attempts_every_item() {
    let backend = InMemoryBackend::new();
    backend.insert(&ns("c"), vec![doc! { "_id" => 2 }]);
    let (_, metrics) = run(&BULK_WRITE.replace("ORDERED", "false"), &backend).await;

    assert_eq!(ids(&backend.documents(&ns("c"))), vec![1, 2, 3]);
    assert_eq!(metrics.counter_total("insertedDocuments"), 2);
    assert_eq!(metrics.total_failures(), 1);
}

#[tokio::test]
async fn test_on_session_before_start_transaction_is_usage_error() {
    let yaml = r#"
Actors:
- Name: Misuse
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - Repeat: 1
    Operation:
      OperationName: updateOne
      OperationCommand:
        Filter: { a: 1 }
        Update: { $set: { a: 2 } }
        OnSession: true
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert_eq!(summary.failures.len(), 1);
    match &summary.failures[0].error {
        ActorError::Operation { source, .. } => assert!(source.is_usage()),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_bulk_write_in_transaction() {
    let yaml = r#"
Actors:
- Name: BulkWriteInTransaction
  Type: CrudActor
  Database: test
  Collection: c
  ExecutionStrategy: { ThrowOnFailure: true }
  Phases:
  - Repeat: 1
    Operations:
    - OperationName: startTransaction
      OperationCommand:
        Options:
          WriteConcern: { Level: majority }
    - OperationName: bulkWrite
      OperationCommand:
        WriteOperations:
        - WriteCommand: insertOne
          Document: { a: 1 }
        - WriteCommand: updateOne
          Filter: { a: 1 }
          Update: { $set: { b: 2 } }
        OnSession: true
    - OperationName: commitTransaction
"#;
    let backend = InMemoryBackend::new();
    let (summary, metrics) = run(yaml, &backend).await;

    assert!(summary.is_success());
    assert_eq!(
        commands(&backend),
        vec!["startTransaction", "bulkWrite", "commitTransaction"]
    );
    assert!(backend.calls()[1].on_session);
    let docs = backend.documents(&ns("c"));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get("b"), Some(&Value::Int32(2)));
    assert_eq!(metrics.counter_total("insertedDocuments"), 1);
    assert_eq!(metrics.counter_total("updatedDocuments"), 1);
}

#[tokio::test]
async fn test_multi_collection_update_counts_modified() {
    let yaml = r#"
Actors:
- Name: MultiCollectionUpdate
  Type: MultiCollectionUpdate
  Database: test
  Phases:
  - Repeat: 10
    CollectionCount: 5
    UpdateFilter: { k: { $lt: 2 } }
    Update: { $inc: { n: 1 } }
"#;
    let backend = InMemoryBackend::new();
    for i in 0..5 {
        backend.insert(
            &ns(&format!("Collection{i}")),
            vec![
                doc! { "k" => 0, "n" => 0 },
                doc! { "k" => 1, "n" => 0 },
                doc! { "k" => 5, "n" => 0 },
            ],
        );
    }
    let (summary, metrics) = run(yaml, &backend).await;
    assert!(summary.is_success());

    let calls = backend.calls();
    assert_eq!(calls.len(), 10);
    for call in &calls {
        let collection = &call.namespace.as_ref().unwrap().collection;
        let number: u64 = collection.trim_start_matches("Collection").parse().unwrap();
        assert!(number < 5);
    }

    // Two documents match per update
    assert_eq!(metrics.counter_total("updatedDocuments"), 20);
}

#[tokio::test(start_paused = true)]
async fn test_idempotent_operation_retried_on_transient_failure() {
    let yaml = r#"
Actors:
- Name: Retrier
  Type: CrudActor
  Database: test
  Collection: c
  ExecutionStrategy: { ThrowOnFailure: true, Retries: 2 }
  Phases:
  - Repeat: 1
    Operation:
      OperationName: updateOne
      OperationCommand:
        Filter: { _id: 1 }
        Update: { $inc: { n: 1 } }
        Upsert: true
        Idempotent: true
"#;
    let backend = InMemoryBackend::new();
    backend.fail_next(2, BackendError::Transient("not primary".into()));
    let (summary, metrics) = run(yaml, &backend).await;

    assert!(summary.is_success());
    assert_eq!(backend.call_count(), 3);
    assert_eq!(backend.documents(&ns("c")).len(), 1);
    assert_eq!(metrics.total_failures(), 2);
    assert_eq!(metrics.counter_total("upsertedDocuments"), 1);
}

#[tokio::test]
async fn test_non_idempotent_operation_is_not_retried() {
    let yaml = r#"
Actors:
- Name: Once
  Type: CrudActor
  Database: test
  Collection: c
  ExecutionStrategy: { ThrowOnFailure: true, Retries: 5 }
  Phases:
  - Repeat: 1
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
"#;
    let backend = InMemoryBackend::new();
    backend.fail_next(1, BackendError::Transient("socket closed".into()));
    let (summary, _) = run(yaml, &backend).await;

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_unbounded_actor_released_when_bounded_actors_finish() {
    let yaml = r#"
Database: test
Collection: c
Actors:
- Name: Writer
  Type: CrudActor
  Threads: 2
  Phases:
  - Repeat: 5
    Operation: { OperationName: insertOne, OperationCommand: { Document: { a: 1 } } }
  - Repeat: 1
    Operation: { OperationName: drop }
- Name: Background
  Type: CrudActor
  Phases:
  - Operation: { OperationName: find, OperationCommand: { Filter: { a: 1 } } }
  - Nop: true
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert!(summary.is_success());
    let commands = commands(&backend);
    assert!(commands.iter().any(|c| c == "find"));
    // No find runs once the second phase has started
    let first_drop = commands.iter().position(|c| c == "drop").unwrap();
    assert!(commands[first_drop..].iter().all(|c| c == "drop"));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_actor_open_transaction_aborted_at_phase_end() {
    let yaml = r#"
Database: test
Collection: c
Actors:
- Name: Bounded
  Type: CrudActor
  Phases:
  - Repeat: 3
    MinDelay: 10 milliseconds
    Operation: { OperationName: countDocuments, OperationCommand: { Filter: {} } }
  - Nop: true
- Name: Open
  Type: CrudActor
  ExecutionStrategy: { ThrowOnFailure: true }
  Phases:
  - MinDelay: 1 second
    Operations:
    - OperationName: startTransaction
    - OperationName: insertOne
      OperationCommand:
        Document: { a: 1 }
        OnSession: true
  - Repeat: 1
    Operations:
    - OperationName: startTransaction
    - OperationName: commitTransaction
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert!(summary.is_success(), "{:?}", summary.failures);
    // Released when Bounded finishes, well before the next iteration is due
    assert!(summary.elapsed < Duration::from_secs(1));
    let open: Vec<String> = backend
        .calls()
        .into_iter()
        .filter(|c| c.actor == "Open.0")
        .map(|c| c.command)
        .collect();
    assert_eq!(
        open,
        vec![
            "startTransaction",
            "insertOne",
            "abortTransaction",
            "startTransaction",
            "commitTransaction"
        ]
    );
}

#[tokio::test]
async fn test_failing_actor_stops_the_workload() {
    let yaml = r#"
Database: test
Collection: c
Actors:
- Name: Strict
  Type: CrudActor
  ExecutionStrategy: { ThrowOnFailure: true }
  Phases:
  - Repeat: 1
    Operation: { OperationName: commitTransaction }
  - Repeat: 1
    Operation: { OperationName: drop }
- Name: Forever
  Type: CrudActor
  Phases:
  - MinDelay: 1 millisecond
    Operation: { OperationName: countDocuments, OperationCommand: { Filter: {} } }
  - Repeat: 1
    Operation: { OperationName: drop }
"#;
    let backend = InMemoryBackend::new();
    let (summary, _) = run(yaml, &backend).await;

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].actor, ActorIdentity::new("Strict", 0));
    assert!(!commands(&backend).iter().any(|c| c == "drop"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_unbounded_phase() {
    let yaml = r#"
Actors:
- Name: Poller
  Type: CrudActor
  Database: test
  Collection: c
  Phases:
  - MinDelay: 10 milliseconds
    Operation: { OperationName: countDocuments, OperationCommand: { Filter: {} } }
"#;
    let workload = assert_ok!(Workload::from_yaml(yaml));
    let backend = InMemoryBackend::new();
    let metrics = MetricsRegistry::new();
    let shutdown = CancellationToken::new();

    let stopper = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(95)).await;
            shutdown.cancel();
        })
    };
    let summary = assert_ok!(workload.run(&backend, &metrics, shutdown).await);
    assert_ok!(stopper.await);

    assert!(summary.is_success());
    assert_eq!(backend.call_count(), 10);
}

#[tokio::test]
async fn test_connection_failure_fails_the_run() {
    struct Unreachable;

    #[async_trait::async_trait]
    impl workload_core::BackendClientFactory for Unreachable {
        async fn connect(
            &self,
            _actor: &str,
        ) -> Result<Box<dyn workload_core::BackendClient>, BackendError> {
            Err(BackendError::Connection("connection refused".into()))
        }
    }

    let workload = assert_ok!(Workload::from_yaml(
        "Actors:\n- Name: A\n  Type: CrudActor\n  Phases:\n  - Nop: true\n"
    ));
    let result = workload
        .run(&Unreachable, &MetricsRegistry::new(), CancellationToken::new())
        .await;
    let err = assert_err!(result);
    assert!(format!("{err:#}").contains("connection refused"));
}
