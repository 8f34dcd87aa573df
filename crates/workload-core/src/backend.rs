//! The backend client interface.
//!
//! Actors talk to the data store only through [`BackendClient`]. Commands
//! carry already-evaluated documents; a client converts them to its native
//! encoding and reports affected-item counts back.

use crate::options::{OperationOptions, TransactionOptions};
use crate::values::Document;
use async_trait::async_trait;
use std::fmt;

/// Database and collection a command targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A single write, usable on its own or inside a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

impl WriteModel {
    /// Command name as used in workload files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertOne { .. } => "insertOne",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::ReplaceOne { .. } => "replaceOne",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
        }
    }
}

/// A fully evaluated command ready to send.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    Write(WriteModel),
    InsertMany { documents: Vec<Document> },
    BulkWrite { models: Vec<WriteModel> },
    CountDocuments { filter: Document },
    Find { filter: Document, limit: Option<i64> },
    Drop,
}

/// Affected-item counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

impl WriteCounts {
    pub fn inserted(n: u64) -> Self {
        Self {
            inserted: n,
            ..Self::default()
        }
    }

    pub fn deleted(n: u64) -> Self {
        Self {
            deleted: n,
            ..Self::default()
        }
    }

    pub fn updated(matched: u64, modified: u64, upserted: u64) -> Self {
        Self {
            matched,
            modified,
            upserted,
            ..Self::default()
        }
    }

    /// Add another set of counts into this one.
    pub fn merge(&mut self, other: &WriteCounts) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
    }
}

/// Result of one item inside a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Applied(WriteCounts),
    Failed(BackendError),
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Successful outcome of a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutcome {
    pub counts: WriteCounts,
    /// Documents counted or returned by read commands
    pub documents_returned: u64,
    /// Per-item outcomes for bulk writes, in submission order
    pub items: Vec<ItemOutcome>,
}

impl BackendOutcome {
    pub fn from_counts(counts: WriteCounts) -> Self {
        Self {
            counts,
            ..Self::default()
        }
    }

    pub fn returned(n: u64) -> Self {
        Self {
            documents_returned: n,
            ..Self::default()
        }
    }
}

/// A bulk write where at least one item failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteFailure {
    /// Number of items submitted
    pub submitted: usize,
    /// Outcomes of the attempted items; shorter than `submitted` when an
    /// ordered bulk write stopped early
    pub items: Vec<ItemOutcome>,
    /// Counts summed over the applied items
    pub counts: WriteCounts,
}

impl BulkWriteFailure {
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_failed()).count()
    }

    /// Transient only if every failed item was transient.
    pub fn is_transient(&self) -> bool {
        self.items.iter().all(|item| match item {
            ItemOutcome::Applied(_) => true,
            ItemOutcome::Failed(e) => e.is_transient(),
        })
    }
}

/// Errors reported by a backend client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Timeouts, network failures and server conditions that may clear up
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The server rejected the command
    #[error("Backend command failed: {0}")]
    Command(String),

    /// Session or transaction failure reported by the backend
    #[error("Backend session error: {0}")]
    Session(String),

    /// Connection could not be established
    #[error("Backend connection error: {0}")]
    Connection(String),

    #[error("Bulk write failed: {} of {} items attempted failed ({} submitted)", .0.failed_count(), .0.items.len(), .0.submitted)]
    BulkWrite(BulkWriteFailure),
}

impl BackendError {
    /// Whether retrying the identical command may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::BulkWrite(failure) => failure.is_transient(),
            Self::Command(_) | Self::Session(_) | Self::Connection(_) => false,
        }
    }
}

/// One actor's connection to the data store.
///
/// A client is owned by exactly one actor instance and is used sequentially,
/// so methods take `&mut self`. Transaction state lives in the client's
/// session; the engine tracks the logical state separately and only calls
/// `commit_transaction`/`abort_transaction` after a successful
/// `start_transaction`.
#[async_trait]
pub trait BackendClient: Send {
    /// Execute a command. `on_session` routes it through the active
    /// transaction's session.
    async fn execute(
        &mut self,
        namespace: &Namespace,
        command: &BackendCommand,
        options: &OperationOptions,
        on_session: bool,
    ) -> Result<BackendOutcome, BackendError>;

    async fn start_transaction(&mut self, options: &TransactionOptions)
        -> Result<(), BackendError>;

    async fn commit_transaction(&mut self) -> Result<(), BackendError>;

    async fn abort_transaction(&mut self) -> Result<(), BackendError>;
}

/// Opens one client per actor instance.
#[async_trait]
pub trait BackendClientFactory: Send + Sync {
    async fn connect(&self, actor: &str) -> Result<Box<dyn BackendClient>, BackendError>;
}

/// Applies one write model; the building block of [`apply_bulk_write`].
#[async_trait]
pub trait ApplyWrite: Send {
    async fn apply_write(
        &mut self,
        namespace: &Namespace,
        model: &WriteModel,
        options: &OperationOptions,
        on_session: bool,
    ) -> Result<WriteCounts, BackendError>;
}

/// Run a bulk write item by item.
///
/// Ordered bulk writes stop at the first failing item; unordered ones attempt
/// every item. Any failure turns the whole call into
/// [`BackendError::BulkWrite`] carrying every attempted item's outcome.
pub async fn apply_bulk_write<A: ApplyWrite + ?Sized>(
    applier: &mut A,
    namespace: &Namespace,
    models: &[WriteModel],
    options: &OperationOptions,
    on_session: bool,
) -> Result<BackendOutcome, BackendError> {
    let ordered = options.is_ordered();
    let mut counts = WriteCounts::default();
    let mut items = Vec::with_capacity(models.len());
    let mut failed = false;

    for model in models {
        match applier
            .apply_write(namespace, model, options, on_session)
            .await
        {
            Ok(item_counts) => {
                counts.merge(&item_counts);
                items.push(ItemOutcome::Applied(item_counts));
            }
            Err(e) => {
                failed = true;
                items.push(ItemOutcome::Failed(e));
                if ordered {
                    break;
                }
            }
        }
    }

    if failed {
        return Err(BackendError::BulkWrite(BulkWriteFailure {
            submitted: models.len(),
            items,
            counts,
        }));
    }

    Ok(BackendOutcome {
        counts,
        documents_returned: 0,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    /// Fails every model whose document or filter has `fail: true`.
    struct Scripted {
        attempted: usize,
        transient: bool,
    }

    #[async_trait]
    impl ApplyWrite for Scripted {
        async fn apply_write(
            &mut self,
            _namespace: &Namespace,
            model: &WriteModel,
            _options: &OperationOptions,
            _on_session: bool,
        ) -> Result<WriteCounts, BackendError> {
            self.attempted += 1;
            let doc = match model {
                WriteModel::InsertOne { document } => document,
                WriteModel::UpdateOne { filter, .. }
                | WriteModel::UpdateMany { filter, .. }
                | WriteModel::ReplaceOne { filter, .. }
                | WriteModel::DeleteOne { filter }
                | WriteModel::DeleteMany { filter } => filter,
            };
            if doc.contains_key("fail") {
                if self.transient {
                    Err(BackendError::Transient("try again".into()))
                } else {
                    Err(BackendError::Command("duplicate key".into()))
                }
            } else {
                Ok(WriteCounts::inserted(1))
            }
        }
    }

    fn models() -> Vec<WriteModel> {
        vec![
            WriteModel::InsertOne { document: doc! { "a" => 1 } },
            WriteModel::InsertOne { document: doc! { "fail" => true } },
            WriteModel::InsertOne { document: doc! { "a" => 3 } },
        ]
    }

    fn options(ordered: bool) -> OperationOptions {
        OperationOptions {
            ordered: Some(ordered),
            ..OperationOptions::default()
        }
    }

    #[tokio::test]
    async fn test_ordered_bulk_stops_at_first_failure() {
        let mut applier = Scripted { attempted: 0, transient: false };
        let ns = Namespace::new("db", "coll");
        let err = apply_bulk_write(&mut applier, &ns, &models(), &options(true), false)
            .await
            .unwrap_err();

        assert_eq!(applier.attempted, 2);
        match err {
            BackendError::BulkWrite(failure) => {
                assert_eq!(failure.submitted, 3);
                assert_eq!(failure.items.len(), 2);
                assert!(failure.items[1].is_failed());
                assert_eq!(failure.counts.inserted, 1);
            }
            other => panic!("expected bulk write failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unordered_bulk_attempts_all() {
        let mut applier = Scripted { attempted: 0, transient: false };
        let ns = Namespace::new("db", "coll");
        let err = apply_bulk_write(&mut applier, &ns, &models(), &options(false), false)
            .await
            .unwrap_err();

        assert_eq!(applier.attempted, 3);
        match err {
            BackendError::BulkWrite(failure) => {
                assert_eq!(failure.items.len(), 3);
                assert_eq!(failure.failed_count(), 1);
                assert_eq!(failure.counts.inserted, 2);
                assert!(!failure.is_transient());
            }
            other => panic!("expected bulk write failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bulk_transient_classification() {
        let mut applier = Scripted { attempted: 0, transient: true };
        let ns = Namespace::new("db", "coll");
        let err = apply_bulk_write(&mut applier, &ns, &models(), &options(false), false)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bulk_success_reports_items() {
        let mut applier = Scripted { attempted: 0, transient: false };
        let ns = Namespace::new("db", "coll");
        let models = vec![
            WriteModel::InsertOne { document: doc! { "a" => 1 } },
            WriteModel::InsertOne { document: doc! { "a" => 2 } },
        ];
        let outcome = apply_bulk_write(&mut applier, &ns, &models, &options(true), false)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.counts.inserted, 2);
    }
}
