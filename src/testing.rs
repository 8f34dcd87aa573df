//! In-memory backend for tests.
//!
//! Supports what the engine's tests need and no more: equality filters
//! (plus `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$exists`),
//! `$set`/`$inc`/`$unset` updates, unique `_id`, transactions as a session
//! flag (writes are not isolated and aborts do not roll back), and failure
//! injection.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use workload_core::{
    apply_bulk_write, ApplyWrite, BackendClient, BackendClientFactory, BackendCommand,
    BackendError, BackendOutcome, Document, Namespace, OperationOptions, TransactionOptions,
    Value, WriteCounts, WriteModel,
};

/// One call observed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub actor: String,
    pub command: String,
    pub namespace: Option<Namespace>,
    pub on_session: bool,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Namespace, Vec<Document>>,
    calls: Vec<RecordedCall>,
    failures: VecDeque<BackendError>,
    next_id: i64,
}

/// Shared store; clones and clients see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A client not tied to any actor name.
    pub fn client(&self) -> InMemoryClient {
        self.client_for("test")
    }

    pub fn client_for(&self, actor: &str) -> InMemoryClient {
        InMemoryClient {
            backend: self.clone(),
            actor: actor.to_string(),
            in_transaction: false,
        }
    }

    /// Make the next `count` document-level operations fail with `error`.
    pub fn fail_next(&self, count: usize, error: BackendError) {
        let mut state = self.lock();
        for _ in 0..count {
            state.failures.push_back(error.clone());
        }
    }

    /// Seed a collection.
    pub fn insert(&self, namespace: &Namespace, documents: Vec<Document>) {
        self.lock()
            .collections
            .entry(namespace.clone())
            .or_default()
            .extend(documents);
    }

    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.lock()
            .collections
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn record(&self, actor: &str, command: &str, namespace: Option<&Namespace>, on_session: bool) {
        self.lock().calls.push(RecordedCall {
            actor: actor.to_string(),
            command: command.to_string(),
            namespace: namespace.cloned(),
            on_session,
        });
    }

    fn take_failure(&self) -> Option<BackendError> {
        self.lock().failures.pop_front()
    }

    fn apply(
        &self,
        namespace: &Namespace,
        model: &WriteModel,
    ) -> Result<WriteCounts, BackendError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut state = self.lock();
        let State {
            collections,
            next_id,
            ..
        } = &mut *state;
        let docs = collections.entry(namespace.clone()).or_default();

        match model {
            WriteModel::InsertOne { document } => {
                insert(docs, next_id, document.clone())?;
                Ok(WriteCounts::inserted(1))
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => update_docs(docs, next_id, filter, update, *upsert, false),
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => update_docs(docs, next_id, filter, update, *upsert, true),
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => replace_doc(docs, next_id, filter, replacement, *upsert),
            WriteModel::DeleteOne { filter } => {
                match docs.iter().position(|d| matches_filter(d, filter)) {
                    Some(i) => {
                        docs.remove(i);
                        Ok(WriteCounts::deleted(1))
                    }
                    None => Ok(WriteCounts::deleted(0)),
                }
            }
            WriteModel::DeleteMany { filter } => {
                let before = docs.len();
                docs.retain(|d| !matches_filter(d, filter));
                Ok(WriteCounts::deleted((before - docs.len()) as u64))
            }
        }
    }

    fn insert_many(
        &self,
        namespace: &Namespace,
        documents: &[Document],
        ordered: bool,
    ) -> Result<WriteCounts, BackendError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut state = self.lock();
        let State {
            collections,
            next_id,
            ..
        } = &mut *state;
        let docs = collections.entry(namespace.clone()).or_default();

        let mut inserted = 0;
        let mut first_error = None;
        for document in documents {
            match insert(docs, next_id, document.clone()) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                    if ordered {
                        break;
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(WriteCounts::inserted(inserted)),
        }
    }

    fn read(
        &self,
        namespace: &Namespace,
        filter: &Document,
        limit: Option<i64>,
    ) -> Result<u64, BackendError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let state = self.lock();
        let matched = state
            .collections
            .get(namespace)
            .map(|docs| docs.iter().filter(|d| matches_filter(d, filter)).count() as u64)
            .unwrap_or(0);
        Ok(match limit.map(i64::unsigned_abs) {
            Some(n) if n > 0 => matched.min(n),
            _ => matched,
        })
    }

    fn drop_collection(&self, namespace: &Namespace) -> Result<(), BackendError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.lock().collections.remove(namespace);
        Ok(())
    }
}

#[async_trait]
impl BackendClientFactory for InMemoryBackend {
    async fn connect(&self, actor: &str) -> Result<Box<dyn BackendClient>, BackendError> {
        Ok(Box::new(self.client_for(actor)))
    }
}

/// One actor's handle on an [`InMemoryBackend`].
#[derive(Debug)]
pub struct InMemoryClient {
    backend: InMemoryBackend,
    actor: String,
    in_transaction: bool,
}

impl InMemoryClient {
    fn check_session(&self, on_session: bool) -> Result<(), BackendError> {
        if on_session && !self.in_transaction {
            return Err(BackendError::Session(
                "operation sent on a session with no transaction".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ApplyWrite for InMemoryClient {
    async fn apply_write(
        &mut self,
        namespace: &Namespace,
        model: &WriteModel,
        _options: &OperationOptions,
        on_session: bool,
    ) -> Result<WriteCounts, BackendError> {
        self.check_session(on_session)?;
        self.backend.apply(namespace, model)
    }
}

#[async_trait]
impl BackendClient for InMemoryClient {
    async fn execute(
        &mut self,
        namespace: &Namespace,
        command: &BackendCommand,
        options: &OperationOptions,
        on_session: bool,
    ) -> Result<BackendOutcome, BackendError> {
        let name = match command {
            BackendCommand::Write(model) => model.name(),
            BackendCommand::InsertMany { .. } => "insertMany",
            BackendCommand::BulkWrite { .. } => "bulkWrite",
            BackendCommand::CountDocuments { .. } => "countDocuments",
            BackendCommand::Find { .. } => "find",
            BackendCommand::Drop => "drop",
        };
        self.backend
            .record(&self.actor, name, Some(namespace), on_session);
        self.check_session(on_session)?;

        match command {
            BackendCommand::Write(model) => self
                .backend
                .apply(namespace, model)
                .map(BackendOutcome::from_counts),
            BackendCommand::InsertMany { documents } => self
                .backend
                .insert_many(namespace, documents, options.is_ordered())
                .map(BackendOutcome::from_counts),
            BackendCommand::BulkWrite { models } => {
                apply_bulk_write(self, namespace, models, options, on_session).await
            }
            BackendCommand::CountDocuments { filter } => self
                .backend
                .read(namespace, filter, None)
                .map(BackendOutcome::returned),
            BackendCommand::Find { filter, limit } => self
                .backend
                .read(namespace, filter, *limit)
                .map(BackendOutcome::returned),
            BackendCommand::Drop => self
                .backend
                .drop_collection(namespace)
                .map(|()| BackendOutcome::default()),
        }
    }

    async fn start_transaction(
        &mut self,
        _options: &TransactionOptions,
    ) -> Result<(), BackendError> {
        self.backend
            .record(&self.actor, "startTransaction", None, true);
        if self.in_transaction {
            return Err(BackendError::Session(
                "transaction already in progress".to_string(),
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), BackendError> {
        self.backend
            .record(&self.actor, "commitTransaction", None, true);
        self.check_session(true)?;
        self.in_transaction = false;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), BackendError> {
        self.backend
            .record(&self.actor, "abortTransaction", None, true);
        self.check_session(true)?;
        self.in_transaction = false;
        Ok(())
    }
}

fn insert(
    docs: &mut Vec<Document>,
    next_id: &mut i64,
    mut document: Document,
) -> Result<(), BackendError> {
    match document.get("_id") {
        Some(id) => {
            if docs
                .iter()
                .any(|d| d.get("_id").is_some_and(|existing| existing.matches(id)))
            {
                return Err(BackendError::Command(format!(
                    "E11000 duplicate key error: _id {id}"
                )));
            }
        }
        None => {
            *next_id += 1;
            document.shift_insert(0, "_id".to_string(), Value::Int64(*next_id));
        }
    }
    docs.push(document);
    Ok(())
}

fn update_docs(
    docs: &mut Vec<Document>,
    next_id: &mut i64,
    filter: &Document,
    update: &Document,
    upsert: bool,
    multi: bool,
) -> Result<WriteCounts, BackendError> {
    check_operator_update(update)?;

    let mut matched = 0;
    let mut modified = 0;
    for doc in docs.iter_mut().filter(|d| matches_filter(d, filter)) {
        matched += 1;
        let before = doc.clone();
        apply_update(doc, update)?;
        if *doc != before {
            modified += 1;
        }
        if !multi {
            break;
        }
    }

    if matched == 0 && upsert {
        let mut doc = equality_fields(filter);
        apply_update(&mut doc, update)?;
        insert(docs, next_id, doc)?;
        return Ok(WriteCounts::updated(0, 0, 1));
    }
    Ok(WriteCounts::updated(matched, modified, 0))
}

fn replace_doc(
    docs: &mut Vec<Document>,
    next_id: &mut i64,
    filter: &Document,
    replacement: &Document,
    upsert: bool,
) -> Result<WriteCounts, BackendError> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(BackendError::Command(
            "replacement document must not contain update operators".to_string(),
        ));
    }

    match docs.iter_mut().find(|d| matches_filter(d, filter)) {
        Some(doc) => {
            let mut new_doc = replacement.clone();
            if let Some(id) = doc.get("_id") {
                new_doc.shift_insert(0, "_id".to_string(), id.clone());
            }
            let modified = u64::from(*doc != new_doc);
            *doc = new_doc;
            Ok(WriteCounts::updated(1, modified, 0))
        }
        None if upsert => {
            let mut doc = equality_fields(filter);
            doc.extend(replacement.clone());
            insert(docs, next_id, doc)?;
            Ok(WriteCounts::updated(0, 0, 1))
        }
        None => Ok(WriteCounts::updated(0, 0, 0)),
    }
}

fn check_operator_update(update: &Document) -> Result<(), BackendError> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(BackendError::Command(
            "update document requires atomic operators".to_string(),
        ));
    }
    Ok(())
}

fn apply_update(doc: &mut Document, update: &Document) -> Result<(), BackendError> {
    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            BackendError::Command(format!("{operator} expects a document"))
        })?;
        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => {
                    let current = get_path(doc, path).cloned().unwrap_or(Value::Int32(0));
                    set_path(doc, path, add(&current, value)?);
                }
                other => {
                    return Err(BackendError::Command(format!(
                        "unsupported update operator {other}"
                    )))
                }
            }
        }
    }
    Ok(())
}

fn add(current: &Value, increment: &Value) -> Result<Value, BackendError> {
    match (current, increment) {
        (Value::Double(_), _) | (_, Value::Double(_)) => {
            match (current.as_f64(), increment.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Double(a + b)),
                _ => Err(BackendError::Command("$inc on a non-numeric field".to_string())),
            }
        }
        _ => match (current.as_i64(), increment.as_i64()) {
            (Some(a), Some(b)) => a
                .checked_add(b)
                .map(Value::int)
                .ok_or_else(|| BackendError::Command("$inc overflow".to_string())),
            _ => Err(BackendError::Command("$inc on a non-numeric field".to_string())),
        },
    }
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Document::new()));
            if !matches!(entry, Value::Document(_)) {
                *entry = Value::Document(Document::new());
            }
            if let Value::Document(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.shift_remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

fn equality_fields(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(k, v)| !k.starts_with('$') && !is_operator_doc(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_operator_doc(value: &Value) -> bool {
    value
        .as_document()
        .is_some_and(|d| !d.is_empty() && d.keys().all(|k| k.starts_with('$')))
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(path, expected)| {
        let actual = get_path(doc, path);
        match expected {
            Value::Document(ops) if is_operator_doc(expected) => {
                ops.iter().all(|(op, arg)| matches_operator(actual, op, arg))
            }
            _ => actual.is_some_and(|a| a.matches(expected)),
        }
    })
}

fn matches_operator(actual: Option<&Value>, op: &str, arg: &Value) -> bool {
    match op {
        "$eq" => actual.is_some_and(|a| a.matches(arg)),
        "$ne" => !actual.is_some_and(|a| a.matches(arg)),
        "$gt" => compare(actual, arg) == Some(Ordering::Greater),
        "$gte" => matches!(compare(actual, arg), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(actual, arg) == Some(Ordering::Less),
        "$lte" => matches!(compare(actual, arg), Some(Ordering::Less | Ordering::Equal)),
        "$in" => match arg {
            Value::Array(items) => actual.is_some_and(|a| items.iter().any(|i| a.matches(i))),
            _ => false,
        },
        "$exists" => {
            let wanted = !matches!(arg, Value::Bool(false) | Value::Int32(0) | Value::Int64(0));
            actual.is_some() == wanted
        }
        _ => false,
    }
}

fn compare(actual: Option<&Value>, arg: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual.as_f64(), arg.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual.as_str(), arg.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::doc;

    fn ns() -> Namespace {
        Namespace::new("db", "coll")
    }

    async fn run(
        client: &mut InMemoryClient,
        model: WriteModel,
    ) -> Result<BackendOutcome, BackendError> {
        client
            .execute(&ns(), &BackendCommand::Write(model), &OperationOptions::default(), false)
            .await
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_rejects_duplicates() {
        let backend = InMemoryBackend::new();
        let mut client = backend.client();

        run(&mut client, WriteModel::InsertOne { document: doc! { "a" => 1 } })
            .await
            .unwrap();
        let docs = backend.documents(&ns());
        assert!(docs[0].contains_key("_id"));

        run(&mut client, WriteModel::InsertOne { document: doc! { "_id" => 7 } })
            .await
            .unwrap();
        let err = run(&mut client, WriteModel::InsertOne { document: doc! { "_id" => 7i64 } })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Command(_)));
    }

    #[tokio::test]
    async fn test_update_many_counts_only_changed_documents() {
        let backend = InMemoryBackend::new();
        backend.insert(
            &ns(),
            vec![doc! { "a" => 1 }, doc! { "a" => 1 }, doc! { "a" => 5 }],
        );
        let mut client = backend.client();

        let outcome = run(
            &mut client,
            WriteModel::UpdateMany {
                filter: doc! { "a" => doc! { "$in" => Value::Array(vec![1.into(), 5.into()]) } },
                update: doc! { "$set" => doc! { "a" => 5 } },
                upsert: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.counts.matched, 3);
        assert_eq!(outcome.counts.modified, 2);
    }

    #[tokio::test]
    async fn test_inc_unset_and_nested_set() {
        let backend = InMemoryBackend::new();
        backend.insert(&ns(), vec![doc! { "_id" => 1, "n" => 1, "gone" => true }]);
        let mut client = backend.client();

        run(
            &mut client,
            WriteModel::UpdateOne {
                filter: doc! { "_id" => 1 },
                update: doc! {
                    "$inc" => doc! { "n" => 2 },
                    "$unset" => doc! { "gone" => "" },
                    "$set" => doc! { "sub.x" => "y" },
                },
                upsert: false,
            },
        )
        .await
        .unwrap();

        let doc = &backend.documents(&ns())[0];
        assert_eq!(doc.get("n"), Some(&Value::Int32(3)));
        assert!(!doc.contains_key("gone"));
        assert_eq!(get_path(doc, "sub.x"), Some(&Value::from("y")));
    }

    #[tokio::test]
    async fn test_upsert_builds_from_filter() {
        let backend = InMemoryBackend::new();
        let mut client = backend.client();
        let outcome = run(
            &mut client,
            WriteModel::UpdateOne {
                filter: doc! { "k" => "x", "n" => doc! { "$gt" => 3 } },
                update: doc! { "$set" => doc! { "v" => 1 } },
                upsert: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.counts.upserted, 1);
        let doc = &backend.documents(&ns())[0];
        assert_eq!(doc.get("k"), Some(&Value::from("x")));
        assert!(!doc.contains_key("n"));
    }

    #[tokio::test]
    async fn test_replace_keeps_id() {
        let backend = InMemoryBackend::new();
        backend.insert(&ns(), vec![doc! { "_id" => 1, "a" => 1 }]);
        let mut client = backend.client();
        run(
            &mut client,
            WriteModel::ReplaceOne {
                filter: doc! { "a" => 1 },
                replacement: doc! { "b" => 2 },
                upsert: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(backend.documents(&ns())[0], doc! { "_id" => 1, "b" => 2 });
    }

    #[tokio::test]
    async fn test_count_find_and_delete() {
        let backend = InMemoryBackend::new();
        backend.insert(
            &ns(),
            vec![doc! { "a" => 1 }, doc! { "a" => 1 }, doc! { "a" => 2 }],
        );
        let mut client = backend.client();
        let options = OperationOptions::default();

        let count = client
            .execute(
                &ns(),
                &BackendCommand::CountDocuments {
                    filter: doc! { "a" => 1 },
                },
                &options,
                false,
            )
            .await
            .unwrap();
        assert_eq!(count.documents_returned, 2);

        let found = client
            .execute(
                &ns(),
                &BackendCommand::Find {
                    filter: Document::new(),
                    limit: Some(2),
                },
                &options,
                false,
            )
            .await
            .unwrap();
        assert_eq!(found.documents_returned, 2);

        let deleted = run(&mut client, WriteModel::DeleteMany { filter: doc! { "a" => 1 } })
            .await
            .unwrap();
        assert_eq!(deleted.counts.deleted, 2);

        client
            .execute(&ns(), &BackendCommand::Drop, &options, false)
            .await
            .unwrap();
        assert!(backend.documents(&ns()).is_empty());
    }

    #[tokio::test]
    async fn test_transaction_flag() {
        let backend = InMemoryBackend::new();
        let mut client = backend.client();
        let options = TransactionOptions::default();

        assert!(client.commit_transaction().await.is_err());
        client.start_transaction(&options).await.unwrap();
        assert!(client.start_transaction(&options).await.is_err());
        client
            .execute(
                &ns(),
                &BackendCommand::Write(WriteModel::InsertOne { document: doc! { "a" => 1 } }),
                &OperationOptions::default(),
                true,
            )
            .await
            .unwrap();
        client.commit_transaction().await.unwrap();
        assert_eq!(backend.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_injected_failures_consumed_in_order() {
        let backend = InMemoryBackend::new();
        backend.fail_next(1, BackendError::Transient("blip".into()));
        let mut client = backend.client();

        assert!(run(&mut client, WriteModel::InsertOne { document: doc! { "a" => 1 } })
            .await
            .unwrap_err()
            .is_transient());
        run(&mut client, WriteModel::InsertOne { document: doc! { "a" => 1 } })
            .await
            .unwrap();
    }
}
