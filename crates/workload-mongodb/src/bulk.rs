//! Client-level `bulkWrite`: the whole batch goes to the server in one call.
//!
//! The server reports per-item results keyed by submission index. This module
//! turns them back into [`ItemOutcome`]s in submission order so the engine sees
//! the same shape whichever backend ran the batch.

use crate::convert::to_bson_document;
use crate::error::classify;
use mongodb::error::{ErrorKind, PartialBulkWriteResult, WriteError};
use mongodb::options::{
    DeleteManyModel, DeleteOneModel, InsertOneModel, ReplaceOneModel, UpdateManyModel,
    UpdateOneModel, WriteModel as DriverWriteModel,
};
use mongodb::results::VerboseBulkWriteResult;
use mongodb::Namespace as DriverNamespace;
use std::collections::BTreeMap;
use workload_core::{
    BackendError, BackendOutcome, BulkWriteFailure, ItemOutcome, WriteCounts, WriteModel,
};

/// Translate write models for one namespace into driver models.
pub fn driver_models(namespace: &DriverNamespace, models: &[WriteModel]) -> Vec<DriverWriteModel> {
    models
        .iter()
        .map(|model| driver_model(namespace, model))
        .collect()
}

fn driver_model(namespace: &DriverNamespace, model: &WriteModel) -> DriverWriteModel {
    let ns = namespace.clone();
    match model {
        WriteModel::InsertOne { document } => InsertOneModel::builder()
            .namespace(ns)
            .document(to_bson_document(document))
            .build()
            .into(),
        WriteModel::UpdateOne {
            filter,
            update,
            upsert,
        } => UpdateOneModel::builder()
            .namespace(ns)
            .filter(to_bson_document(filter))
            .update(to_bson_document(update))
            .upsert(*upsert)
            .build()
            .into(),
        WriteModel::UpdateMany {
            filter,
            update,
            upsert,
        } => UpdateManyModel::builder()
            .namespace(ns)
            .filter(to_bson_document(filter))
            .update(to_bson_document(update))
            .upsert(*upsert)
            .build()
            .into(),
        WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => ReplaceOneModel::builder()
            .namespace(ns)
            .filter(to_bson_document(filter))
            .replacement(to_bson_document(replacement))
            .upsert(*upsert)
            .build()
            .into(),
        WriteModel::DeleteOne { filter } => DeleteOneModel::builder()
            .namespace(ns)
            .filter(to_bson_document(filter))
            .build()
            .into(),
        WriteModel::DeleteMany { filter } => DeleteManyModel::builder()
            .namespace(ns)
            .filter(to_bson_document(filter))
            .build()
            .into(),
    }
}

fn applied_counts(result: &VerboseBulkWriteResult) -> BTreeMap<usize, WriteCounts> {
    let mut applied = BTreeMap::new();
    for index in result.insert_results.keys() {
        applied.insert(*index, WriteCounts::inserted(1));
    }
    for (index, update) in &result.update_results {
        applied.insert(
            *index,
            WriteCounts::updated(
                update.matched_count,
                update.modified_count,
                u64::from(update.upserted_id.is_some()),
            ),
        );
    }
    for (index, delete) in &result.delete_results {
        applied.insert(*index, WriteCounts::deleted(delete.deleted_count));
    }
    applied
}

fn item_error(err: &WriteError) -> BackendError {
    BackendError::Command(format!("{} (code {})", err.message, err.code))
}

/// Outcome of a bulk write the server applied in full.
pub fn completed(submitted: usize, result: &VerboseBulkWriteResult) -> BackendOutcome {
    assemble(submitted, true, applied_counts(result), BTreeMap::new()).unwrap_or_default()
}

/// Classify a failed bulk write. Per-item write errors become a
/// [`BackendError::BulkWrite`]; anything else is classified as a whole.
pub fn failed(submitted: usize, ordered: bool, err: &mongodb::error::Error) -> BackendError {
    let ErrorKind::BulkWrite(bulk) = err.kind.as_ref() else {
        return classify(err);
    };
    if bulk.write_errors.is_empty() {
        return classify(err);
    }
    let applied = match &bulk.partial_result {
        Some(PartialBulkWriteResult::Verbose(result)) => applied_counts(result),
        _ => BTreeMap::new(),
    };
    let failures = bulk
        .write_errors
        .iter()
        .map(|(index, e)| (*index, item_error(e)))
        .collect();
    match assemble(submitted, ordered, applied, failures) {
        Err(e) => e,
        Ok(_) => classify(err),
    }
}

/// Lay out item outcomes in submission order.
///
/// Ordered batches report items up to and including the first failure;
/// unordered batches report every item. An acknowledged item with no
/// per-item result counts as applied with no changes.
pub(crate) fn assemble(
    submitted: usize,
    ordered: bool,
    mut applied: BTreeMap<usize, WriteCounts>,
    mut failures: BTreeMap<usize, BackendError>,
) -> Result<BackendOutcome, BackendError> {
    let attempted = match failures.keys().next() {
        Some(first) if ordered => (first + 1).min(submitted),
        _ => submitted,
    };

    let mut counts = WriteCounts::default();
    let mut items = Vec::with_capacity(attempted);
    for index in 0..attempted {
        match failures.remove(&index) {
            Some(e) => items.push(ItemOutcome::Failed(e)),
            None => {
                let item_counts = applied.remove(&index).unwrap_or_default();
                counts.merge(&item_counts);
                items.push(ItemOutcome::Applied(item_counts));
            }
        }
    }

    if items.iter().any(ItemOutcome::is_failed) {
        return Err(BackendError::BulkWrite(BulkWriteFailure {
            submitted,
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
    use workload_core::doc;

    fn duplicate_key() -> BackendError {
        BackendError::Command("E11000 duplicate key error (code 11000)".to_string())
    }

    fn applied(entries: &[(usize, WriteCounts)]) -> BTreeMap<usize, WriteCounts> {
        entries.iter().cloned().collect()
    }

    #[test]
    fn test_full_batch_sums_item_counts() {
        let outcome = assemble(
            3,
            true,
            applied(&[
                (0, WriteCounts::inserted(1)),
                (1, WriteCounts::updated(1, 1, 0)),
                (2, WriteCounts::deleted(1)),
            ]),
            BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.counts.inserted, 1);
        assert_eq!(outcome.counts.modified, 1);
        assert_eq!(outcome.counts.deleted, 1);
    }

    #[test]
    fn test_ordered_failure_truncates_items() {
        let err = assemble(
            4,
            true,
            applied(&[(0, WriteCounts::inserted(1))]),
            BTreeMap::from([(1, duplicate_key())]),
        )
        .unwrap_err();

        let BackendError::BulkWrite(failure) = err else {
            panic!("expected a bulk write failure");
        };
        assert_eq!(failure.submitted, 4);
        assert_eq!(failure.items.len(), 2);
        assert_eq!(failure.failed_count(), 1);
        assert_eq!(failure.counts.inserted, 1);
        assert!(!failure.is_transient());
    }

    #[test]
    fn test_unordered_failure_reports_every_item() {
        let err = assemble(
            3,
            false,
            applied(&[(0, WriteCounts::inserted(1)), (2, WriteCounts::inserted(1))]),
            BTreeMap::from([(1, duplicate_key())]),
        )
        .unwrap_err();

        let BackendError::BulkWrite(failure) = err else {
            panic!("expected a bulk write failure");
        };
        assert_eq!(failure.items.len(), 3);
        assert!(failure.items[1].is_failed());
        assert_eq!(failure.counts.inserted, 2);
    }

    #[test]
    fn test_driver_models_keep_order_and_namespace() {
        let ns = DriverNamespace {
            db: "db".to_string(),
            coll: "coll".to_string(),
        };
        let models = driver_models(
            &ns,
            &[
                WriteModel::InsertOne {
                    document: doc! { "a" => 1 },
                },
                WriteModel::DeleteOne {
                    filter: doc! { "a" => 1 },
                },
            ],
        );

        assert_eq!(models.len(), 2);
        assert!(matches!(&models[0], DriverWriteModel::InsertOne(m) if m.namespace == ns));
        assert!(matches!(&models[1], DriverWriteModel::DeleteOne(m) if m.namespace == ns));
    }
}
