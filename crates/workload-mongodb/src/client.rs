//! [`BackendClient`] over the MongoDB driver.

use crate::bulk;
use crate::convert::{to_bson_document, transaction_options, CommandOptions};
use crate::error::MongoBackendError;
use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use mongodb::options::{
    CountOptions, DeleteOptions, DropCollectionOptions, FindOptions, InsertManyOptions,
    InsertOneOptions, ReplaceOptions, UpdateOptions,
};
use mongodb::results::UpdateResult;
use mongodb::{Client, ClientSession, Collection};
use tracing::{debug, info};
use workload_core::{
    BackendClient, BackendClientFactory, BackendCommand, BackendError, BackendOutcome, Namespace,
    OperationOptions, TransactionOptions, WriteCounts, WriteModel,
};

/// Shares one driver connection pool between every actor instance.
#[derive(Clone)]
pub struct MongoClientFactory {
    client: Client,
}

impl MongoClientFactory {
    /// Connect and verify the deployment answers a ping.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let factory = MongoClientFactory::from_uri("mongodb://localhost:27017").await?;
    /// ```
    pub async fn from_uri(uri: &str) -> Result<Self, MongoBackendError> {
        let client = Client::with_uri_str(uri).await?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        info!("Connected to MongoDB");
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendClientFactory for MongoClientFactory {
    async fn connect(&self, actor: &str) -> Result<Box<dyn BackendClient>, BackendError> {
        Ok(Box::new(MongoBackendClient::new(self.client.clone(), actor)))
    }
}

/// One actor instance's view of the deployment. Holds the instance's own
/// session once a transaction has been started.
pub struct MongoBackendClient {
    client: Client,
    actor: String,
    session: Option<ClientSession>,
}

impl MongoBackendClient {
    pub fn new(client: Client, actor: impl Into<String>) -> Self {
        Self {
            client,
            actor: actor.into(),
            session: None,
        }
    }

    fn collection(&self, namespace: &Namespace) -> Collection<BsonDocument> {
        self.client
            .database(&namespace.database)
            .collection(&namespace.collection)
    }

    fn session_for(
        &mut self,
        on_session: bool,
        command: &str,
    ) -> Result<Option<&mut ClientSession>, MongoBackendError> {
        if !on_session {
            return Ok(None);
        }
        match self.session.as_mut() {
            Some(session) => Ok(Some(session)),
            None => Err(MongoBackendError::NoSession(format!(
                "{command} requested OnSession without a started transaction"
            ))),
        }
    }

    async fn write(
        &mut self,
        namespace: &Namespace,
        model: &WriteModel,
        options: &CommandOptions,
        on_session: bool,
    ) -> Result<WriteCounts, MongoBackendError> {
        let coll = self.collection(namespace);
        let session = self.session_for(on_session, model.name())?;

        match model {
            WriteModel::InsertOne { document } => {
                let mut opts = InsertOneOptions::default();
                opts.write_concern = options.write_concern.clone();
                let action = coll
                    .insert_one(to_bson_document(document))
                    .with_options(opts);
                match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(WriteCounts::inserted(1))
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let action = coll
                    .update_one(to_bson_document(filter), to_bson_document(update))
                    .with_options(update_options(options, *upsert));
                let result = match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(update_counts(&result))
            }
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let action = coll
                    .update_many(to_bson_document(filter), to_bson_document(update))
                    .with_options(update_options(options, *upsert));
                let result = match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(update_counts(&result))
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let mut opts = ReplaceOptions::default();
                opts.upsert = Some(*upsert);
                opts.write_concern = options.write_concern.clone();
                let action = coll
                    .replace_one(to_bson_document(filter), to_bson_document(replacement))
                    .with_options(opts);
                let result = match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(update_counts(&result))
            }
            WriteModel::DeleteOne { filter } => {
                let action = coll
                    .delete_one(to_bson_document(filter))
                    .with_options(delete_options(options));
                let result = match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(WriteCounts::deleted(result.deleted_count))
            }
            WriteModel::DeleteMany { filter } => {
                let action = coll
                    .delete_many(to_bson_document(filter))
                    .with_options(delete_options(options));
                let result = match session {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(WriteCounts::deleted(result.deleted_count))
            }
        }
    }

    async fn run_command(
        &mut self,
        namespace: &Namespace,
        command: &BackendCommand,
        options: &OperationOptions,
        on_session: bool,
    ) -> Result<BackendOutcome, MongoBackendError> {
        let driver_options = CommandOptions::from_options(options)?;
        let coll = self.collection(namespace);

        match command {
            BackendCommand::Write(model) => {
                let counts = self
                    .write(namespace, model, &driver_options, on_session)
                    .await?;
                Ok(BackendOutcome::from_counts(counts))
            }
            BackendCommand::InsertMany { documents } => {
                let mut opts = InsertManyOptions::default();
                opts.ordered = Some(driver_options.ordered);
                opts.write_concern = driver_options.write_concern;
                let docs: Vec<BsonDocument> = documents.iter().map(to_bson_document).collect();
                let action = coll.insert_many(docs).with_options(opts);
                let result = match self.session_for(on_session, "insertMany")? {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(BackendOutcome::from_counts(WriteCounts::inserted(
                    result.inserted_ids.len() as u64,
                )))
            }
            BackendCommand::BulkWrite { models } => {
                self.bulk_write(namespace, models, &driver_options, on_session)
                    .await
            }
            BackendCommand::CountDocuments { filter } => {
                let mut opts = CountOptions::default();
                opts.read_concern = driver_options.read_concern;
                opts.selection_criteria = driver_options.selection_criteria;
                let action = coll
                    .count_documents(to_bson_document(filter))
                    .with_options(opts);
                let count = match self.session_for(on_session, "countDocuments")? {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                Ok(BackendOutcome::returned(count))
            }
            BackendCommand::Find { filter, limit } => {
                let mut opts = FindOptions::default();
                opts.limit = *limit;
                opts.read_concern = driver_options.read_concern;
                opts.selection_criteria = driver_options.selection_criteria;
                let action = coll.find(to_bson_document(filter)).with_options(opts);
                let mut returned = 0u64;
                match self.session_for(on_session, "find")? {
                    Some(s) => {
                        let mut cursor = action.session(&mut *s).await?;
                        while cursor.advance(&mut *s).await? {
                            returned += 1;
                        }
                    }
                    None => {
                        let mut cursor = action.await?;
                        while cursor.advance().await? {
                            returned += 1;
                        }
                    }
                }
                Ok(BackendOutcome::returned(returned))
            }
            BackendCommand::Drop => {
                let mut opts = DropCollectionOptions::default();
                opts.write_concern = driver_options.write_concern;
                let action = coll.drop().with_options(opts);
                match self.session_for(on_session, "drop")? {
                    Some(s) => action.session(s).await?,
                    None => action.await?,
                };
                debug!("{}: dropped {}", self.actor, namespace);
                Ok(BackendOutcome::default())
            }
        }
    }

    /// One client-level `bulkWrite` call for the whole batch.
    async fn bulk_write(
        &mut self,
        namespace: &Namespace,
        models: &[WriteModel],
        options: &CommandOptions,
        on_session: bool,
    ) -> Result<BackendOutcome, MongoBackendError> {
        if models.is_empty() {
            return Ok(BackendOutcome::default());
        }
        let submitted = models.len();
        let driver_models = bulk::driver_models(&self.collection(namespace).namespace(), models);
        let client = self.client.clone();
        let mut action = client
            .bulk_write(driver_models)
            .verbose_results()
            .ordered(options.ordered);
        if let Some(wc) = options.write_concern.clone() {
            action = action.write_concern(wc);
        }
        let result = match self.session_for(on_session, "bulkWrite")? {
            Some(s) => action.session(s).await,
            None => action.await,
        };
        match result {
            Ok(result) => Ok(bulk::completed(submitted, &result)),
            Err(e) => Err(MongoBackendError::Backend(bulk::failed(
                submitted,
                options.ordered,
                &e,
            ))),
        }
    }

    async fn begin(&mut self, options: &TransactionOptions) -> Result<(), MongoBackendError> {
        let driver_options = transaction_options(options)?;
        let session = match self.session.take() {
            Some(session) => session,
            None => self.client.start_session().await?,
        };
        let session = self.session.insert(session);
        session
            .start_transaction()
            .with_options(driver_options)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), MongoBackendError> {
        let session = self.session_for(true, "commitTransaction")?;
        if let Some(s) = session {
            s.commit_transaction().await?;
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), MongoBackendError> {
        let session = self.session_for(true, "abortTransaction")?;
        if let Some(s) = session {
            s.abort_transaction().await?;
        }
        Ok(())
    }
}

fn update_options(options: &CommandOptions, upsert: bool) -> UpdateOptions {
    let mut opts = UpdateOptions::default();
    opts.upsert = Some(upsert);
    opts.write_concern = options.write_concern.clone();
    opts
}

fn delete_options(options: &CommandOptions) -> DeleteOptions {
    let mut opts = DeleteOptions::default();
    opts.write_concern = options.write_concern.clone();
    opts
}

fn update_counts(result: &UpdateResult) -> WriteCounts {
    WriteCounts::updated(
        result.matched_count,
        result.modified_count,
        u64::from(result.upserted_id.is_some()),
    )
}

#[async_trait]
impl BackendClient for MongoBackendClient {
    async fn execute(
        &mut self,
        namespace: &Namespace,
        command: &BackendCommand,
        options: &OperationOptions,
        on_session: bool,
    ) -> Result<BackendOutcome, BackendError> {
        Ok(self
            .run_command(namespace, command, options, on_session)
            .await?)
    }

    async fn start_transaction(
        &mut self,
        options: &TransactionOptions,
    ) -> Result<(), BackendError> {
        Ok(self.begin(options).await?)
    }

    async fn commit_transaction(&mut self) -> Result<(), BackendError> {
        Ok(self.commit().await?)
    }

    async fn abort_transaction(&mut self) -> Result<(), BackendError> {
        Ok(self.abort().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::doc as wdoc;

    fn mongodb_uri() -> String {
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB"]
    async fn test_insert_update_count_roundtrip() {
        let factory = MongoClientFactory::from_uri(&mongodb_uri()).await.unwrap();
        let mut client = factory.connect("Test").await.unwrap();
        let ns = Namespace::new("docstress_test", "roundtrip");
        let options = OperationOptions::default();

        client
            .execute(&ns, &BackendCommand::Drop, &options, false)
            .await
            .unwrap();
        client
            .execute(
                &ns,
                &BackendCommand::InsertMany {
                    documents: vec![wdoc! { "a" => 1 }, wdoc! { "a" => 1 }],
                },
                &options,
                false,
            )
            .await
            .unwrap();

        let outcome = client
            .execute(
                &ns,
                &BackendCommand::Write(WriteModel::UpdateMany {
                    filter: wdoc! { "a" => 1 },
                    update: wdoc! { "$set" => wdoc! { "a" => 5 } },
                    upsert: false,
                }),
                &options,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.counts.modified, 2);

        let counted = client
            .execute(
                &ns,
                &BackendCommand::CountDocuments {
                    filter: wdoc! { "a" => 5 },
                },
                &options,
                false,
            )
            .await
            .unwrap();
        assert_eq!(counted.documents_returned, 2);
    }

    #[tokio::test]
    #[ignore = "requires MongoDB 8.0 or later"]
    async fn test_unordered_bulk_write_is_one_batch() {
        let factory = MongoClientFactory::from_uri(&mongodb_uri()).await.unwrap();
        let mut client = factory.connect("Test").await.unwrap();
        let ns = Namespace::new("docstress_test", "bulk");
        let mut options = OperationOptions::default();

        client
            .execute(&ns, &BackendCommand::Drop, &options, false)
            .await
            .unwrap();

        options.ordered = Some(false);
        let err = client
            .execute(
                &ns,
                &BackendCommand::BulkWrite {
                    models: vec![
                        WriteModel::InsertOne {
                            document: wdoc! { "_id" => 1 },
                        },
                        WriteModel::InsertOne {
                            document: wdoc! { "_id" => 1 },
                        },
                        WriteModel::InsertOne {
                            document: wdoc! { "_id" => 2 },
                        },
                    ],
                },
                &options,
                false,
            )
            .await
            .unwrap_err();

        let BackendError::BulkWrite(failure) = err else {
            panic!("expected a bulk write failure, got {err:?}");
        };
        assert_eq!(failure.items.len(), 3);
        assert!(failure.items[1].is_failed());
        assert_eq!(failure.counts.inserted, 2);
    }
}
