//! Operation registry and dispatcher.
//!
//! An operation is described in a workload file as
//!
//! ```yaml
//! OperationName: updateOne
//! OperationMetricsName: UpdateSomething   # optional
//! OperationCommand:
//!   Filter: { a: { ^RandomInt: { min: 0, max: 10 } } }
//!   Update: { $set: { b: 1 } }
//!   OnSession: true
//! ```
//!
//! Command fields may also be written inline next to `OperationName`. The
//! name is resolved through a static registry when the actor is built, so an
//! unknown operation is a configuration error before any phase runs. At run
//! time each invocation evaluates its templates exactly once
//! ([`ConfiguredOperation::prepare`]) and then calls the backend
//! ([`invoke`]); retries reuse the prepared arguments.

use crate::error::OperationError;
use crate::session::SessionState;
use rand::Rng;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use tracing::trace;
use workload_core::{
    document_size, BackendClient, BackendCommand, ConfigError, ItemOutcome, Namespace,
    OperationOptions, TransactionOptions, WriteCounts, WriteModel,
};
use workload_generator::DocumentExpression;

/// Every operation the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    ReplaceOne,
    DeleteOne,
    DeleteMany,
    BulkWrite,
    CountDocuments,
    Find,
    Drop,
    StartTransaction,
    CommitTransaction,
    AbortTransaction,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::InsertOne => "insertOne",
            Self::InsertMany => "insertMany",
            Self::UpdateOne => "updateOne",
            Self::UpdateMany => "updateMany",
            Self::ReplaceOne => "replaceOne",
            Self::DeleteOne => "deleteOne",
            Self::DeleteMany => "deleteMany",
            Self::BulkWrite => "bulkWrite",
            Self::CountDocuments => "countDocuments",
            Self::Find => "find",
            Self::Drop => "drop",
            Self::StartTransaction => "startTransaction",
            Self::CommitTransaction => "commitTransaction",
            Self::AbortTransaction => "abortTransaction",
        }
    }

    /// Operations that only move the session state machine.
    pub fn is_transaction_boundary(self) -> bool {
        matches!(
            self,
            Self::StartTransaction | Self::CommitTransaction | Self::AbortTransaction
        )
    }
}

/// `{OperationName, OperationCommand, OperationMetricsName}` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationDescription {
    pub operation_name: String,

    #[serde(default)]
    pub operation_command: Option<OperationCommand>,

    /// Timer name; defaults to the operation name
    #[serde(default)]
    pub operation_metrics_name: Option<String>,

    /// Command fields written next to `OperationName`
    #[serde(flatten)]
    pub inline: OperationCommand,
}

/// Parameters of an operation. Which fields are required depends on the
/// operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationCommand {
    #[serde(default)]
    pub document: Option<YamlValue>,
    #[serde(default)]
    pub documents: Option<Vec<YamlValue>>,
    #[serde(default)]
    pub filter: Option<YamlValue>,
    #[serde(default)]
    pub update: Option<YamlValue>,
    #[serde(default)]
    pub replacement: Option<YamlValue>,
    #[serde(default)]
    pub upsert: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub write_operations: Option<Vec<WriteOperationDescription>>,
    #[serde(default)]
    pub options: Option<OperationOptions>,
    #[serde(default)]
    pub on_session: Option<bool>,
    /// Allows the execution strategy to retry transient failures
    #[serde(default)]
    pub idempotent: Option<bool>,
}

/// One entry of a `bulkWrite`'s `WriteOperations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteOperationDescription {
    pub write_command: String,
    #[serde(flatten)]
    pub command: OperationCommand,
}

type CompileFn =
    fn(OperationKind, &OperationCommand, &str) -> Result<CompiledCommand, ConfigError>;

/// Registry entry: operation name to handler.
pub struct Handler {
    pub name: &'static str,
    pub kind: OperationKind,
    compile: CompileFn,
}

static HANDLERS: &[Handler] = &[
    Handler {
        name: "insertOne",
        kind: OperationKind::InsertOne,
        compile: compile_write_command,
    },
    Handler {
        name: "insertMany",
        kind: OperationKind::InsertMany,
        compile: compile_insert_many,
    },
    Handler {
        name: "updateOne",
        kind: OperationKind::UpdateOne,
        compile: compile_write_command,
    },
    Handler {
        name: "updateMany",
        kind: OperationKind::UpdateMany,
        compile: compile_write_command,
    },
    Handler {
        name: "replaceOne",
        kind: OperationKind::ReplaceOne,
        compile: compile_write_command,
    },
    Handler {
        name: "deleteOne",
        kind: OperationKind::DeleteOne,
        compile: compile_write_command,
    },
    Handler {
        name: "deleteMany",
        kind: OperationKind::DeleteMany,
        compile: compile_write_command,
    },
    Handler {
        name: "bulkWrite",
        kind: OperationKind::BulkWrite,
        compile: compile_bulk_write,
    },
    Handler {
        name: "countDocuments",
        kind: OperationKind::CountDocuments,
        compile: compile_count,
    },
    Handler {
        name: "find",
        kind: OperationKind::Find,
        compile: compile_find,
    },
    Handler {
        name: "drop",
        kind: OperationKind::Drop,
        compile: compile_no_args,
    },
    Handler {
        name: "startTransaction",
        kind: OperationKind::StartTransaction,
        compile: compile_start_transaction,
    },
    Handler {
        name: "commitTransaction",
        kind: OperationKind::CommitTransaction,
        compile: compile_no_args,
    },
    Handler {
        name: "abortTransaction",
        kind: OperationKind::AbortTransaction,
        compile: compile_no_args,
    },
];

/// Resolve an operation name.
pub fn lookup(name: &str) -> Option<&'static Handler> {
    HANDLERS.iter().find(|h| h.name == name)
}

/// Every registered operation name.
pub fn operation_names() -> impl Iterator<Item = &'static str> {
    HANDLERS.iter().map(|h| h.name)
}

/// A single write with its templates compiled.
#[derive(Debug, Clone)]
pub enum CompiledWrite {
    InsertOne {
        document: DocumentExpression,
    },
    UpdateOne {
        filter: DocumentExpression,
        update: DocumentExpression,
        upsert: bool,
    },
    UpdateMany {
        filter: DocumentExpression,
        update: DocumentExpression,
        upsert: bool,
    },
    ReplaceOne {
        filter: DocumentExpression,
        replacement: DocumentExpression,
        upsert: bool,
    },
    DeleteOne {
        filter: DocumentExpression,
    },
    DeleteMany {
        filter: DocumentExpression,
    },
}

impl CompiledWrite {
    fn compile(
        kind: OperationKind,
        command: &OperationCommand,
        scope: &str,
    ) -> Result<Self, ConfigError> {
        let upsert = command.upsert.unwrap_or(false);
        match kind {
            OperationKind::InsertOne => Ok(Self::InsertOne {
                document: template(scope, "Document", command.document.as_ref())?,
            }),
            OperationKind::UpdateOne => Ok(Self::UpdateOne {
                filter: template(scope, "Filter", command.filter.as_ref())?,
                update: template(scope, "Update", command.update.as_ref())?,
                upsert,
            }),
            OperationKind::UpdateMany => Ok(Self::UpdateMany {
                filter: template(scope, "Filter", command.filter.as_ref())?,
                update: template(scope, "Update", command.update.as_ref())?,
                upsert,
            }),
            OperationKind::ReplaceOne => Ok(Self::ReplaceOne {
                filter: template(scope, "Filter", command.filter.as_ref())?,
                replacement: template(scope, "Replacement", command.replacement.as_ref())?,
                upsert,
            }),
            OperationKind::DeleteOne => Ok(Self::DeleteOne {
                filter: template(scope, "Filter", command.filter.as_ref())?,
            }),
            OperationKind::DeleteMany => Ok(Self::DeleteMany {
                filter: template(scope, "Filter", command.filter.as_ref())?,
            }),
            other => Err(ConfigError::InvalidField {
                scope: scope.to_string(),
                field: "WriteCommand".to_string(),
                message: format!("'{}' is not a write command", other.name()),
            }),
        }
    }

    pub fn evaluate<R: Rng>(&self, rng: &mut R) -> WriteModel {
        match self {
            Self::InsertOne { document } => WriteModel::InsertOne {
                document: document.evaluate(rng),
            },
            Self::UpdateOne {
                filter,
                update,
                upsert,
            } => WriteModel::UpdateOne {
                filter: filter.evaluate(rng),
                update: update.evaluate(rng),
                upsert: *upsert,
            },
            Self::UpdateMany {
                filter,
                update,
                upsert,
            } => WriteModel::UpdateMany {
                filter: filter.evaluate(rng),
                update: update.evaluate(rng),
                upsert: *upsert,
            },
            Self::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => WriteModel::ReplaceOne {
                filter: filter.evaluate(rng),
                replacement: replacement.evaluate(rng),
                upsert: *upsert,
            },
            Self::DeleteOne { filter } => WriteModel::DeleteOne {
                filter: filter.evaluate(rng),
            },
            Self::DeleteMany { filter } => WriteModel::DeleteMany {
                filter: filter.evaluate(rng),
            },
        }
    }
}

/// An operation's compiled arguments.
#[derive(Debug, Clone)]
pub enum CompiledCommand {
    Write(CompiledWrite),
    InsertMany { documents: Vec<DocumentExpression> },
    BulkWrite { writes: Vec<CompiledWrite> },
    CountDocuments { filter: DocumentExpression },
    Find {
        filter: DocumentExpression,
        limit: Option<i64>,
    },
    Drop,
    StartTransaction { options: TransactionOptions },
    CommitTransaction,
    AbortTransaction,
}

fn template(
    scope: &str,
    field: &str,
    value: Option<&YamlValue>,
) -> Result<DocumentExpression, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingField {
        scope: scope.to_string(),
        field: field.to_string(),
    })?;
    compile_template(scope, field, value)
}

fn optional_template(
    scope: &str,
    field: &str,
    value: Option<&YamlValue>,
) -> Result<DocumentExpression, ConfigError> {
    match value {
        Some(v) => compile_template(scope, field, v),
        None => Ok(DocumentExpression::empty()),
    }
}

pub(crate) fn compile_template(
    scope: &str,
    field: &str,
    value: &YamlValue,
) -> Result<DocumentExpression, ConfigError> {
    DocumentExpression::compile(value).map_err(|e| ConfigError::InvalidTemplate {
        scope: scope.to_string(),
        field: field.to_string(),
        message: e.to_string(),
    })
}

fn compile_write_command(
    kind: OperationKind,
    command: &OperationCommand,
    scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    CompiledWrite::compile(kind, command, scope).map(CompiledCommand::Write)
}

fn compile_insert_many(
    _kind: OperationKind,
    command: &OperationCommand,
    scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    let templates = command
        .documents
        .as_ref()
        .ok_or_else(|| ConfigError::MissingField {
            scope: scope.to_string(),
            field: "Documents".to_string(),
        })?;
    if templates.is_empty() {
        return Err(ConfigError::InvalidField {
            scope: scope.to_string(),
            field: "Documents".to_string(),
            message: "must list at least one document".to_string(),
        });
    }
    let documents = templates
        .iter()
        .map(|t| compile_template(scope, "Documents", t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledCommand::InsertMany { documents })
}

fn compile_bulk_write(
    _kind: OperationKind,
    command: &OperationCommand,
    scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    let operations = command
        .write_operations
        .as_ref()
        .ok_or_else(|| ConfigError::MissingField {
            scope: scope.to_string(),
            field: "WriteOperations".to_string(),
        })?;
    if operations.is_empty() {
        return Err(ConfigError::InvalidField {
            scope: scope.to_string(),
            field: "WriteOperations".to_string(),
            message: "must list at least one write".to_string(),
        });
    }

    let mut writes = Vec::with_capacity(operations.len());
    for (i, op) in operations.iter().enumerate() {
        let item_scope = format!("{scope} WriteOperations[{i}]");
        let handler = lookup(&op.write_command).ok_or_else(|| ConfigError::UnknownOperation {
            scope: item_scope.clone(),
            name: op.write_command.clone(),
        })?;
        writes.push(CompiledWrite::compile(handler.kind, &op.command, &item_scope)?);
    }
    Ok(CompiledCommand::BulkWrite { writes })
}

fn compile_count(
    _kind: OperationKind,
    command: &OperationCommand,
    scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    Ok(CompiledCommand::CountDocuments {
        filter: optional_template(scope, "Filter", command.filter.as_ref())?,
    })
}

fn compile_find(
    _kind: OperationKind,
    command: &OperationCommand,
    scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    Ok(CompiledCommand::Find {
        filter: optional_template(scope, "Filter", command.filter.as_ref())?,
        limit: command.limit,
    })
}

fn compile_start_transaction(
    _kind: OperationKind,
    command: &OperationCommand,
    _scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    let options = command
        .options
        .as_ref()
        .map(TransactionOptions::from)
        .unwrap_or_default();
    Ok(CompiledCommand::StartTransaction { options })
}

fn compile_no_args(
    kind: OperationKind,
    _command: &OperationCommand,
    _scope: &str,
) -> Result<CompiledCommand, ConfigError> {
    match kind {
        OperationKind::Drop => Ok(CompiledCommand::Drop),
        OperationKind::CommitTransaction => Ok(CompiledCommand::CommitTransaction),
        _ => Ok(CompiledCommand::AbortTransaction),
    }
}

/// An operation ready to be invoked repeatedly.
#[derive(Debug, Clone)]
pub struct ConfiguredOperation {
    kind: OperationKind,
    command: CompiledCommand,
    options: OperationOptions,
    on_session: bool,
    idempotent: bool,
    metrics_name: String,
}

impl ConfiguredOperation {
    /// Parse and compile an operation block.
    pub fn from_yaml(value: &YamlValue, scope: &str) -> Result<Self, ConfigError> {
        let description: OperationDescription =
            serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidField {
                scope: scope.to_string(),
                field: "Operation".to_string(),
                message: e.to_string(),
            })?;
        Self::from_description(&description, scope)
    }

    pub fn from_description(
        description: &OperationDescription,
        scope: &str,
    ) -> Result<Self, ConfigError> {
        let handler =
            lookup(&description.operation_name).ok_or_else(|| ConfigError::UnknownOperation {
                scope: scope.to_string(),
                name: description.operation_name.clone(),
            })?;
        let command = description
            .operation_command
            .as_ref()
            .unwrap_or(&description.inline);
        let op_scope = format!("{scope} operation '{}'", handler.name);
        let compiled = (handler.compile)(handler.kind, command, &op_scope)?;

        Ok(Self {
            kind: handler.kind,
            command: compiled,
            options: command.options.clone().unwrap_or_default(),
            on_session: command.on_session.unwrap_or(false),
            idempotent: command.idempotent.unwrap_or(false),
            metrics_name: description
                .operation_metrics_name
                .clone()
                .unwrap_or_else(|| handler.name.to_string()),
        })
    }

    /// Build an operation directly from compiled parts.
    pub fn new(kind: OperationKind, command: CompiledCommand) -> Self {
        Self {
            kind,
            command,
            options: OperationOptions::default(),
            on_session: false,
            idempotent: false,
            metrics_name: kind.name().to_string(),
        }
    }

    pub fn with_metrics_name(mut self, name: impl Into<String>) -> Self {
        self.metrics_name = name.into();
        self
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_on_session(mut self, on_session: bool) -> Self {
        self.on_session = on_session;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn metrics_name(&self) -> &str {
        &self.metrics_name
    }

    pub fn on_session(&self) -> bool {
        self.on_session
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn options(&self) -> &OperationOptions {
        &self.options
    }

    /// Evaluate every template once.
    pub fn prepare<R: Rng>(&self, rng: &mut R) -> PreparedOperation {
        let call = match &self.command {
            CompiledCommand::Write(write) => {
                PreparedCall::Command(BackendCommand::Write(write.evaluate(rng)))
            }
            CompiledCommand::InsertMany { documents } => {
                PreparedCall::Command(BackendCommand::InsertMany {
                    documents: documents.iter().map(|d| d.evaluate(rng)).collect(),
                })
            }
            CompiledCommand::BulkWrite { writes } => {
                PreparedCall::Command(BackendCommand::BulkWrite {
                    models: writes.iter().map(|w| w.evaluate(rng)).collect(),
                })
            }
            CompiledCommand::CountDocuments { filter } => {
                PreparedCall::Command(BackendCommand::CountDocuments {
                    filter: filter.evaluate(rng),
                })
            }
            CompiledCommand::Find { filter, limit } => PreparedCall::Command(BackendCommand::Find {
                filter: filter.evaluate(rng),
                limit: *limit,
            }),
            CompiledCommand::Drop => PreparedCall::Command(BackendCommand::Drop),
            CompiledCommand::StartTransaction { options } => {
                PreparedCall::StartTransaction(options.clone())
            }
            CompiledCommand::CommitTransaction => PreparedCall::CommitTransaction,
            CompiledCommand::AbortTransaction => PreparedCall::AbortTransaction,
        };
        let bytes = match &call {
            PreparedCall::Command(command) => command_size(command),
            _ => 0,
        };
        PreparedOperation { call, bytes }
    }
}

/// What an invocation will send.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedCall {
    Command(BackendCommand),
    StartTransaction(TransactionOptions),
    CommitTransaction,
    AbortTransaction,
}

/// Evaluated arguments of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOperation {
    pub call: PreparedCall,
    /// Approximate encoded size of the evaluated documents
    pub bytes: u64,
}

fn model_size(model: &WriteModel) -> u64 {
    match model {
        WriteModel::InsertOne { document } => document_size(document),
        WriteModel::UpdateOne { filter, update, .. }
        | WriteModel::UpdateMany { filter, update, .. } => {
            document_size(filter) + document_size(update)
        }
        WriteModel::ReplaceOne {
            filter,
            replacement,
            ..
        } => document_size(filter) + document_size(replacement),
        WriteModel::DeleteOne { filter } | WriteModel::DeleteMany { filter } => {
            document_size(filter)
        }
    }
}

fn command_size(command: &BackendCommand) -> u64 {
    match command {
        BackendCommand::Write(model) => model_size(model),
        BackendCommand::InsertMany { documents } => documents.iter().map(document_size).sum(),
        BackendCommand::BulkWrite { models } => models.iter().map(model_size).sum(),
        BackendCommand::CountDocuments { filter } | BackendCommand::Find { filter, .. } => {
            document_size(filter)
        }
        BackendCommand::Drop => 0,
    }
}

/// Normalized result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOutcome {
    pub counts: WriteCounts,
    pub documents_returned: u64,
    /// Per-item outcomes of a bulk write
    pub items: Vec<ItemOutcome>,
    pub bytes: u64,
}

/// Everything an invocation touches besides the operation itself.
pub struct DispatchTarget<'a> {
    pub client: &'a mut dyn BackendClient,
    pub namespace: &'a Namespace,
    pub session: &'a mut SessionState,
}

/// Send prepared arguments to the backend.
///
/// Session requirements are checked first; a violation is a usage error and
/// nothing reaches the backend.
pub async fn invoke(
    operation: &ConfiguredOperation,
    prepared: &PreparedOperation,
    target: &mut DispatchTarget<'_>,
) -> Result<OperationOutcome, OperationError> {
    let name = operation.name();

    match &prepared.call {
        PreparedCall::StartTransaction(options) => {
            target.session.require_idle(name)?;
            target
                .client
                .start_transaction(options)
                .await
                .map_err(|e| OperationError::backend(name, e))?;
            target.session.mark_started();
            Ok(OperationOutcome::default())
        }
        PreparedCall::CommitTransaction => {
            target.session.require_active(name)?;
            target
                .client
                .commit_transaction()
                .await
                .map_err(|e| OperationError::backend(name, e))?;
            target.session.mark_committed();
            Ok(OperationOutcome::default())
        }
        PreparedCall::AbortTransaction => {
            target.session.require_active(name)?;
            let result = target.client.abort_transaction().await;
            // The transaction is over either way
            target.session.mark_aborted();
            result.map_err(|e| OperationError::backend(name, e))?;
            Ok(OperationOutcome::default())
        }
        PreparedCall::Command(command) => {
            if operation.on_session() {
                target.session.require_active(name)?;
            }
            trace!("{} on {}", name, target.namespace);
            let outcome = target
                .client
                .execute(
                    target.namespace,
                    command,
                    operation.options(),
                    operation.on_session(),
                )
                .await
                .map_err(|e| OperationError::backend(name, e))?;
            Ok(OperationOutcome {
                counts: outcome.counts,
                documents_returned: outcome.documents_returned,
                items: outcome.items,
                bytes: prepared.bytes,
            })
        }
    }
}

/// Evaluate and invoke in one step.
pub async fn dispatch<R: Rng + Send>(
    operation: &ConfiguredOperation,
    rng: &mut R,
    target: &mut DispatchTarget<'_>,
) -> Result<OperationOutcome, OperationError> {
    let prepared = operation.prepare(rng);
    invoke(operation, &prepared, target).await
}
