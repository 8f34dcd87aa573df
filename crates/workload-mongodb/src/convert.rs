//! Conversion from evaluated workload values and options to driver types.

use crate::error::MongoBackendError;
use bson::{Bson, Document as BsonDocument};
use mongodb::options::{
    Acknowledgment, ReadConcern as DriverReadConcern, ReadPreference as DriverReadPreference,
    ReadPreferenceOptions, SelectionCriteria, TransactionOptions as DriverTransactionOptions,
    WriteConcern as DriverWriteConcern,
};
use std::time::Duration;
use workload_core::options::{ReadMode, WriteConcernLevel};
use workload_core::{
    Document, OperationOptions, ReadConcern, ReadPreference, TransactionOptions, Value,
    WriteConcern,
};

/// Wrapper for BSON values built from evaluated documents.
#[derive(Debug, Clone)]
pub struct BsonValue(pub Bson);

impl BsonValue {
    pub fn into_inner(self) -> Bson {
        self.0
    }
}

impl From<&Value> for BsonValue {
    fn from(value: &Value) -> Self {
        BsonValue(value_to_bson(value))
    }
}

fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int32(i) => Bson::Int32(*i),
        Value::Int64(i) => Bson::Int64(*i),
        Value::Double(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Document(doc) => Bson::Document(to_bson_document(doc)),
    }
}

/// Convert an evaluated document, keeping field order.
pub fn to_bson_document(doc: &Document) -> BsonDocument {
    let mut out = BsonDocument::new();
    for (key, value) in doc {
        out.insert(key.clone(), value_to_bson(value));
    }
    out
}

pub fn write_concern(wc: &WriteConcern) -> DriverWriteConcern {
    let mut out = DriverWriteConcern::default();
    out.w = wc.level.as_ref().map(|level| match level {
        WriteConcernLevel::Nodes(n) => Acknowledgment::Nodes(*n),
        WriteConcernLevel::Named(name) if name == "majority" => Acknowledgment::Majority,
        WriteConcernLevel::Named(name) => Acknowledgment::Custom(name.clone()),
    });
    out.journal = wc.journal;
    out.w_timeout = wc.timeout.as_ref().map(|t| t.as_duration());
    out
}

pub fn read_concern(rc: &ReadConcern) -> Result<DriverReadConcern, MongoBackendError> {
    match rc.level.as_str() {
        "local" => Ok(DriverReadConcern::local()),
        "majority" => Ok(DriverReadConcern::majority()),
        "linearizable" => Ok(DriverReadConcern::linearizable()),
        "available" => Ok(DriverReadConcern::available()),
        "snapshot" => Ok(DriverReadConcern::snapshot()),
        other => Err(MongoBackendError::UnsupportedOption(format!(
            "read concern level '{other}'"
        ))),
    }
}

pub fn selection_criteria(rp: &ReadPreference) -> Result<SelectionCriteria, MongoBackendError> {
    let options = rp.max_staleness_seconds.map(|secs| {
        let mut options = ReadPreferenceOptions::default();
        options.max_staleness = Some(Duration::from_secs(secs));
        options
    });

    let preference = match rp.read_mode {
        ReadMode::Primary => {
            if options.is_some() {
                return Err(MongoBackendError::UnsupportedOption(
                    "MaxStalenessSeconds cannot be combined with primary read mode".to_string(),
                ));
            }
            DriverReadPreference::Primary
        }
        ReadMode::PrimaryPreferred => DriverReadPreference::PrimaryPreferred { options },
        ReadMode::Secondary => DriverReadPreference::Secondary { options },
        ReadMode::SecondaryPreferred => DriverReadPreference::SecondaryPreferred { options },
        ReadMode::Nearest => DriverReadPreference::Nearest { options },
    };
    Ok(SelectionCriteria::ReadPreference(preference))
}

/// Driver options shared by every command: write concern, read concern and
/// selection criteria.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub ordered: bool,
    pub write_concern: Option<DriverWriteConcern>,
    pub read_concern: Option<DriverReadConcern>,
    pub selection_criteria: Option<SelectionCriteria>,
}

impl CommandOptions {
    pub fn from_options(options: &OperationOptions) -> Result<Self, MongoBackendError> {
        Ok(Self {
            ordered: options.is_ordered(),
            write_concern: options.write_concern.as_ref().map(write_concern),
            read_concern: options.read_concern.as_ref().map(read_concern).transpose()?,
            selection_criteria: options
                .read_preference
                .as_ref()
                .map(selection_criteria)
                .transpose()?,
        })
    }
}

pub fn transaction_options(
    options: &TransactionOptions,
) -> Result<DriverTransactionOptions, MongoBackendError> {
    let mut out = DriverTransactionOptions::default();
    out.write_concern = options.write_concern.as_ref().map(write_concern);
    out.read_concern = options.read_concern.as_ref().map(read_concern).transpose()?;
    out.selection_criteria = options
        .read_preference
        .as_ref()
        .map(selection_criteria)
        .transpose()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload_core::doc;
    use workload_core::DurationSpec;

    #[test]
    fn test_document_conversion_keeps_order_and_types() {
        let doc = doc! {
            "z" => 1,
            "a" => 5_000_000_000i64,
            "s" => "text",
            "n" => doc! { "ok" => true },
        };
        let bson_doc = to_bson_document(&doc);
        let keys: Vec<&str> = bson_doc.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "s", "n"]);
        assert_eq!(bson_doc.get("z"), Some(&Bson::Int32(1)));
        assert_eq!(bson_doc.get("a"), Some(&Bson::Int64(5_000_000_000)));
        assert_eq!(
            bson_doc.get_document("n").unwrap().get("ok"),
            Some(&Bson::Boolean(true))
        );
    }

    #[test]
    fn test_write_concern_mapping() {
        let wc = WriteConcern {
            level: Some(WriteConcernLevel::Named("majority".to_string())),
            journal: Some(true),
            timeout: Some(DurationSpec(Duration::from_secs(5))),
        };
        let driver = write_concern(&wc);
        assert_eq!(driver.w, Some(Acknowledgment::Majority));
        assert_eq!(driver.journal, Some(true));
        assert_eq!(driver.w_timeout, Some(Duration::from_secs(5)));

        let nodes = write_concern(&WriteConcern {
            level: Some(WriteConcernLevel::Nodes(2)),
            ..WriteConcern::default()
        });
        assert_eq!(nodes.w, Some(Acknowledgment::Nodes(2)));
    }

    #[test]
    fn test_unknown_read_concern_rejected() {
        let rc = ReadConcern {
            level: "eventual".to_string(),
        };
        assert!(read_concern(&rc).is_err());
    }

    #[test]
    fn test_primary_with_staleness_rejected() {
        let rp = ReadPreference {
            read_mode: ReadMode::Primary,
            max_staleness_seconds: Some(90),
        };
        assert!(selection_criteria(&rp).is_err());

        let rp = ReadPreference {
            read_mode: ReadMode::Secondary,
            max_staleness_seconds: Some(90),
        };
        assert!(selection_criteria(&rp).is_ok());
    }
}
