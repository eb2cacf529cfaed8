//! Full-state snapshots of the credential store.
//!
//! A dump lists every document of every managed collection, in insertion order,
//! as canonical extended JSON. Restoring a dump replaces the managed collections
//! with its contents, so applying the same dump twice is harmless.

use std::collections::BTreeMap;

use mongodb::{
    bson::{doc, Bson, Document},
    options::FindOptions,
    Database,
};
use rocket::{futures::TryStreamExt, http::Status};

use crate::error::{Error, Result};
use crate::model::api::sync::StoreDump;

use super::collection::{ensure_indexes_exist, MANAGED_COLLECTIONS};

/// Snapshot every managed collection.
pub async fn dump_database(db: &Database) -> Result<StoreDump> {
    let mut collections = BTreeMap::new();
    for name in MANAGED_COLLECTIONS {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let documents: Vec<Document> = db
            .collection::<Document>(name)
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        let script = documents
            .into_iter()
            .map(|document| Bson::Document(document).into_canonical_extjson())
            .collect();
        collections.insert(name.to_string(), script);
    }
    Ok(StoreDump { collections })
}

/// Destructively replace the managed collections with the contents of the dump.
///
/// The whole dump is parsed before anything is written, so a malformed dump
/// leaves the store untouched. Each collection is filled under a staging name
/// and then swapped in with `$out`, so readers see either the old or the new
/// contents.
pub async fn restore_database(db: &Database, dump: &StoreDump) -> Result<()> {
    let mut parsed = BTreeMap::new();
    for (name, script) in &dump.collections {
        if !MANAGED_COLLECTIONS.contains(&name.as_str()) {
            warn!("Ignoring unknown collection `{name}` in dump");
            continue;
        }
        let documents = script
            .iter()
            .cloned()
            .map(|value| match Bson::try_from(value) {
                Ok(Bson::Document(document)) => Ok(document),
                Ok(other) => Err(malformed(name, format!("not a document: {other}"))),
                Err(e) => Err(malformed(name, e.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        parsed.insert(name.as_str(), documents);
    }

    for name in MANAGED_COLLECTIONS {
        let documents = parsed.remove(name).unwrap_or_default();
        replace_collection(db, name, documents).await?;
    }
    ensure_indexes_exist(db).await?;
    Ok(())
}

async fn replace_collection(db: &Database, name: &str, documents: Vec<Document>) -> Result<()> {
    let target = db.collection::<Document>(name);
    if documents.is_empty() {
        target.delete_many(doc! {}, None).await?;
        return Ok(());
    }

    let staging = db.collection::<Document>(&staging_name(name));
    staging.drop(None).await?;
    staging.insert_many(documents, None).await?;
    staging.aggregate([doc! { "$out": name }], None).await?;
    staging.drop(None).await?;
    Ok(())
}

fn staging_name(collection: &str) -> String {
    format!("{collection}_restore")
}

fn malformed(collection: &str, reason: String) -> Error {
    Error::Status(
        Status::BadRequest,
        format!("Malformed dump of `{collection}`: {reason}"),
    )
}
