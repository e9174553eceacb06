//! sled-backed store handle

use crate::context::changes::ChangeSet;
use crate::error::{to_store_data, to_store_io, StoreError};
use crate::model::{MigrationPlan, ObjectModel};
use crate::record::{Attributes, ObjectId, Record};
use crate::store::{StoreLocation, StoreOptions};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;
use tracing::{debug, info};

const TREE_RECORDS: &str = "records";
const TREE_ENTITY_INDEX: &str = "entity_index";
const TREE_METADATA: &str = "metadata";
const META_MODEL: &[u8] = b"model";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    entity: String,
    attributes: Attributes,
}

/// Result of writing a change set
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Inserted and updated records as they now sit in the store
    pub resolved: Vec<Record>,
    /// Updated records that had been deleted from the store in the meantime
    pub vanished: Vec<ObjectId>,
}

/// Live connection to the physical store
#[derive(Clone)]
pub struct StoreHandle {
    db: Db,
    records: Tree,
    index: Tree,
    metadata: Tree,
    location: StoreLocation,
    model: Arc<ObjectModel>,
}

impl StoreHandle {
    /// Open (or create) the store and bring its data up to `model`
    pub(crate) fn open(
        location: &StoreLocation,
        model: Arc<ObjectModel>,
        options: &StoreOptions,
    ) -> Result<Self, StoreError> {
        let config = sled::Config::new()
            .mode(options.journal.sled_mode())
            .flush_every_ms(options.journal.flush_every_ms());
        let config = match location {
            StoreLocation::File(path) => config.path(path),
            StoreLocation::InMemory => config.temporary(true),
        };
        let db = config
            .open()
            .map_err(|e| StoreError::unable_to_create(location.display_path(), e))?;

        let unable = |e: StoreError| match e {
            StoreError::MigrationFailed(reason) => {
                StoreError::unable_to_create(location.display_path(), reason)
            }
            e @ StoreError::UnableToCreateStoreAt { .. } => e,
            other => StoreError::unable_to_create(location.display_path(), other),
        };
        let handle = Self::attach(db, location.clone(), model).map_err(unable)?;
        handle.reconcile_model(options).map_err(unable)?;
        Ok(handle)
    }

    fn attach(db: Db, location: StoreLocation, model: Arc<ObjectModel>) -> Result<Self, StoreError> {
        let records = db.open_tree(TREE_RECORDS).map_err(to_store_io)?;
        let index = db.open_tree(TREE_ENTITY_INDEX).map_err(to_store_io)?;
        let metadata = db.open_tree(TREE_METADATA).map_err(to_store_io)?;
        Ok(Self {
            db,
            records,
            index,
            metadata,
            location,
            model,
        })
    }

    /// Second connection for batch work
    ///
    /// sled keeps one database per path per process, so a file-backed batch connection shares
    /// the open database. An in-memory batch connection gets a brand-new ephemeral store.
    pub(crate) fn connect_batch(&self, options: &StoreOptions) -> Result<Self, StoreError> {
        match &self.location {
            StoreLocation::File(_) => {
                Self::attach(self.db.clone(), self.location.clone(), self.model.clone())
            }
            StoreLocation::InMemory => {
                Self::open(&StoreLocation::InMemory, self.model.clone(), options)
            }
        }
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn model(&self) -> &Arc<ObjectModel> {
        &self.model
    }

    fn stored_model(&self) -> Result<Option<ObjectModel>, StoreError> {
        let Some(raw) = self.metadata.get(META_MODEL).map_err(to_store_io)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw).map_err(to_store_data)?))
    }

    fn reconcile_model(&self, options: &StoreOptions) -> Result<(), StoreError> {
        let encoded_model = serde_json::to_vec(self.model.as_ref()).map_err(to_store_data)?;
        let stored = match self.stored_model()? {
            None => {
                self.metadata
                    .insert(META_MODEL, encoded_model)
                    .map_err(to_store_io)?;
                return Ok(());
            }
            Some(stored) if stored == *self.model => return Ok(()),
            Some(stored) => stored,
        };

        if !options.automatic_migration {
            return Err(StoreError::MigrationFailed(format!(
                "store holds model '{}' v{} and automatic migration is off",
                stored.name, stored.version
            )));
        }

        let plan = MigrationPlan::infer(&stored, &self.model, options.infer_mapping)?;
        let mut migrated = Vec::new();
        let mut dropped = Vec::new();
        for item in self.records.iter() {
            let (key, value) = item.map_err(to_store_io)?;
            let record: StoredRecord = serde_json::from_slice(&value).map_err(to_store_data)?;
            let id = decode_id(&key)?;
            match plan.migrate(&record.entity, &record.attributes) {
                Some((entity, attributes)) => migrated.push((id, record.entity, entity, attributes)),
                None => dropped.push((id, record.entity)),
            }
        }

        let encoded: Vec<(ObjectId, String, String, Vec<u8>)> = migrated
            .into_iter()
            .map(|(id, from, to, attributes)| {
                let value = serde_json::to_vec(&StoredRecord {
                    entity: to.clone(),
                    attributes,
                })
                .map_err(to_store_data)?;
                Ok((id, from, to, value))
            })
            .collect::<Result<_, StoreError>>()?;

        let result: Result<(), TransactionError<StoreError>> =
            (&self.records, &self.index, &self.metadata).transaction(|(records, index, metadata)| {
                for (id, from, to, value) in &encoded {
                    records.insert(id.as_bytes().to_vec(), value.clone())?;
                    index.remove(index_key(from, id))?;
                    index.insert(index_key(to, id), Vec::<u8>::new())?;
                }
                for (id, entity) in &dropped {
                    records.remove(id.as_bytes().to_vec())?;
                    index.remove(index_key(entity, id))?;
                }
                metadata.insert(META_MODEL, encoded_model.clone())?;
                Ok(())
            });
        result.map_err(from_transaction)?;

        info!(
            from_version = stored.version,
            to_version = self.model.version,
            migrated = encoded.len(),
            dropped = dropped.len(),
            "migrated store to new object model"
        );
        Ok(())
    }

    pub fn get(&self, id: ObjectId) -> Result<Option<Record>, StoreError> {
        let Some(raw) = self.records.get(id.as_bytes()).map_err(to_store_io)? else {
            return Ok(None);
        };
        Ok(Some(decode_record(id, &raw)?))
    }

    /// All records of one entity
    pub fn fetch_entity(&self, entity: &str) -> Result<Vec<Record>, StoreError> {
        let prefix = index_prefix(entity);
        let mut out = Vec::new();
        for item in self.index.scan_prefix(&prefix) {
            let (key, _) = item.map_err(to_store_io)?;
            let id = decode_id(&key[prefix.len()..])?;
            if let Some(record) = self.get(id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Write a save atomically
    ///
    /// Updated records merge property by property against what the store holds now: a property
    /// whose stored value moved away from the saving context's snapshot keeps the stored value.
    pub(crate) fn apply(&self, changes: &ChangeSet) -> Result<ApplyOutcome, StoreError> {
        let result = (&self.records, &self.index).transaction(|(records, index)| {
            let mut outcome = ApplyOutcome::default();

            for record in &changes.inserted {
                let value = encode_record(record).map_err(ConflictableTransactionError::Abort)?;
                records.insert(record.id().as_bytes().to_vec(), value)?;
                index.insert(index_key(record.entity(), &record.id()), Vec::<u8>::new())?;
                outcome.resolved.push(record.clone());
            }

            for update in &changes.updated {
                let id = update.current.id();
                let Some(raw) = records.get(id.as_bytes().to_vec())? else {
                    outcome.vanished.push(id);
                    continue;
                };
                let stored = decode_record(id, &raw).map_err(ConflictableTransactionError::Abort)?;
                let merged = merge_store_trump(&update.current, &update.snapshot, &stored);
                let value = encode_record(&merged).map_err(ConflictableTransactionError::Abort)?;
                records.insert(id.as_bytes().to_vec(), value)?;
                outcome.resolved.push(merged);
            }

            for record in &changes.deleted {
                records.remove(record.id().as_bytes().to_vec())?;
                index.remove(index_key(record.entity(), &record.id()))?;
            }

            Ok(outcome)
        });
        let outcome = result.map_err(from_transaction)?;
        debug!(
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            vanished = outcome.vanished.len(),
            "applied change set to store"
        );
        Ok(outcome)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(to_store_io)?;
        Ok(())
    }
}

/// Store values win for properties that changed on both sides since `snapshot`
fn merge_store_trump(current: &Record, snapshot: &Record, stored: &Record) -> Record {
    let mut merged = stored.clone();
    for key in current.changed_keys(snapshot) {
        if stored.attributes().get(&key) != snapshot.attributes().get(&key) {
            continue;
        }
        match current.attributes().get(&key) {
            Some(value) => {
                merged.attributes_mut().insert(key, value.clone());
            }
            None => {
                merged.attributes_mut().remove(&key);
            }
        }
    }
    merged
}

fn index_prefix(entity: &str) -> Vec<u8> {
    let mut prefix = entity.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn index_key(entity: &str, id: &ObjectId) -> Vec<u8> {
    let mut key = index_prefix(entity);
    key.extend_from_slice(id.as_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Result<ObjectId, StoreError> {
    ObjectId::from_slice(bytes).ok_or_else(|| {
        StoreError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed object id of {} bytes", bytes.len()),
        ))
    })
}

fn encode_record(record: &Record) -> Result<Vec<u8>, StoreError> {
    let stored = StoredRecord {
        entity: record.entity().to_string(),
        attributes: record.attributes().clone(),
    };
    serde_json::to_vec(&stored).map_err(to_store_data)
}

fn decode_record(id: ObjectId, raw: &[u8]) -> Result<Record, StoreError> {
    let stored: StoredRecord = serde_json::from_slice(raw).map_err(to_store_data)?;
    Ok(Record::new(id, stored.entity, stored.attributes))
}

fn from_transaction(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => to_store_io(e),
    }
}
