use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline::{Fingerprint, StoreError, SyncRecord, SyncRecordStore};

/// Keeps records in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<Fingerprint, SyncRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, replacing records with the same fingerprint.
    pub fn with_records(records: impl IntoIterator<Item = SyncRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock();
            for record in records {
                map.insert(record.fingerprint.clone(), record);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl SyncRecordStore for MemoryRecordStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SyncRecord>, StoreError> {
        Ok(self.records.lock().get(fingerprint).cloned())
    }

    async fn upsert(&self, record: SyncRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .insert(record.fingerprint.clone(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }
}
