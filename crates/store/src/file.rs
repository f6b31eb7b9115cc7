use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{Fingerprint, StoreError, SyncRecord, SyncRecordStore};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct FileContentsRef<'a> {
    version: u32,
    records: Vec<&'a SyncRecord>,
}

#[derive(Deserialize)]
struct FileContents {
    version: u32,
    #[serde(default)]
    records: Vec<SyncRecord>,
}

/// Stores records in a single JSON document.
///
/// The whole document is rewritten through a temporary sibling file and an
/// atomic rename on every upsert, so a crash leaves either the old or the new
/// contents on disk. Writes are serialized; an upsert returns only after the
/// file has been synced.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<Fingerprint, SyncRecord>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => parse(&path, &bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No sync record file yet; starting empty");
                BTreeMap::new()
            }
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "Sync records loaded");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<Fingerprint, SyncRecord>) -> Result<(), StoreError> {
        let contents = FileContentsRef {
            version: FORMAT_VERSION,
            records: records.values().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&contents)
            .map_err(|e| StoreError::Corrupt(format!("failed to encode records: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = temp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "records.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn parse(path: &Path, bytes: &[u8]) -> Result<BTreeMap<Fingerprint, SyncRecord>, StoreError> {
    let contents: FileContents = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
    if contents.version != FORMAT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "{}: unsupported format version {}",
            path.display(),
            contents.version
        )));
    }
    Ok(contents
        .records
        .into_iter()
        .map(|r| (r.fingerprint.clone(), r))
        .collect())
}

#[async_trait]
impl SyncRecordStore for JsonFileStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SyncRecord>, StoreError> {
        Ok(self.records.lock().await.get(fingerprint).cloned())
    }

    async fn upsert(&self, record: SyncRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let previous = records.insert(record.fingerprint.clone(), record.clone());
        if let Err(err) = self.persist(&records).await {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(previous) => records.insert(record.fingerprint.clone(), previous),
                None => records.remove(&record.fingerprint),
            };
            tracing::error!(path = %self.path.display(), error = %err, "Failed to persist sync record");
            return Err(err);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_sits_next_to_the_target() {
        let tmp = temp_path(Path::new("/data/.tasksmith/records.json"));
        assert_eq!(tmp, PathBuf::from("/data/.tasksmith/records.json.tmp"));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let err = parse(Path::new("r.json"), br#"{"version":7,"records":[]}"#).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("version 7")));
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let err = parse(Path::new("r.json"), b"not json").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
