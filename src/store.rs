//! Persistence for installed-extension records.
//!
//! The manager is the only component that reads or writes these records.
//! Store failures surface as [`Error::Persistence`] and propagate to the
//! caller of the mutating operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::Error;
use crate::manager::{ExtensionInstance, ExtensionStatus};

/// One persisted row/document per installed extension, keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub extension_id: String,
    pub status: ExtensionStatus,
    pub settings: Map<String, Value>,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ExtensionInstance> for InstanceRecord {
    fn from(instance: &ExtensionInstance) -> Self {
        Self {
            extension_id: instance.extension_id.clone(),
            status: instance.status,
            settings: instance.settings.clone(),
            version: instance.version.clone(),
            installed_at: instance.installed_at,
            updated_at: instance.updated_at,
            error: instance.error.clone(),
        }
    }
}

impl From<InstanceRecord> for ExtensionInstance {
    fn from(record: InstanceRecord) -> Self {
        Self {
            extension_id: record.extension_id,
            status: record.status,
            settings: record.settings,
            version: record.version,
            installed_at: record.installed_at,
            updated_at: record.updated_at,
            error: record.error,
        }
    }
}

/// Trait for instance-record persistence backends.
#[async_trait]
pub trait ExtensionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load_all(&self) -> Result<Vec<InstanceRecord>, Error>;

    async fn save(&self, record: InstanceRecord) -> Result<(), Error>;

    async fn delete(&self, extension_id: &str) -> Result<(), Error>;
}

/// In-memory store for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, InstanceRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ExtensionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_all(&self) -> Result<Vec<InstanceRecord>, Error> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn save(&self, record: InstanceRecord) -> Result<(), Error> {
        let mut records = self.records.write().await;
        records.insert(record.extension_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, extension_id: &str) -> Result<(), Error> {
        let mut records = self.records.write().await;
        records.remove(extension_id);
        Ok(())
    }
}

/// File-backed store: one JSON document per extension under a directory.
///
/// Writes go through a temp file and rename so a crash mid-write never
/// leaves a truncated record behind.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (creating if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Persistence(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn record_path(&self, extension_id: &str) -> PathBuf {
        self.dir.join(format!("{extension_id}.json"))
    }

    async fn read_record(path: &Path) -> Result<InstanceRecord, Error> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Persistence(format!("read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Persistence(format!("parse {}: {e}", path.display())))
    }
}

#[async_trait]
impl ExtensionStore for JsonFileStore {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn load_all(&self) -> Result<Vec<InstanceRecord>, Error> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Persistence(format!("read {}: {e}", self.dir.display())))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(Self::read_record(&path).await?);
        }
        Ok(records)
    }

    async fn save(&self, record: InstanceRecord) -> Result<(), Error> {
        let path = self.record_path(&record.extension_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::Persistence(format!("encode {}: {e}", record.extension_id)))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Persistence(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn delete(&self, extension_id: &str) -> Result<(), Error> {
        let path = self.record_path(extension_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }
}
