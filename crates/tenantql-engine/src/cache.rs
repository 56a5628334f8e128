//! Mapping Cache: durable, tenant-keyed mapping records
//!
//! There is no TTL and no automatic invalidation. A record changes only when
//! discovery writes it, when a hit bumps its usage counters, or when an
//! operator clears it.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tenantql_model::MappingSet;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Mapping store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mapping store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mapping store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<MappingSet>, StoreError>;

    /// Write the whole record. Readers see either the old record or the new one.
    async fn put(&self, mappings: &MappingSet) -> Result<(), StoreError>;

    /// Bump usage_count and last_used_at; a no-op for unknown tenants
    async fn touch(&self, tenant_id: &str) -> Result<(), StoreError>;

    /// Explicit invalidation. Returns whether a record existed.
    async fn clear(&self, tenant_id: &str) -> Result<bool, StoreError>;

    async fn tenants(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-local store, used in tests and when persistence is not wanted
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    records: RwLock<HashMap<String, MappingSet>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<MappingSet>, StoreError> {
        Ok(self.records.read().await.get(tenant_id).cloned())
    }

    async fn put(&self, mappings: &MappingSet) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(mappings.tenant_id.clone(), mappings.clone());
        Ok(())
    }

    async fn touch(&self, tenant_id: &str) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().await.get_mut(tenant_id) {
            record.touch();
        }
        Ok(())
    }

    async fn clear(&self, tenant_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(tenant_id).is_some())
    }

    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        let mut tenants: Vec<String> = self.records.read().await.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}

/// All tenants in one pretty-printed JSON document, rewritten through a
/// temporary file and rename on every change
#[derive(Debug)]
pub struct JsonFileMappingStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, MappingSet>>,
}

impl JsonFileMappingStore {
    /// Open (or start) the cache file at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            path = %path.display(),
            tenants = records.len(),
            "Opened mapping cache file"
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<String, MappingSet>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for JsonFileMappingStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<MappingSet>, StoreError> {
        Ok(self.records.lock().await.get(tenant_id).cloned())
    }

    async fn put(&self, mappings: &MappingSet) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(mappings.tenant_id.clone(), mappings.clone());
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn touch(&self, tenant_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(tenant_id) {
            return Ok(());
        }
        let mut next = records.clone();
        if let Some(record) = next.get_mut(tenant_id) {
            record.touch();
        }
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn clear(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(tenant_id) {
            return Ok(false);
        }
        let mut next = records.clone();
        next.remove(tenant_id);
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }
}
