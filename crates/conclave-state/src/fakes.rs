//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryAuditStore`, which satisfies the [`AuditStore`] contract
//! without any external dependencies.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<StoredRecord>,
    seen: HashSet<String>,
}

/// In-memory audit store backed by a `Vec<StoredRecord>` in append order.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    inner: Mutex<Inner>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, oldest first.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, record: StoredRecord) -> StorageResult<()> {
        record.validate()?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?;
        if !inner.seen.insert(record.id().to_string()) {
            return Ok(());
        }
        inner.records.push(record);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append_audit_log(&self, entry: AuditRecord) -> StorageResult<()> {
        self.append(StoredRecord::Audit(entry))
    }

    async fn append_session(&self, session: SessionRecord) -> StorageResult<()> {
        self.append(StoredRecord::Session(session))
    }

    async fn read_recent(&self, filter: &RecordFilter) -> StorageResult<Vec<StoredRecord>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?;
        Ok(filter.apply(inner.records.iter()))
    }
}
