//! Newline-delimited JSON audit store.
//!
//! Each [`StoredRecord`] is one JSON line. The file is opened in append mode
//! and only ever shrunk to drop a torn trailing line. Ids already present in
//! the file are loaded at open time so that re-appending them stays a no-op
//! across process restarts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

/// Append-only JSONL file implementing [`AuditStore`].
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: tokio::fs::File,
    /// Length of the file up to the last complete line.
    len: u64,
    seen: HashSet<String>,
}

impl JsonlAuditStore {
    /// Open (or create) the log at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        // Every append ends in a newline, so anything after the last one is
        // the remains of an interrupted write.
        let complete = contents.rfind('\n').map_or(0, |i| i + 1);
        if complete < contents.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - complete,
                "dropping torn trailing line from audit log"
            );
        }
        let seen: HashSet<String> = parse_lines(&contents[..complete])?
            .into_iter()
            .map(|r| r.id().to_string())
            .collect();
        debug!(path = %path.display(), existing = seen.len(), "opened audit log");

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len = complete as u64;
        if complete < contents.len() {
            file.set_len(len).await?;
        }

        Ok(Self {
            path,
            state: Mutex::new(FileState { file, len, seen }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: StoredRecord) -> StorageResult<()> {
        record.validate()?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut state = self.state.lock().await;
        if state.seen.contains(record.id()) {
            debug!(id = record.id(), "duplicate record ignored");
            return Ok(());
        }
        let written = match state.file.write_all(line.as_bytes()).await {
            Ok(()) => state.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(id = record.id(), error = %e, "audit append failed, rolling back");
            if let Err(rollback) = state.file.set_len(state.len).await {
                warn!(error = %rollback, "could not roll back partial audit line");
            }
            return Err(e.into());
        }
        state.len += line.len() as u64;
        state.seen.insert(record.id().to_string());
        Ok(())
    }
}

fn parse_lines(contents: &str) -> StorageResult<Vec<StoredRecord>> {
    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredRecord>(line) {
            Ok(r) => records.push(r),
            Err(e) => {
                warn!(line = idx + 1, error = %e, "corrupt audit log line");
                return Err(StorageError::CorruptRecord {
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append_audit_log(&self, entry: AuditRecord) -> StorageResult<()> {
        self.append(StoredRecord::Audit(entry)).await
    }

    async fn append_session(&self, session: SessionRecord) -> StorageResult<()> {
        self.append(StoredRecord::Session(session)).await
    }

    async fn read_recent(&self, filter: &RecordFilter) -> StorageResult<Vec<StoredRecord>> {
        // Hold the lock so a concurrent append cannot leave a half-written line.
        let _guard = self.state.lock().await;
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let records = parse_lines(&contents)?;
        Ok(filter.apply(records.iter()))
    }
}
