//! Storage trait definitions for Conclave.
//!
//! The audit/log sink is the only persistent shared resource the
//! orchestration core touches. Writes are append-only and idempotent by
//! record id, so concurrent writers never need more than a single-record
//! insert from the backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A persisted audit event.
///
/// Field names are stable so that logs stay replayable across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique event id; appends with an already-seen id are ignored.
    pub id: String,
    pub task_id: String,
    pub actor: String,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
    /// Full event body as produced by the core (before/after/signature).
    pub payload: serde_json::Value,
}

/// The kind of session a [`SessionRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Council,
    QuickCouncil,
    Chat,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionKind::Council => "council",
            SessionKind::QuickCouncil => "quick_council",
            SessionKind::Chat => "chat",
        };
        write!(f, "{s}")
    }
}

/// A persisted council or chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub kind: SessionKind,
    /// What the session was about (query text, conversation id, ...).
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Any record held by an [`AuditStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum StoredRecord {
    Audit(AuditRecord),
    Session(SessionRecord),
}

impl StoredRecord {
    /// The idempotency key of the record.
    pub fn id(&self) -> &str {
        match self {
            StoredRecord::Audit(a) => &a.id,
            StoredRecord::Session(s) => &s.id,
        }
    }

    /// Rules every backend enforces before writing.
    pub fn validate(&self) -> StorageResult<()> {
        if self.id().is_empty() {
            let kind = match self {
                StoredRecord::Audit(_) => "audit",
                StoredRecord::Session(_) => "session",
            };
            return Err(StorageError::InvalidRecord(format!("{kind} id must not be empty")));
        }
        Ok(())
    }

    /// When the record was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StoredRecord::Audit(a) => a.recorded_at,
            StoredRecord::Session(s) => s.created_at,
        }
    }
}

/// Filter for [`AuditStore::read_recent`].
///
/// All set fields must match. `limit == 0` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Only audit records for this task.
    pub task_id: Option<String>,
    /// Only sessions of this kind.
    pub session_kind: Option<SessionKind>,
    /// Only sessions about this subject.
    pub subject: Option<String>,
    pub limit: usize,
}

impl RecordFilter {
    /// Audit events for a single task.
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    /// Sessions of a given kind, newest `limit` first.
    pub fn sessions(kind: SessionKind, limit: usize) -> Self {
        Self {
            session_kind: Some(kind),
            limit,
            ..Self::default()
        }
    }

    /// Restrict to one subject (builder pattern).
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &StoredRecord) -> bool {
        match record {
            StoredRecord::Audit(a) => {
                self.session_kind.is_none()
                    && self.subject.is_none()
                    && self.task_id.as_deref().map_or(true, |t| t == a.task_id)
            }
            StoredRecord::Session(s) => {
                self.task_id.is_none()
                    && self.session_kind.map_or(true, |k| k == s.kind)
                    && self.subject.as_deref().map_or(true, |sub| sub == s.subject)
            }
        }
    }

    /// Select matching records, newest first, truncated to `limit`.
    pub fn apply<'a>(&self, records: impl Iterator<Item = &'a StoredRecord>) -> Vec<StoredRecord> {
        let mut selected: Vec<StoredRecord> =
            records.filter(|r| self.matches(r)).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps; reverse gives newest first.
        selected.sort_by_key(|r| r.timestamp());
        selected.reverse();
        if self.limit > 0 {
            selected.truncate(self.limit);
        }
        selected
    }
}

/// Append-only audit and session sink.
///
/// Guarantees:
/// - Appending a record whose id was already stored is a successful no-op.
/// - Records are never updated or deleted.
/// - `read_recent` returns newest records first.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit event.
    async fn append_audit_log(&self, entry: AuditRecord) -> StorageResult<()>;

    /// Append one session record.
    async fn append_session(&self, session: SessionRecord) -> StorageResult<()>;

    /// Read recent records matching `filter`.
    async fn read_recent(&self, filter: &RecordFilter) -> StorageResult<Vec<StoredRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit(id: &str, task: &str) -> StoredRecord {
        StoredRecord::Audit(AuditRecord {
            id: id.to_string(),
            task_id: task.to_string(),
            actor: "orchestrator".to_string(),
            action: "plan_started".to_string(),
            recorded_at: Utc::now(),
            payload: serde_json::json!({}),
        })
    }

    fn session(id: &str, kind: SessionKind) -> StoredRecord {
        StoredRecord::Session(SessionRecord {
            id: id.to_string(),
            kind,
            subject: "q".to_string(),
            created_at: Utc::now(),
            payload: serde_json::json!({}),
        })
    }

    #[test]
    fn test_task_filter_excludes_sessions_and_other_tasks() {
        let filter = RecordFilter::for_task("t1");
        assert!(filter.matches(&audit("a", "t1")));
        assert!(!filter.matches(&audit("b", "t2")));
        assert!(!filter.matches(&session("s", SessionKind::Chat)));
    }

    #[test]
    fn test_session_filter_matches_kind() {
        let filter = RecordFilter::sessions(SessionKind::Chat, 10);
        assert!(filter.matches(&session("s", SessionKind::Chat)));
        assert!(!filter.matches(&session("s", SessionKind::Council)));
        assert!(!filter.matches(&audit("a", "t1")));
    }

    #[test]
    fn test_apply_respects_limit() {
        let records = [audit("a", "t"), audit("b", "t"), audit("c", "t")];
        let filter = RecordFilter {
            limit: 2,
            ..RecordFilter::default()
        };
        assert_eq!(filter.apply(records.iter()).len(), 2);
    }

    #[test]
    fn test_stored_record_serializes_with_tag() {
        let json = serde_json::to_value(audit("a", "t")).unwrap();
        assert_eq!(json["record"], "audit");
        assert_eq!(json["task_id"], "t");
    }
}
