//! Conclave-State: append-only persistence for audit events and sessions.
//!
//! The orchestration core never needs transactions spanning multiple
//! entities; it only appends single records and reads recent ones back.
//!
//! ## Key Components
//!
//! - [`AuditStore`]: the persistence port (`append_audit_log`,
//!   `append_session`, `read_recent`)
//! - [`fakes::MemoryAuditStore`]: in-memory implementation for tests
//! - [`JsonlAuditStore`]: newline-delimited JSON file store

mod error;
pub mod fakes;
mod jsonl;
pub mod storage_traits;

pub use error::StorageError;
pub use jsonl::JsonlAuditStore;
pub use storage_traits::{
    AuditRecord, AuditStore, RecordFilter, SessionKind, SessionRecord, StorageResult,
    StoredRecord,
};
