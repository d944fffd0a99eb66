//! Cross-cutting domain primitives: the error taxonomy and the canonical
//! digest used to sign envelopes and audit events.

pub mod digest;
pub mod error;

pub use digest::{canonical_json, compute_digest, signature_of, verify_signature};
pub use error::{ConclaveError, Result};
