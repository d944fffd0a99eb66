//! Signed, immutable record of one agent's contribution to a task.
//!
//! The signature is the SHA-256 digest of the envelope's canonical JSON with
//! the `signature` field removed, so mutating any other field is detected by
//! [`MessageEnvelope::verify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::digest::{signature_of, verify_signature};
use crate::domain::error::Result;

/// Policy version stamped onto envelopes produced by the plan executor.
pub const ENVELOPE_POLICY_ID: &str = "conclave-plan";
pub const ENVELOPE_POLICY_VERSION: &str = "1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeOutputs {
    pub claims: Vec<String>,
    pub artifacts: Vec<String>,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Kinds of personal data detected (`"ssn"`, `"email"`), never the values.
    pub pii: Vec<String>,
    pub licensing: Vec<String>,
    /// Estimated 0..=1 risk that the output contains unsupported claims.
    pub hallucination: f64,
    pub safety_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub id: String,
    pub version: String,
}

impl Default for PolicyRef {
    fn default() -> Self {
        Self {
            id: ENVELOPE_POLICY_ID.to_string(),
            version: ENVELOPE_POLICY_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub tools: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Everything an envelope carries except its signature and creation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeDraft {
    pub task_id: String,
    pub step_id: String,
    pub actor: String,
    pub intent: String,
    pub inputs: serde_json::Value,
    pub outputs: EnvelopeOutputs,
    pub risk: RiskAssessment,
    pub policy: PolicyRef,
    pub provenance: Provenance,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub task_id: String,
    pub step_id: String,
    pub actor: String,
    pub intent: String,
    pub inputs: serde_json::Value,
    pub outputs: EnvelopeOutputs,
    pub risk: RiskAssessment,
    pub policy: PolicyRef,
    pub provenance: Provenance,
    pub confidence: f64,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Stamp the creation time and sign. Confidence and hallucination risk are
    /// clamped to 0..=1 first.
    pub fn seal(draft: EnvelopeDraft) -> Result<Self> {
        let mut risk = draft.risk;
        risk.hallucination = clamp_unit(risk.hallucination);
        let mut envelope = Self {
            task_id: draft.task_id,
            step_id: draft.step_id,
            actor: draft.actor,
            intent: draft.intent,
            inputs: draft.inputs,
            outputs: draft.outputs,
            risk,
            policy: draft.policy,
            provenance: draft.provenance,
            confidence: clamp_unit(draft.confidence),
            signature: String::new(),
            created_at: Utc::now(),
        };
        envelope.signature = signature_of(&envelope)?;
        Ok(envelope)
    }

    /// Fails with `DigestMismatch` if any field changed since sealing.
    pub fn verify(&self) -> Result<()> {
        verify_signature(self, &self.signature)
    }

    /// Claims, artifacts and citations as one block of text.
    pub fn output_text(&self) -> String {
        self.outputs
            .claims
            .iter()
            .chain(&self.outputs.artifacts)
            .chain(&self.outputs.citations)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ConclaveError;

    fn draft() -> EnvelopeDraft {
        EnvelopeDraft {
            task_id: "task-1".into(),
            step_id: "r".into(),
            actor: "researcher".into(),
            intent: "find sources".into(),
            inputs: serde_json::json!({"dependencies": []}),
            outputs: EnvelopeOutputs {
                claims: vec!["Rust is memory safe.".into()],
                artifacts: vec![],
                citations: vec!["https://www.rust-lang.org".into()],
            },
            risk: RiskAssessment {
                hallucination: 1.7,
                ..RiskAssessment::default()
            },
            confidence: 0.8,
            ..EnvelopeDraft::default()
        }
    }

    #[test]
    fn test_sealed_envelope_verifies() {
        let envelope = MessageEnvelope::seal(draft()).unwrap();
        assert_eq!(envelope.signature.len(), 64);
        assert!(envelope.verify().is_ok());
        assert_eq!(envelope.risk.hallucination, 1.0);
    }

    #[test]
    fn test_any_mutation_invalidates_signature() {
        let mut envelope = MessageEnvelope::seal(draft()).unwrap();
        envelope.outputs.claims.push("injected".into());
        assert!(matches!(
            envelope.verify(),
            Err(ConclaveError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_signature_survives_serde_round_trip() {
        let envelope = MessageEnvelope::seal(draft()).unwrap();
        let json = serde_json::to_string(&envelope).unwrap();
        let back: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert!(back.verify().is_ok());
    }
}
