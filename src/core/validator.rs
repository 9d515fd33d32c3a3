//! Trace verification: signatures, registry consistency, hash cross-checks.

use serde::{Deserialize, Serialize};

use crate::core::crypto::{sha256_hex, verify_event_sig, SupervisorSecret};
use crate::core::registry::RunRegistry;
use crate::core::trace::unsigned_payload;
use crate::core::types::{EventKind, FrontierProof, TraceEvent};

pub const BAD_SIGNATURE: &str = "bad_signature";
pub const CHILD_RUN_MISSING: &str = "child_run_missing_in_registry";
pub const OUTPUT_HASH_MISMATCH: &str = "output_hash_mismatch";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationError {
    pub event_id: u64,
    pub reason: String,
}

/// Outcome of verifying one run: per-event errors plus the frontier-proof
/// cross-check that goes into the proof artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub ok: bool,
    pub errors: Vec<VerificationError>,
    pub depth3_proof_verified: bool,
    pub depth3_proofs: Vec<FrontierProof>,
}

/// Verify every event signature, resolve every `childRunId` against the
/// registry, and cross-check return hashes. `ok` iff no errors.
pub fn verify_run(
    secret: &SupervisorSecret,
    events: &[TraceEvent],
    registry: &RunRegistry,
    proofs: &[FrontierProof],
) -> VerificationReport {
    let mut errors = Vec::new();

    for event in events {
        let signature_ok = match unsigned_payload(event) {
            Ok(payload) => verify_event_sig(secret.bytes(), &payload, &event.supervisor_sig),
            Err(_) => false,
        };
        if !signature_ok {
            errors.push(VerificationError {
                event_id: event.event_id,
                reason: BAD_SIGNATURE.to_string(),
            });
            continue;
        }

        if let Some(child_run_id) = &event.child_run_id {
            let Some(record) = registry.get_run(child_run_id) else {
                errors.push(VerificationError {
                    event_id: event.event_id,
                    reason: CHILD_RUN_MISSING.to_string(),
                });
                continue;
            };
            if event.kind == EventKind::Return && record.output_hash != event.output_hash {
                errors.push(VerificationError {
                    event_id: event.event_id,
                    reason: OUTPUT_HASH_MISMATCH.to_string(),
                });
            }
        }
    }

    let depth3_proof_verified = proofs.iter().all(|proof| frontier_proof_ok(proof, registry));

    VerificationReport {
        ok: errors.is_empty(),
        errors,
        depth3_proof_verified,
        depth3_proofs: proofs.to_vec(),
    }
}

fn frontier_proof_ok(proof: &FrontierProof, registry: &RunRegistry) -> bool {
    let expected = sha256_hex(&format!("{}:{}", proof.nonce, proof.run_id));
    proof.hash_proof == expected
        && registry
            .get_run(&proof.run_id)
            .is_some_and(|record| record.nonce.as_deref() == Some(proof.nonce.as_str()))
}
