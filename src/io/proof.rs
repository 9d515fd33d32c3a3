//! Proof artifact persistence (`.engine/last-proof.json`).
//!
//! The artifact is the contract surface the guard consumes. Writes are
//! atomic (temp file + rename) so a cancelled run can never leave a partial
//! artifact behind. `timestampMs` is the canonical freshness field; the ISO
//! `timestamp` is advisory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::detector::EngagementFlags;
use crate::core::types::{ContractMode, RuntimeMode, TraceEvent};
use crate::core::validator::VerificationReport;

pub const PROOF_DIR: &str = ".engine";
pub const PROOF_FILE: &str = "last-proof.json";

/// Marker identifying the trace format carried by the artifact.
pub const TRACE_MARKER: &str = "supervised-recursion-trace-v1";

/// Persisted summary of one run, consumed by the guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofArtifact {
    pub ok: bool,
    pub contract_mode: ContractMode,
    pub runtime_mode: Option<RuntimeMode>,
    pub strict_mode: bool,
    pub force_sleep: bool,
    pub engagement: EngagementFlags,
    pub verification: VerificationReport,
    pub trace: Vec<TraceEvent>,
    /// Canonical freshness field, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Advisory ISO form of `timestamp_ms`.
    pub timestamp: String,
    pub trace_marker: String,
}

impl ProofArtifact {
    /// Stamp the current time onto an artifact body.
    pub fn stamped(
        ok: bool,
        contract_mode: ContractMode,
        runtime_mode: Option<RuntimeMode>,
        strict_mode: bool,
        force_sleep: bool,
        engagement: EngagementFlags,
        verification: VerificationReport,
        trace: Vec<TraceEvent>,
    ) -> Self {
        let now = Utc::now();
        Self {
            ok,
            contract_mode,
            runtime_mode,
            strict_mode,
            force_sleep,
            engagement,
            verification,
            trace,
            timestamp_ms: now.timestamp_millis(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            trace_marker: TRACE_MARKER.to_string(),
        }
    }
}

pub fn proof_path(root: &Path) -> PathBuf {
    root.join(PROOF_DIR).join(PROOF_FILE)
}

/// Atomically write the artifact for a run rooted at `root`.
pub fn write_proof(root: &Path, artifact: &ProofArtifact) -> Result<PathBuf> {
    let path = proof_path(root);
    let mut buf = serde_json::to_string_pretty(artifact).context("serialize proof artifact")?;
    buf.push('\n');
    write_atomic(&path, &buf)?;
    debug!(path = %path.display(), ok = artifact.ok, "proof artifact written");
    Ok(path)
}

/// Read the artifact leniently as raw JSON; the guard classifies shape
/// problems itself.
pub fn read_proof_value(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("proof path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp proof {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace proof {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact(ok: bool) -> ProofArtifact {
        ProofArtifact::stamped(
            ok,
            ContractMode::Local,
            Some(RuntimeMode::Simulated),
            false,
            false,
            EngagementFlags {
                has_preflight_ok: true,
                has_plan_created: true,
                has_proof_verified: true,
                has_spawn_or_request: true,
                has_quality_gate_pass: true,
            },
            VerificationReport {
                ok: true,
                errors: Vec::new(),
                depth3_proof_verified: true,
                depth3_proofs: Vec::new(),
            },
            Vec::new(),
        )
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifact = sample_artifact(true);

        let path = write_proof(temp.path(), &artifact).expect("write");
        assert_eq!(path, proof_path(temp.path()));

        let value = read_proof_value(&path).expect("read");
        let loaded: ProofArtifact = serde_json::from_value(value).expect("deserialize");
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn artifact_serializes_contract_fields_camel_case() {
        let artifact = sample_artifact(false);
        let value = serde_json::to_value(&artifact).expect("serialize");
        assert_eq!(value["ok"], false);
        assert_eq!(value["contractMode"], "local");
        assert_eq!(value["runtimeMode"], "simulated");
        assert!(value["timestampMs"].is_i64());
        assert_eq!(value["traceMarker"], TRACE_MARKER);
        assert_eq!(value["engagement"]["hasPreflightOk"], true);
        assert_eq!(value["verification"]["depth3ProofVerified"], true);
    }

    #[test]
    fn rewrite_replaces_previous_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_proof(temp.path(), &sample_artifact(true)).expect("write");
        write_proof(temp.path(), &sample_artifact(false)).expect("rewrite");

        let value = read_proof_value(&proof_path(temp.path())).expect("read");
        assert_eq!(value["ok"], false);
        assert!(!proof_path(temp.path()).with_extension("json.tmp").exists());
    }
}
