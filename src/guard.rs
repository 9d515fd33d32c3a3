//! Proof-artifact guard: admit or reject follow-on agentic work.
//!
//! The guard never orchestrates anything. It reads the persisted artifact,
//! judges freshness on `timestampMs` alone, and under agentic enforcement
//! additionally requires a real runtime and all four engagement flags.
//! Failures surface as a structured JSON error object and exit code 5;
//! nothing on this boundary panics.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::exit_codes;
use crate::io::config::{resolve_config, ConfigOverrides};
use crate::io::proof::proof_path;

/// Env var that forces agentic enforcement regardless of the artifact.
pub const AGENTIC_ENV_VAR: &str = "ENGINE_AGENTIC";

/// Clock skew tolerated before a future timestamp is treated as invalid.
const MAX_FUTURE_SKEW_MS: i64 = 60_000;

const ENGAGEMENT_FLAGS: [&str; 4] = [
    "hasPreflightOk",
    "hasPlanCreated",
    "hasSpawnOrRequest",
    "hasProofVerified",
];

/// Guard rejection reasons, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardError {
    ProofMissing,
    ProofInvalidJson,
    MissingTimestamp,
    ProofTimestampInvalid,
    ProofStale,
    ProofFailed,
    AgenticContractViolatedRuntime,
    AgenticContractViolatedEngagement,
}

impl GuardError {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardError::ProofMissing => "proof_missing",
            GuardError::ProofInvalidJson => "proof_invalid_json",
            GuardError::MissingTimestamp => "missing_timestamp",
            GuardError::ProofTimestampInvalid => "proof_timestamp_invalid",
            GuardError::ProofStale => "proof_stale",
            GuardError::ProofFailed => "proof_failed",
            GuardError::AgenticContractViolatedRuntime => "agentic_contract_violated_runtime",
            GuardError::AgenticContractViolatedEngagement => "agentic_contract_violated_engagement",
        }
    }
}

/// Verdict echoed on stdout by `engine-guard`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardVerdict {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GuardError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<i64>,
    pub proof_path: String,
}

impl GuardVerdict {
    pub fn exit_code(&self) -> i32 {
        if self.ok {
            exit_codes::OK
        } else {
            exit_codes::ASLEEP
        }
    }

    fn rejected(path: &Path, error: GuardError, detail: Option<String>) -> Self {
        Self {
            ok: false,
            error: Some(error),
            detail,
            age_ms: None,
            proof_path: path.display().to_string(),
        }
    }
}

/// Everything the check needs, gathered up front so the decision itself is
/// pure and testable.
#[derive(Debug, Clone)]
pub struct GuardCheck {
    pub proof_path: PathBuf,
    pub max_age_min: u64,
    /// Agentic enforcement forced by the environment.
    pub agentic_env: bool,
    pub now_ms: i64,
}

/// Resolve configuration and environment, then check the artifact.
pub fn run_guard(root: &Path, overrides: &ConfigOverrides) -> Result<GuardVerdict> {
    let config = resolve_config(root, overrides)?;
    let agentic_env = std::env::var(AGENTIC_ENV_VAR)
        .map(|raw| matches!(raw.trim(), "true" | "1"))
        .unwrap_or(false);
    Ok(check_proof(&GuardCheck {
        proof_path: proof_path(root),
        max_age_min: config.proof_max_age_min,
        agentic_env,
        now_ms: Utc::now().timestamp_millis(),
    }))
}

/// Decide whether the artifact admits follow-on agentic work.
pub fn check_proof(check: &GuardCheck) -> GuardVerdict {
    let path = &check.proof_path;

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            return GuardVerdict::rejected(path, GuardError::ProofMissing, Some(err.to_string()));
        }
    };

    let artifact: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            return GuardVerdict::rejected(
                path,
                GuardError::ProofInvalidJson,
                Some(err.to_string()),
            );
        }
    };

    let Some(timestamp) = artifact.get("timestampMs") else {
        return GuardVerdict::rejected(path, GuardError::MissingTimestamp, None);
    };
    let Some(timestamp_ms) = timestamp.as_i64().filter(|ts| *ts > 0) else {
        return GuardVerdict::rejected(
            path,
            GuardError::ProofTimestampInvalid,
            Some(format!("timestampMs = {timestamp}")),
        );
    };
    if timestamp_ms > check.now_ms + MAX_FUTURE_SKEW_MS {
        return GuardVerdict::rejected(
            path,
            GuardError::ProofTimestampInvalid,
            Some("timestampMs is in the future".to_string()),
        );
    }

    let age_ms = (check.now_ms - timestamp_ms).max(0);
    let max_age_ms = check.max_age_min as i64 * 60_000;
    if age_ms > max_age_ms {
        return GuardVerdict {
            age_ms: Some(age_ms),
            ..GuardVerdict::rejected(
                path,
                GuardError::ProofStale,
                Some(format!("age {age_ms}ms exceeds {max_age_ms}ms")),
            )
        };
    }

    if artifact.get("ok") != Some(&Value::Bool(true)) {
        return GuardVerdict::rejected(path, GuardError::ProofFailed, None);
    }

    let strict_in_artifact = artifact.get("strictMode") == Some(&Value::Bool(true));
    if strict_in_artifact || check.agentic_env {
        if artifact.get("runtimeMode").and_then(Value::as_str) != Some("real") {
            return GuardVerdict::rejected(path, GuardError::AgenticContractViolatedRuntime, None);
        }
        let engagement = artifact.get("engagement").cloned().unwrap_or(Value::Null);
        let missing: Vec<&str> = ENGAGEMENT_FLAGS
            .iter()
            .filter(|flag| engagement.get(**flag) != Some(&Value::Bool(true)))
            .copied()
            .collect();
        if !missing.is_empty() {
            return GuardVerdict::rejected(
                path,
                GuardError::AgenticContractViolatedEngagement,
                Some(format!("missing flags: {}", missing.join(", "))),
            );
        }
    }

    GuardVerdict {
        ok: true,
        error: None,
        detail: None,
        age_ms: Some(age_ms),
        proof_path: path.display().to_string(),
    }
}
