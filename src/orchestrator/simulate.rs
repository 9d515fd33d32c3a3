//! Built-in simulated subagent outputs.
//!
//! Used when no adapter and no host capability are available outside strict
//! mode, so the whole pipeline stays testable without a live agent runtime.
//! The frontier shape computes the real hash proof from the injected nonce
//! and run id, so frontier verification still succeeds under simulation.

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use crate::core::crypto::sha256_hex;

use super::{AgentRole, DEPTH2_AGENT, DEPTH3_AGENT};

/// Produce the simulated output for one role.
pub fn output_for(role: AgentRole, input: &Value) -> Value {
    match role {
        AgentRole::Orchestrator => json!({
            "spawn_requests": [
                { "child_name": DEPTH2_AGENT, "input": { "segment": "alpha" } },
                { "child_name": DEPTH2_AGENT, "input": { "segment": "beta" } },
            ]
        }),
        AgentRole::Worker => json!({
            "metric": rand::thread_rng().gen_range(0..1000),
            "computation": "contrast_analysis",
            "spawn_request": { "child_name": DEPTH3_AGENT, "input": {} },
        }),
        AgentRole::Frontier => {
            let nonce = input.get("nonce").and_then(Value::as_str).unwrap_or("");
            let run_id = input.get("runId").and_then(Value::as_str).unwrap_or("");
            json!({
                "hashProof": sha256_hex(&format!("{nonce}:{run_id}")),
                "timestamp": Utc::now().timestamp_millis(),
            })
        }
    }
}
