//! Shared fakes and helpers for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::core::crypto::{sha256_hex, SupervisorSecret};
use crate::core::types::ContractMode;
use crate::orchestrator::{RunSettings, DEPTH2_AGENT, DEPTH3_AGENT};
use crate::spawn::Subagent;

/// Deterministic secret so signatures are reproducible across a test.
pub fn test_secret() -> Arc<SupervisorSecret> {
    Arc::new(SupervisorSecret::from_bytes(vec![7u8; 32]))
}

pub fn local_settings(max_depth: u32, max_spawns: u32) -> RunSettings {
    RunSettings {
        contract_mode: ContractMode::Local,
        strict_mode: false,
        max_depth,
        max_spawns,
    }
}

/// Extract the input object embedded in a rendered role prompt.
pub fn input_from_prompt(prompt: &str) -> Value {
    let start = prompt.find("```json").expect("prompt has a json fence") + "```json".len();
    let rest = &prompt[start..];
    let end = rest.find("```").expect("prompt closes the json fence");
    serde_json::from_str(rest[..end].trim()).expect("prompt input parses")
}

/// Subagent that answers each role prompt correctly, including the real
/// frontier hash proof computed from the prompt's embedded input.
pub struct RoleSubagent;

impl Subagent for RoleSubagent {
    fn run_subagent(&self, prompt: &str) -> Result<String> {
        let input = input_from_prompt(prompt);
        let output = if prompt.contains("Frontier Contract") {
            let nonce = input.get("nonce").and_then(Value::as_str).unwrap_or("");
            let run_id = input.get("runId").and_then(Value::as_str).unwrap_or("");
            json!({
                "hashProof": sha256_hex(&format!("{nonce}:{run_id}")),
                "timestamp": 1_700_000_000_000i64,
            })
        } else if prompt.contains("Planner Contract") {
            json!({
                "spawn_requests": [
                    { "child_name": DEPTH2_AGENT, "input": { "segment": "alpha" } },
                    { "child_name": DEPTH2_AGENT, "input": { "segment": "beta" } },
                ]
            })
        } else {
            json!({
                "metric": 17,
                "computation": "contrast_analysis",
                "spawn_request": { "child_name": DEPTH3_AGENT, "input": {} },
            })
        };
        Ok(output.to_string())
    }
}

/// Subagent that replays a fixed sequence of raw replies.
pub struct ScriptedSubagent {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedSubagent {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

impl Subagent for ScriptedSubagent {
    fn run_subagent(&self, _prompt: &str) -> Result<String> {
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .context("scripted subagent ran out of replies")
    }
}
